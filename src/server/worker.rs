//! Worker reactor: one epoll loop per CPU driving per-connection coroutines.
//!
//! A worker owns every fd the acceptor assigns to it for that connection's
//! whole life. New fds arrive over the worker's mailbox pipe; the worker
//! registers them on its own readiness set with read interest and appends
//! them to its expiry queue. One loop iteration waits for readiness, walks
//! the triggered fds, transitions each slot's coroutine, flips read/write
//! interest to whatever the coroutine is blocked on, and stamps the slot's
//! expiry tick. Timed-out waits advance the worker's death clock and reap
//! expired connections from the head of the expiry queue.

use crate::{
    limits::ConnLimits,
    server::{
        connection::{drive, ConnState},
        coro::Coro,
        poll::{self, Poller},
        server_impl::Router,
    },
};
use std::{
    io,
    os::unix::io::{AsRawFd, OwnedFd, RawFd},
    rc::Rc,
    sync::Arc,
    thread::JoinHandle,
};

/// Read interest: level-triggered hangup/error, edge-triggered reads.
pub(crate) const READ_EVENTS: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLERR) as u32 | libc::EPOLLET as u32;

/// Write interest.
pub(crate) const WRITE_EVENTS: u32 = (libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLERR) as u32;

// Client fds register with their own value as the event data; the mailbox
// pipe gets a token no fd can collide with.
const WAKE_TOKEN: u64 = u64::MAX;

// Mailbox message asking the worker to exit its loop.
const STOP: RawFd = -1;

#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
    pub(crate) limits: ConnLimits,
    /// Slot table size: the process fd soft limit.
    pub(crate) max_fd: usize,
    /// Expiry queue capacity and event batch size.
    pub(crate) max_fd_per_thread: usize,
}

/// A spawned worker, as seen from the acceptor and the lifecycle.
pub(crate) struct Worker {
    mailbox: OwnedFd,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(
        index: usize,
        router: Arc<Router>,
        config: WorkerConfig,
    ) -> io::Result<Self> {
        let poller = Poller::new()?;
        let (mailbox_rd, mailbox_wr) = poll::wake_pipe()?;

        poller.add(mailbox_rd.as_raw_fd(), libc::EPOLLIN as u32, WAKE_TOKEN)?;

        let handle = std::thread::Builder::new()
            .name(format!("strand-worker-{}", index))
            .spawn(move || Reactor::new(poller, mailbox_rd, router, config).run())?;

        Ok(Self {
            mailbox: mailbox_wr,
            handle,
        })
    }

    /// Assigns an accepted fd to this worker. `WouldBlock` means the
    /// mailbox is full and the caller should shed the connection.
    pub(crate) fn hand_off(&self, fd: RawFd) -> io::Result<()> {
        match poll::write_nonblocking(self.mailbox.as_raw_fd(), &fd.to_ne_bytes())? {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    /// Interrupts the worker's wait; it exits its loop on the next wake.
    pub(crate) fn request_stop(&self) {
        let _ = poll::write_nonblocking(self.mailbox.as_raw_fd(), &STOP.to_ne_bytes());
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            log::error!("worker thread panicked");
        }
    }
}

/// Per-fd scheduling state. The scratch the coroutine touches lives behind
/// the `Rc`; everything else is the worker's alone.
#[derive(Debug)]
struct Slot {
    alive: bool,
    should_resume: bool,
    write_events: bool,
    time_to_die: u64,
    coro: Option<Coro>,
    state: Rc<ConnState>,
}

impl Slot {
    fn new(fd: RawFd, buffer_capacity: usize) -> Self {
        Self {
            alive: false,
            should_resume: false,
            write_events: false,
            time_to_die: 0,
            coro: None,
            state: Rc::new(ConnState::new(fd, buffer_capacity)),
        }
    }
}

/// Circular FIFO of fds awaiting timeout-based reap.
#[derive(Debug)]
struct DeathQueue {
    fds: Box<[RawFd]>,
    first: usize,
    last: usize,
    population: usize,
}

impl DeathQueue {
    fn new(capacity: usize) -> Self {
        Self {
            fds: vec![-1; capacity.max(1)].into_boxed_slice(),
            first: 0,
            last: 0,
            population: 0,
        }
    }

    #[inline]
    fn push(&mut self, fd: RawFd) {
        self.fds[self.last] = fd;
        self.last = (self.last + 1) % self.fds.len();
        self.population += 1;
    }

    #[inline]
    fn peek(&self) -> Option<RawFd> {
        match self.population {
            0 => None,
            _ => Some(self.fds[self.first]),
        }
    }

    #[inline]
    fn pop(&mut self) {
        self.first = (self.first + 1) % self.fds.len();
        self.population -= 1;
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.population == 0
    }
}

struct Reactor {
    poll: Poller,
    mailbox: OwnedFd,
    router: Arc<Router>,
    config: WorkerConfig,
    slots: Vec<Option<Box<Slot>>>,
    death_queue: DeathQueue,
    death_time: u64,
}

impl Reactor {
    fn new(poll: Poller, mailbox: OwnedFd, router: Arc<Router>, config: WorkerConfig) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(config.max_fd, || None);

        Self {
            poll,
            mailbox,
            router,
            death_queue: DeathQueue::new(config.max_fd_per_thread),
            config,
            slots,
            death_time: 0,
        }
    }

    fn run(mut self) {
        let mut events =
            vec![libc::epoll_event { events: 0, u64: 0 }; self.config.max_fd_per_thread.max(1)];
        let tick_ms = (self.config.limits.timer_granularity.as_millis() as i32).max(1);

        'reactor: loop {
            let timeout = match self.death_queue.is_empty() {
                true => -1,
                false => tick_ms,
            };

            let count = match self.poll.wait(&mut events, timeout) {
                Err(err) => match err.raw_os_error() {
                    // Readiness set gone: the lifecycle is tearing us down.
                    Some(libc::EBADF) | Some(libc::EINVAL) => break 'reactor,
                    _ => continue,
                },
                Ok(count) => count,
            };

            if count == 0 {
                self.tick();
                continue;
            }

            for event in &events[..count] {
                if event.u64 == WAKE_TOKEN {
                    if !self.drain_mailbox() {
                        break 'reactor;
                    }
                    continue;
                }
                self.handle_event(event.u64 as RawFd, event.events);
            }
        }

        self.teardown();
    }

    /// Pulls newly assigned fds out of the mailbox. `false` means a stop
    /// request arrived.
    fn drain_mailbox(&mut self) -> bool {
        let mailbox_fd = self.mailbox.as_raw_fd();
        let mut msg = [0u8; 4];

        loop {
            // Writes are 4 bytes and atomic, so reads see whole messages.
            match poll::read_nonblocking(mailbox_fd, &mut msg) {
                Ok(Some(4)) => {
                    let fd = RawFd::from_ne_bytes(msg);
                    match fd < 0 {
                        true => return false,
                        false => self.adopt(fd),
                    }
                }
                Ok(Some(_)) => return false, // writers gone
                Ok(None) => return true,
                Err(err) => {
                    log::error!("worker mailbox read: {}", err);
                    return true;
                }
            }
        }
    }

    /// Takes ownership of an accepted fd: read interest on the readiness
    /// set, slot activated, expiry queue entry appended.
    fn adopt(&mut self, fd: RawFd) {
        let index = fd as usize;
        if index >= self.slots.len() {
            log::warn!("fd {} beyond the slot table, dropping connection", fd);
            poll::close_fd(fd);
            return;
        }

        if let Err(err) = self.poll.add(fd, READ_EVENTS, fd as u64) {
            log::error!("registering fd {}: {}", fd, err);
            poll::close_fd(fd);
            return;
        }

        let buffer_capacity = self.config.limits.response_buffer_capacity;
        let slot = self.slots[index].get_or_insert_with(|| Box::new(Slot::new(fd, buffer_capacity)));

        slot.state.set_fd(fd);
        slot.coro = None;
        slot.should_resume = false;
        slot.write_events = false;
        slot.time_to_die = self.death_time + self.config.limits.keep_alive_timeout as u64;

        if !slot.alive {
            self.death_queue.push(fd);
            slot.alive = true;
        }
    }

    /// One expiry tick: advance the death clock, then reap expired heads.
    fn tick(&mut self) {
        self.death_time += 1;

        while let Some(fd) = self.death_queue.peek() {
            let slot = match self.slots[fd as usize].as_mut() {
                Some(slot) => slot,
                None => {
                    self.death_queue.pop();
                    continue;
                }
            };

            if slot.time_to_die > self.death_time {
                break; // the head is not due yet
            }
            self.death_queue.pop();

            // Might have died already from a hangup event.
            if !slot.alive {
                continue;
            }

            slot.coro = None;
            slot.should_resume = false;
            slot.alive = false;
            poll::close_fd(fd);
        }
    }

    fn handle_event(&mut self, fd: RawFd, triggered: u32) {
        let index = fd as usize;
        let slot = match self.slots.get_mut(index).and_then(|slot| slot.as_mut()) {
            Some(slot) => slot,
            None => {
                log::warn!("event for unknown fd {}", fd);
                return;
            }
        };
        slot.state.set_fd(fd);

        if triggered & (libc::EPOLLRDHUP | libc::EPOLLHUP) as u32 != 0 {
            // A dropped coroutine must not leak onto the next connection
            // that reuses this fd number.
            slot.coro = None;
            slot.should_resume = false;
            slot.alive = false;
            poll::close_fd(fd);
            return;
        }

        // The slot went idle since its last activity; any finished
        // coroutine is released before a fresh one is spawned.
        if !slot.should_resume {
            slot.coro = None;
        }

        if slot.coro.is_none() {
            let state = slot.state.clone();
            let router = self.router.clone();
            let limits = self.config.limits.clone();

            slot.coro = Some(Coro::new(move |yield_point| {
                drive(state, router, limits, yield_point)
            }));
            slot.should_resume = true;
            slot.write_events = false;
        }

        if let Some(coro) = slot.coro.as_mut() {
            let outcome = coro.resume();
            slot.should_resume = outcome.should_resume();

            if outcome.wants_write() != slot.write_events {
                let shape = match outcome.wants_write() {
                    true => WRITE_EVENTS,
                    false => READ_EVENTS,
                };
                if let Err(err) = self.poll.modify(fd, shape, fd as u64) {
                    log::error!("interest flip on fd {}: {}", fd, err);
                }
                slot.write_events = outcome.wants_write();
            }
        }

        // Keep-alive and still-working connections get the full timeout;
        // anything else is due on the next tick.
        slot.time_to_die = self.death_time
            + match slot.state.is_keep_alive() || slot.should_resume {
                true => self.config.limits.keep_alive_timeout as u64,
                false => 0,
            };

        if !slot.alive {
            self.death_queue.push(fd);
            slot.alive = true;
        }
    }

    fn teardown(&mut self) {
        let mut closed = 0usize;

        for (fd, entry) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = entry.as_mut() {
                if slot.alive {
                    slot.coro = None;
                    slot.alive = false;
                    poll::close_fd(fd as RawFd);
                    closed += 1;
                }
            }
        }

        log::debug!("worker exiting, closed {} live connections", closed);
    }
}
