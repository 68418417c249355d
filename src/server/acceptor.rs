//! Acceptor: one readiness loop feeding every worker.
//!
//! Watches three fds: the listening socket, the optional directory-watch
//! source, and the shutdown pipe. Each listener wake drains `accept4`
//! completely; accepted sockets go to the next worker round-robin, which
//! places them on its readiness set with read interest. From that moment
//! the connection belongs to that worker alone.

use crate::server::{
    poll::{self, Poller},
    worker::Worker,
};
use std::{io, os::unix::io::RawFd};

const LISTENER: u64 = 0;
const DIR_WATCH: u64 = 1;
const SHUTDOWN: u64 = 2;

/// A source of filesystem events folded into the acceptor's loop.
///
/// The acceptor never interprets the events; it only notices readability
/// on [`watch_fd`](Self::watch_fd) and asks the implementation to drain.
pub trait DirWatch: Send {
    /// The fd the acceptor polls for readability.
    fn watch_fd(&self) -> RawFd;

    /// Drains pending events. Called on the acceptor thread.
    fn process_events(&mut self);
}

pub(crate) struct Acceptor<'a> {
    poll: Poller,
    listen_fd: RawFd,
    workers: &'a [Worker],
    dir_watch: Option<&'a mut Box<dyn DirWatch>>,
    round_robin: usize,
}

impl<'a> Acceptor<'a> {
    pub(crate) fn new(
        listen_fd: RawFd,
        workers: &'a [Worker],
        dir_watch: Option<&'a mut Box<dyn DirWatch>>,
        shutdown_fd: RawFd,
    ) -> io::Result<Self> {
        let poll = Poller::new()?;

        poll.add(listen_fd, libc::EPOLLIN as u32, LISTENER)?;
        poll.add(shutdown_fd, libc::EPOLLIN as u32, SHUTDOWN)?;
        if let Some(watch) = &dir_watch {
            poll.add(watch.watch_fd(), libc::EPOLLIN as u32, DIR_WATCH)?;
        }

        Ok(Self {
            poll,
            listen_fd,
            workers,
            dir_watch,
            round_robin: 0,
        })
    }

    /// Runs until the shutdown pipe fires or a hard failure occurs.
    pub(crate) fn run(&mut self) -> io::Result<()> {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 128];

        loop {
            let count = match self.poll.wait(&mut events, -1) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
                Ok(count) => count,
            };

            for event in &events[..count] {
                match event.u64 {
                    LISTENER => self.drain_accept()?,
                    DIR_WATCH => {
                        if let Some(watch) = self.dir_watch.as_mut() {
                            watch.process_events();
                        }
                    }
                    _ => {
                        log::info!("shutdown requested, leaving the accept loop");
                        return Ok(());
                    }
                }
            }
        }
    }

    // One readiness wake may carry a burst of connections; accept until the
    // socket runs dry.
    fn drain_accept(&mut self) -> io::Result<()> {
        loop {
            let fd = unsafe {
                libc::accept4(
                    self.listen_fd,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };

            if fd >= 0 {
                self.dispatch(fd)?;
                continue;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => {
                    log::warn!("accept: {}", err);
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self, fd: RawFd) -> io::Result<()> {
        let worker = &self.workers[self.round_robin % self.workers.len()];
        self.round_robin = self.round_robin.wrapping_add(1);

        match worker.hand_off(fd) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                // Mailbox full: shed this connection instead of blocking
                // the accept loop behind one overloaded worker.
                log::warn!("worker mailbox full, dropping connection fd {}", fd);
                poll::close_fd(fd);
                Ok(())
            }
            Err(err) => {
                // Losing the ability to hand off connections is fatal.
                log::error!("handing fd {} to a worker: {}", fd, err);
                poll::close_fd(fd);
                Err(err)
            }
        }
    }
}
