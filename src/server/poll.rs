//! Thin wrapper over the kernel readiness set, plus raw non-blocking fd I/O.
//!
//! Everything unsafe about talking to epoll is contained here; the rest of
//! the server speaks in `io::Result` and plain integers.

use std::{
    io,
    os::unix::io::{FromRawFd, OwnedFd, RawFd},
};

/// An owned epoll instance.
///
/// Registration is also possible from other threads through
/// [`register`], which is how the acceptor hands fds to workers;
/// the kernel serializes control operations on the same epoll.
#[derive(Debug)]
pub(crate) struct Poller {
    fd: RawFd,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        match fd < 0 {
            true => Err(io::Error::last_os_error()),
            false => Ok(Self { fd }),
        }
    }

    #[inline(always)]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub(crate) fn add(&self, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
        register(self.fd, fd, events, data)
    }

    /// Replaces the watched event set for an already-registered fd.
    #[inline]
    pub(crate) fn modify(&self, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
        ctl(self.fd, libc::EPOLL_CTL_MOD, fd, events, data)
    }

    /// Waits for readiness; `timeout_ms < 0` blocks indefinitely.
    pub(crate) fn wait(
        &self,
        events: &mut [libc::epoll_event],
        timeout_ms: i32,
    ) -> io::Result<usize> {
        let count = unsafe {
            libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };

        match count < 0 {
            true => Err(io::Error::last_os_error()),
            false => Ok(count as usize),
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Adds `fd` to the epoll instance `epoll_fd`.
#[inline]
pub(crate) fn register(epoll_fd: RawFd, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
    ctl(epoll_fd, libc::EPOLL_CTL_ADD, fd, events, data)
}

fn ctl(epoll_fd: RawFd, op: i32, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: data };

    match unsafe { libc::epoll_ctl(epoll_fd, op, fd, &mut event) } < 0 {
        true => Err(io::Error::last_os_error()),
        false => Ok(()),
    }
}

/// Reads from a non-blocking fd. `Ok(None)` means "would block".
pub(crate) fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}

/// Writes to a non-blocking fd. `Ok(None)` means "would block".
pub(crate) fn write_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}

/// Closes a client fd; failure here is unactionable and ignored.
#[inline(always)]
pub(crate) fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// Non-blocking close-on-exec pipe: `(read, write)`.
pub(crate) fn wake_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];

    match unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
        true => Err(io::Error::last_os_error()),
        false => unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) },
    }
}
