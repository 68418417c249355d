//! Per-connection scratch state and the request-driving coroutine body.
//!
//! Each slot owns one [`ConnState`] for its entire life: the response
//! buffer is allocated once and reused, the query-parameter storage flips
//! between the empty sentinel and owned pairs, and the flags the worker
//! reads after every resume live in cells. The coroutine body resets the
//! scratch, reads and parses one request, dispatches it through the URL
//! trie, and writes the response, yielding whenever the socket would block.

use crate::{
    errors::ErrorKind,
    http::{
        query::QueryParams,
        request::{self, Request},
        response::{self, Response},
        types::{Method, StatusCode, Version},
    },
    limits::ConnLimits,
    server::{
        coro::{Wants, YieldPoint},
        poll,
        server_impl::{ParseFlags, Router},
    },
};
use std::{
    cell::{Cell, RefCell},
    os::unix::io::RawFd,
    rc::Rc,
    sync::Arc,
};

const MAX_QUERY_PARAMS: usize = 256;

/// Scratch state a slot keeps across requests.
///
/// The worker reads the cells after each coroutine resume; the coroutine is
/// the only borrower of the `RefCell` storage, so borrows never conflict.
#[derive(Debug)]
pub(crate) struct ConnState {
    fd: Cell<RawFd>,
    keep_alive: Cell<bool>,
    buffer: RefCell<Vec<u8>>,
    query: RefCell<QueryParams>,
}

impl ConnState {
    pub(crate) fn new(fd: RawFd, buffer_capacity: usize) -> Self {
        Self {
            fd: Cell::new(fd),
            keep_alive: Cell::new(false),
            buffer: RefCell::new(Vec::with_capacity(buffer_capacity)),
            query: RefCell::new(QueryParams::Empty),
        }
    }

    /// Request reset discipline: preserve the fd and the buffer's storage,
    /// release owned query parameters, zero everything else.
    pub(crate) fn reset(&self) {
        self.keep_alive.set(false);
        *self.query.borrow_mut() = QueryParams::Empty;
        self.buffer.borrow_mut().clear();
    }

    #[inline(always)]
    pub(crate) fn fd(&self) -> RawFd {
        self.fd.get()
    }

    #[inline(always)]
    pub(crate) fn set_fd(&self, fd: RawFd) {
        self.fd.set(fd);
    }

    #[inline(always)]
    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive.get()
    }

    #[cfg(test)]
    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer.borrow().capacity()
    }
}

/// Coroutine entry: one full request/response exchange on `state`'s fd.
pub(crate) async fn drive(
    state: Rc<ConnState>,
    router: Arc<Router>,
    limits: ConnLimits,
    yield_point: YieldPoint,
) {
    state.reset();
    let fd = state.fd();

    let mut raw = Vec::with_capacity(1024);
    match read_head(fd, &mut raw, limits.max_request_size, &yield_point).await {
        Ok(true) => {}
        // The peer went away, or reading failed outright; either way there
        // is nobody worth answering.
        Ok(false) | Err(ErrorKind::Io(_)) => return,
        Err(err) => return fail(&state, Version::Http11, err.status(), &yield_point).await,
    }

    let head = match request::parse_head(&raw) {
        Ok(head) => head,
        Err(err) => return fail(&state, Version::Http11, err.status(), &yield_point).await,
    };
    state.keep_alive.set(head.keep_alive);

    let route = match router.lookup(head.path.as_bytes()) {
        Some(route) => route,
        None => return fail(&state, head.version, StatusCode::NotFound, &yield_point).await,
    };

    if route.flags.contains(ParseFlags::QUERY_STRING) {
        if let Some(raw_query) = head.raw_query {
            match QueryParams::parse(raw_query, MAX_QUERY_PARAMS) {
                Ok(params) => *state.query.borrow_mut() = params,
                Err(_) => {
                    return fail(&state, head.version, StatusCode::BadRequest, &yield_point).await
                }
            }
        }
    }

    // Handler invocation; borrows stay inside this block so the write phase
    // below can re-borrow the body buffer.
    let (status, mime_type) = {
        let query = state.query.borrow();
        let mut buffer = state.buffer.borrow_mut();
        let mut resp = Response::new(&mut buffer);

        let req = Request {
            method: head.method,
            path: head.path,
            version: head.version,
            keep_alive: head.keep_alive,
            query: &query,
        };

        let status = route.handler.handle(&req, &mut resp);
        (status, resp.current_mime_type())
    };

    let mime_type = match !status.is_success() && state.buffer.borrow().is_empty() {
        true => {
            response::error_page(&mut state.buffer.borrow_mut(), status);
            "text/html"
        }
        false => mime_type,
    };

    send_response(&state, head.version, status, mime_type, head.method, &yield_point).await;
}

/// Accumulates bytes until the head terminator arrives. `Ok(false)` means
/// the peer hung up before completing a request.
async fn read_head(
    fd: RawFd,
    raw: &mut Vec<u8>,
    max_request_size: usize,
    yield_point: &YieldPoint,
) -> Result<bool, ErrorKind> {
    let mut chunk = [0u8; 1024];

    loop {
        if request::head_complete(raw).is_some() {
            return Ok(true);
        }
        if raw.len() > max_request_size {
            return Err(ErrorKind::RequestTooLarge);
        }

        match poll::read_nonblocking(fd, &mut chunk) {
            Ok(Some(0)) => return Ok(false),
            Ok(Some(n)) => raw.extend_from_slice(&chunk[..n]),
            Ok(None) => yield_point.io(Wants::Read).await,
            Err(err) => {
                log::debug!("read on fd {}: {}", fd, err);
                return Err(err.into());
            }
        }
    }
}

/// Serializes and writes the head, then the slot buffer's body.
async fn send_response(
    state: &ConnState,
    version: Version,
    status: StatusCode,
    mime_type: &str,
    method: Method,
    yield_point: &YieldPoint,
) {
    let fd = state.fd();
    let body_len = state.buffer.borrow().len();

    let mut head = Vec::with_capacity(128);
    response::serialize_head(
        &mut head,
        version,
        status,
        mime_type,
        body_len,
        state.is_keep_alive(),
    );

    if !write_all(fd, &head, yield_point).await {
        state.keep_alive.set(false);
        return;
    }

    // HEAD gets the full head and no body.
    if method != Method::Head && body_len > 0 {
        let body = state.buffer.borrow();
        if !write_all(fd, &body, yield_point).await {
            state.keep_alive.set(false);
        }
    }
}

/// Error path: default error page, connection marked for closing.
async fn fail(state: &ConnState, version: Version, status: StatusCode, yield_point: &YieldPoint) {
    state.keep_alive.set(false);
    response::error_page(&mut state.buffer.borrow_mut(), status);
    send_response(state, version, status, "text/html", Method::Get, yield_point).await;
}

async fn write_all(fd: RawFd, buf: &[u8], yield_point: &YieldPoint) -> bool {
    let mut at = 0;

    while at < buf.len() {
        match poll::write_nonblocking(fd, &buf[at..]) {
            Ok(Some(n)) => at += n,
            Ok(None) => yield_point.io(Wants::Write).await,
            Err(err) => {
                log::debug!("write on fd {}: {}", fd, err);
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{server::coro::Coro, RouteHandler};
    use std::os::unix::io::AsRawFd;

    struct Hello;

    impl RouteHandler for Hello {
        fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
            match req.query(b"name") {
                Some(name) => {
                    resp.body(b"hello ");
                    resp.append(name);
                }
                None => {
                    resp.body("hello world");
                }
            }
            StatusCode::Ok
        }
    }

    fn test_router() -> Arc<Router> {
        Arc::new(Router::build(vec![(
            "/".to_string(),
            Box::new(Hello) as Box<dyn RouteHandler>,
        )]))
    }

    fn socketpair() -> (std::os::unix::io::OwnedFd, std::os::unix::io::OwnedFd) {
        use std::os::unix::io::{FromRawFd, OwnedFd};

        let mut fds = [0 as RawFd; 2];
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(rc, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn read_side(fd: RawFd) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        while let Ok(Some(n)) = poll::read_nonblocking(fd, &mut chunk) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out
    }

    fn run_exchange(state: &Rc<ConnState>, client: RawFd, request: &[u8]) -> Vec<u8> {
        poll::write_nonblocking(client, request).unwrap();

        let mut coro = Coro::new({
            let state = state.clone();
            let router = test_router();
            move |yp| drive(state, router, ConnLimits::default(), yp)
        });
        while coro.resume().should_resume() {}

        read_side(client)
    }

    #[test]
    fn reset_discipline() {
        let state = ConnState::new(9, 256);

        state.keep_alive.set(true);
        state.buffer.borrow_mut().extend_from_slice(&[0u8; 300]);
        *state.query.borrow_mut() = QueryParams::parse(b"a=1", 8).unwrap();

        let grown = state.buffer_capacity();
        state.reset();

        assert_eq!(state.fd(), 9);
        assert!(!state.is_keep_alive());
        assert!(state.buffer.borrow().is_empty());
        assert_eq!(state.buffer_capacity(), grown); // capacity retained
        assert_eq!(*state.query.borrow(), QueryParams::Empty);
    }

    #[test]
    fn serves_one_request() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 256));

        let reply = run_exchange(&state, client.as_raw_fd(), b"GET / HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(reply).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("hello world"));
        assert!(state.is_keep_alive());
    }

    #[test]
    fn parses_query_when_flagged() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 256));

        let reply = run_exchange(&state, client.as_raw_fd(), b"GET /?name=coro HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(reply).unwrap().ends_with("hello coro"));
    }

    #[test]
    fn unknown_path_is_404() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 256));

        // The trie only knows "/"-prefixed paths; "*" walks to nothing.
        let reply = run_exchange(&state, client.as_raw_fd(), b"OPTIONS * HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(reply).unwrap();

        assert!(text.starts_with("HTTP/1.1 404 Not found\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!state.is_keep_alive());
    }

    #[test]
    fn bad_request_line_closes() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 256));

        let reply = run_exchange(&state, client.as_raw_fd(), b"GET bogus HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(reply).unwrap();

        assert!(text.starts_with("HTTP/1.1 400 Bad request\r\n"));
        assert!(!state.is_keep_alive());
    }

    #[test]
    fn hangup_before_bytes_sends_nothing() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 256));

        let mut coro = Coro::new({
            let state = state.clone();
            let router = test_router();
            move |yp| drive(state, router, ConnLimits::default(), yp)
        });

        // No bytes yet: the coroutine parks on read.
        assert_eq!(coro.resume(), crate::server::coro::Resume::AwaitingRead);

        drop(client); // peer hangs up; next read returns 0
        assert_eq!(coro.resume(), crate::server::coro::Resume::Finished);
        assert!(!state.is_keep_alive());
    }

    #[test]
    fn buffer_grows_to_largest_response() {
        let (server, client) = socketpair();
        let state = Rc::new(ConnState::new(server.as_raw_fd(), 16));

        run_exchange(
            &state,
            client.as_raw_fd(),
            b"GET /?name=a-name-long-enough-to-outgrow-the-buffer HTTP/1.1\r\n\r\n",
        );
        let grown = state.buffer_capacity();
        assert!(grown > 16);

        // A smaller response on the same slot reuses the grown storage.
        run_exchange(&state, client.as_raw_fd(), b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(state.buffer_capacity(), grown);
    }
}
