//! Server lifecycle: builder, route table, worker spawn/join, teardown.

use crate::{
    http::{request::Request, response::Response, types::StatusCode},
    limits::{ConnLimits, ServerLimits},
    server::{
        acceptor::{Acceptor, DirWatch},
        poll,
        worker::{Worker, WorkerConfig},
    },
    trie::Trie,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    ops::BitOr,
    os::unix::io::{AsRawFd, OwnedFd, RawFd},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

/// What the request parser should extract for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFlags(u8);

impl ParseFlags {
    pub const NONE: Self = Self(0);
    pub const QUERY_STRING: Self = Self(1 << 0);
    /// Every parse bit; the default when a handler does not override.
    pub const ALL: Self = Self(u8::MAX);

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParseFlags {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A route plug-in: one instance per registered URL prefix.
///
/// # Examples
///
/// ```
/// use strand_web::{Request, Response, RouteHandler, StatusCode};
///
/// struct Hello;
///
/// impl RouteHandler for Hello {
///     fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
///         resp.body(format!("hello from {}", req.path()));
///         StatusCode::Ok
///     }
/// }
/// ```
pub trait RouteHandler: Send + Sync + 'static {
    /// Invoked once per route at server init, before any request.
    fn init(&mut self) {}

    /// Invoked per request on the owning worker's thread. The returned
    /// status becomes the response status; non-success statuses with an
    /// empty body get the default error page.
    fn handle(&self, request: &Request, response: &mut Response) -> StatusCode;

    /// Invoked once per route at server shutdown, after workers joined.
    fn shutdown(&mut self) {}

    /// Which request pieces the parser should extract for this route.
    fn parse_flags(&self) -> ParseFlags {
        ParseFlags::ALL
    }
}

pub(crate) struct Route {
    pub(crate) prefix: String,
    pub(crate) handler: Box<dyn RouteHandler>,
    pub(crate) flags: ParseFlags,
}

/// Read-only after init; shared freely across workers.
pub(crate) struct Router {
    trie: Trie<usize>,
    routes: Vec<Route>,
}

impl Router {
    pub(crate) fn build(entries: Vec<(String, Box<dyn RouteHandler>)>) -> Self {
        let mut trie = Trie::new();
        let mut routes = Vec::with_capacity(entries.len());

        for (prefix, mut handler) in entries {
            handler.init();
            let flags = handler.parse_flags();

            log::debug!("route registered for prefix {:?}", prefix);
            trie.add(prefix.as_bytes(), routes.len());
            routes.push(Route {
                prefix,
                handler,
                flags,
            });
        }

        Self { trie, routes }
    }

    /// Longest-prefix dispatch.
    #[inline]
    pub(crate) fn lookup(&self, path: &[u8]) -> Option<&Route> {
        self.trie
            .find_longest(path)
            .map(|(index, _)| &self.routes[*index])
    }

    pub(crate) fn shutdown(&mut self) {
        for route in &mut self.routes {
            log::debug!("route for prefix {:?} shutting down", route.prefix);
            route.handler.shutdown();
        }
    }
}

/// Requests the accept loop to exit, from any thread.
///
/// Obtained from [`Server::shutdown_handle`]; the same effect as SIGINT.
#[derive(Clone)]
pub struct ShutdownHandle {
    pipe: Arc<OwnedFd>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = poll::write_nonblocking(self.pipe.as_raw_fd(), b"\0");
    }
}

/// An initialized server: socket bound, workers running, routes armed.
///
/// # Examples
///
/// ```no_run
/// use strand_web::{Request, Response, RouteHandler, Server, StatusCode};
///
/// struct Hello;
///
/// impl RouteHandler for Hello {
///     fn handle(&self, _: &Request, resp: &mut Response) -> StatusCode {
///         resp.body("Hello, world!");
///         StatusCode::Ok
///     }
/// }
///
/// fn main() -> std::io::Result<()> {
///     Server::builder()
///         .bind("0.0.0.0:8080")
///         .route("/", Hello)
///         .build()?
///         .run()
/// }
/// ```
pub struct Server {
    listener: Socket,
    local_addr: SocketAddr,
    workers: Vec<Worker>,
    router: Arc<Router>,
    dir_watch: Option<Box<dyn DirWatch>>,
    shutdown_rd: OwnedFd,
    shutdown_wr: Arc<OwnedFd>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            routes: Vec::new(),
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            dir_watch: None,
        }
    }

    /// The bound address; useful with port `0`.
    #[inline(always)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            pipe: self.shutdown_wr.clone(),
        }
    }

    /// Runs the accept loop on the calling thread until SIGINT or a
    /// [`ShutdownHandle`] fires, then tears the whole server down.
    ///
    /// Shutdown is abrupt: workers are released from their waits and
    /// joined, live connections are closed without draining.
    pub fn run(mut self) -> io::Result<()> {
        let result = match Acceptor::new(
            self.listener.as_raw_fd(),
            &self.workers,
            self.dir_watch.as_mut(),
            self.shutdown_rd.as_raw_fd(),
        ) {
            Ok(mut acceptor) => acceptor.run(),
            Err(err) => Err(err),
        };

        self.shutdown();
        result
    }

    fn shutdown(self) {
        let Server {
            listener,
            workers,
            router,
            dir_watch,
            shutdown_rd,
            shutdown_wr,
            ..
        } = self;

        // Stop signal-handler writes into a pipe about to close.
        SIGNAL_PIPE.store(-1, Ordering::Relaxed);

        // Release every worker's wait first, then join; a worker busy with
        // a long keep-alive list must not delay its siblings' wake-ups.
        for worker in &workers {
            worker.request_stop();
        }
        for worker in workers {
            worker.join();
        }

        if let Err(err) = listener.shutdown(std::net::Shutdown::Both) {
            log::debug!("listener shutdown: {}", err);
        }
        drop(listener);

        match Arc::try_unwrap(router) {
            Ok(mut router) => router.shutdown(),
            // Workers joined, coroutines dropped; only a leaked clone ends
            // up here, and skipping handler shutdown is all we can do.
            Err(_) => log::error!("route table still shared at shutdown"),
        }

        drop(dir_watch);
        drop(shutdown_rd);
        drop(shutdown_wr);

        log::info!("server shut down");
    }
}

/// Builder for [`Server`] instances.
pub struct ServerBuilder {
    addr: SocketAddr,
    routes: Vec<(String, Box<dyn RouteHandler>)>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    dir_watch: Option<Box<dyn DirWatch>>,
}

impl ServerBuilder {
    /// Sets the listen address (default: `0.0.0.0:8080`). Port `0` binds
    /// an ephemeral port, reported by [`Server::local_addr`].
    ///
    /// # Panics
    ///
    /// Panics when `addr` does not resolve to any address.
    #[track_caller]
    pub fn bind<A: ToSocketAddrs>(mut self, addr: A) -> Self {
        self.addr = addr
            .to_socket_addrs()
            .expect("the `bind` address must resolve")
            .next()
            .expect("the `bind` address must resolve");
        self
    }

    /// Registers `handler` under a URL prefix. Dispatch picks the route
    /// with the longest matching prefix.
    pub fn route<H: RouteHandler>(mut self, prefix: &str, handler: H) -> Self {
        self.routes.push((prefix.to_string(), Box::new(handler)));
        self
    }

    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = limits;
        self
    }

    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = limits;
        self
    }

    /// Attaches a directory-watch source to the acceptor's loop.
    pub fn dir_watch<W: DirWatch + 'static>(mut self, watch: W) -> Self {
        self.dir_watch = Some(Box::new(watch));
        self
    }

    /// Initializes the server: raises the fd limit, installs the signal
    /// policy, binds and listens, arms routes, spawns workers.
    pub fn build(self) -> io::Result<Server> {
        let max_fd = raise_fd_limit()? as usize;

        let workers_count = match self.server_limits.workers {
            0 => std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(2),
            count => count,
        };
        let max_fd_per_thread = (max_fd / workers_count).max(1);

        log::info!(
            "using {} workers, maximum {} sockets per worker",
            workers_count,
            max_fd_per_thread
        );

        let (shutdown_rd, shutdown_wr) = poll::wake_pipe()?;
        install_signal_policy(shutdown_wr.as_raw_fd());

        let backlog = match self.server_limits.backlog {
            0 => workers_count * max_fd_per_thread,
            backlog => backlog,
        };
        let listener = bind_listener(self.addr, backlog)?;
        let local_addr = listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener has no socket address"))?;

        let router = Arc::new(Router::build(self.routes));

        let config = WorkerConfig {
            limits: self.conn_limits,
            max_fd,
            max_fd_per_thread,
        };
        let mut workers = Vec::with_capacity(workers_count);
        for index in 0..workers_count {
            match Worker::spawn(index, router.clone(), config.clone()) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    for worker in &workers {
                        worker.request_stop();
                    }
                    for worker in workers {
                        worker.join();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Server {
            listener,
            local_addr,
            workers,
            router,
            dir_watch: self.dir_watch,
            shutdown_rd,
            shutdown_wr: Arc::new(shutdown_wr),
        })
    }
}

fn bind_listener(addr: SocketAddr, backlog: usize) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_linger(Some(Duration::from_secs(1)))?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as usize) as i32)?;
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Soft fd limit to the hard limit, or eight-fold when unlimited; returns
/// the resulting soft limit, which sizes the slot tables.
fn raise_fd_limit() -> io::Result<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } < 0 {
        return Err(io::Error::last_os_error());
    }

    if limit.rlim_max == libc::RLIM_INFINITY {
        limit.rlim_cur = limit.rlim_cur.saturating_mul(8);
    } else if limit.rlim_cur < limit.rlim_max {
        limit.rlim_cur = limit.rlim_max;
    }

    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(limit.rlim_cur)
}

// The write end of the newest server's shutdown pipe; what the SIGINT
// handler is allowed to touch.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(_: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        // write(2) is async-signal-safe; one byte wakes the acceptor.
        unsafe { libc::write(fd, b"\0".as_ptr() as *const libc::c_void, 1) };
    }
}

fn install_signal_policy(pipe_wr: RawFd) {
    SIGNAL_PIPE.store(pipe_wr, Ordering::Relaxed);

    let handler: extern "C" fn(libc::c_int) = forward_signal;
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}
