//! strand_web - reactor-per-core HTTP server for small, fast services
//!
//! A connection-scheduling core in the classic shape: one acceptor thread
//! feeding accepted sockets round-robin to one epoll-driven worker per CPU,
//! each connection driven by a cooperative coroutine that yields whenever
//! its socket would block.
//!
//! # Design
//!
//! - **One worker per CPU** - a worker owns its connections for their whole
//!   life; there is no locking on the hot path.
//! - **Cooperative coroutines** - one per active connection, resumed only
//!   on readiness; read/write interest follows what the coroutine is
//!   blocked on.
//! - **Pre-allocated per-connection buffers** - a slot's response buffer is
//!   allocated once and reused by every request it serves.
//! - **Tick-based expiry** - idle keep-alive connections are reaped from a
//!   per-worker expiry queue after a configurable number of idle ticks.
//! - **Prefix-trie routing** - handlers register under URL prefixes; the
//!   longest match wins.
//!
//! # Quick Start
//!
//! ```no_run
//! use strand_web::{Request, Response, RouteHandler, Server, StatusCode};
//!
//! struct Hello;
//!
//! impl RouteHandler for Hello {
//!     fn handle(&self, _: &Request, resp: &mut Response) -> StatusCode {
//!         resp.body("Hello, world!");
//!         StatusCode::Ok
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080")
//!         .route("/", Hello)
//!         .build()?
//!         .run()
//! }
//! ```
//!
//! `run()` blocks on the accept loop until SIGINT or a
//! [`ShutdownHandle`] fires, then tears everything down abruptly:
//! workers are released and joined, live connections closed.
//!
//! # Platform
//!
//! Linux only: the readiness core is built directly on epoll.

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod acceptor;
    pub(crate) mod connection;
    pub(crate) mod coro;
    pub(crate) mod poll;
    pub(crate) mod server_impl;
    pub(crate) mod worker;
}
pub(crate) mod errors;
pub mod limits;
pub mod map;
pub mod trie;

pub use crate::{
    http::{
        query,
        request::Request,
        response::Response,
        types::{mime_type_for_path, Method, StatusCode, Version},
    },
    server::{
        acceptor::DirWatch,
        server_impl::{ParseFlags, RouteHandler, Server, ServerBuilder, ShutdownHandle},
    },
};
