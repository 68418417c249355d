//! Server configuration limits and timeouts
//!
//! Defaults are conservative: idle keep-alive connections are reaped after
//! fifteen one-second ticks, oversized requests are rejected before any
//! handler runs, and per-connection buffers start small and only grow to
//! what a route actually produces.
//!
//! # Examples
//!
//! ```no_run
//! use strand_web::{limits::ConnLimits, Server};
//! # use strand_web::{Request, Response, RouteHandler, StatusCode};
//! # struct Hello;
//! # impl RouteHandler for Hello {
//! #     fn handle(&self, _: &Request, resp: &mut Response) -> StatusCode {
//! #         resp.body(b"hi");
//! #         StatusCode::Ok
//! #     }
//! # }
//!
//! let server = Server::builder()
//!     .bind("127.0.0.1:8080")
//!     .route("/", Hello)
//!     .connection_limits(ConnLimits {
//!         keep_alive_timeout: 5, // reap idle connections sooner
//!         ..ConnLimits::default()
//!     })
//!     .build()
//!     .unwrap();
//! ```

use std::time::Duration;

/// Process-level knobs: thread fan-out and listen queueing.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker reactor threads (default: `0` = one per CPU).
    ///
    /// Each worker owns a disjoint set of connections for their whole
    /// lifetime; there is no cross-worker migration.
    pub workers: usize,

    /// Listen backlog (default: `0` = `workers * max_fd_per_thread`, the
    /// same head-room the per-worker accounting assumes).
    pub backlog: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            workers: 0,
            backlog: 0,

            _priv: (),
        }
    }
}

/// Per-connection limits and timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Idle ticks before a keep-alive connection is reaped (default: `15`).
    ///
    /// A tick is one timed-out readiness wait on the owning worker, so with
    /// the default [`timer_granularity`](Self::timer_granularity) this is
    /// roughly fifteen seconds of inactivity.
    pub keep_alive_timeout: u32,

    /// Length of one expiry tick (default: `1 second`).
    ///
    /// The worker's readiness wait uses this as its timeout whenever its
    /// expiry queue is non-empty. Mostly useful for compressing time in
    /// tests; production setups should leave it alone.
    pub timer_granularity: Duration,

    /// Maximum size of a request head in bytes (default: `8 KiB`).
    ///
    /// Requests that exceed this before their header terminator arrives are
    /// answered with `413` and the connection is closed.
    pub max_request_size: usize,

    /// Initial capacity of each slot's response buffer (default: `512`).
    ///
    /// The buffer is allocated once per slot and reused for every request
    /// on that slot; it grows to the largest response the slot has served
    /// and is never shrunk back.
    pub response_buffer_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            keep_alive_timeout: 15,
            timer_granularity: Duration::from_secs(1),
            max_request_size: 8 * 1024,
            response_buffer_capacity: 512,

            _priv: (),
        }
    }
}
