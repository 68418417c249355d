//! End-to-end scenarios against live servers on ephemeral ports.

use std::{
    collections::HashSet,
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use strand_web::{
    limits::{ConnLimits, ServerLimits},
    Request, Response, RouteHandler, Server, ServerBuilder, ShutdownHandle, StatusCode,
};

// Compressed time: a tick every 25 ms, reap after 3 idle ticks.
fn fast_limits() -> ConnLimits {
    ConnLimits {
        keep_alive_timeout: 3,
        timer_granularity: Duration::from_millis(25),
        ..ConnLimits::default()
    }
}

struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    join: thread::JoinHandle<std::io::Result<()>>,
}

fn start<F>(configure: F) -> TestServer
where
    F: FnOnce(ServerBuilder) -> ServerBuilder,
{
    let builder = Server::builder()
        .bind("127.0.0.1:0")
        .connection_limits(fast_limits());
    let server = configure(builder).build().expect("server init");

    let addr = server.local_addr();
    let handle = server.shutdown_handle();
    let join = thread::spawn(move || server.run());

    TestServer { addr, handle, join }
}

impl TestServer {
    fn stop(self) {
        self.handle.shutdown();
        self.join.join().expect("run thread").expect("clean exit");
    }
}

#[derive(Clone)]
struct Counting {
    hits: Arc<AtomicUsize>,
}

impl Counting {
    fn new() -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RouteHandler for Counting {
    fn handle(&self, _: &Request, resp: &mut Response) -> StatusCode {
        self.hits.fetch_add(1, Ordering::SeqCst);
        resp.body("ok");
        StatusCode::Ok
    }
}

/// Answers with the worker thread's id and records it.
#[derive(Clone)]
struct ThreadTag {
    seen: Arc<Mutex<HashSet<thread::ThreadId>>>,
}

impl ThreadTag {
    fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl RouteHandler for ThreadTag {
    fn handle(&self, _: &Request, resp: &mut Response) -> StatusCode {
        let id = thread::current().id();
        self.seen.lock().unwrap().insert(id);
        resp.body(format!("{:?}", id));
        StatusCode::Ok
    }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

/// Reads one full response: head plus `Content-Length` bytes of body.
fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(head_end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let body_len: usize = head
                .split("content-length: ")
                .nth(1)
                .and_then(|rest| rest.split("\r\n").next())
                .and_then(|n| n.parse().ok())
                .expect("content-length header");

            if buf.len() >= head_end + 4 + body_len {
                return String::from_utf8_lossy(&buf[..head_end + 4 + body_len]).into_owned();
            }
        }

        let n = stream.read(&mut chunk).expect("read response");
        assert_ne!(n, 0, "connection closed mid-response");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn get(stream: &mut TcpStream, path: &str) -> String {
    write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).unwrap();
    read_response(stream)
}

/// Blocks until the peer closes; panics on more data or a timeout.
fn expect_eof(stream: &mut TcpStream) {
    let mut chunk = [0u8; 64];
    let n = stream.read(&mut chunk).expect("read until close");
    assert_eq!(n, 0, "expected the server to close the connection");
}

#[test]
fn cold_start_single_request() {
    let counting = Counting::new();
    let hits = counting.hits.clone();
    let server = start(|builder| builder.route("/", counting));

    let mut client = connect(server.addr);
    let reply = get(&mut client, "/");

    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Connection: keep-alive\r\n"));
    assert!(reply.ends_with("ok"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Stay idle; the worker reaps the connection after the timeout ticks.
    expect_eof(&mut client);

    server.stop();
}

#[test]
fn keep_alive_reuse() {
    let counting = Counting::new();
    let hits = counting.hits.clone();
    let server = start(|builder| builder.route("/", counting));

    let mut client = connect(server.addr);
    let first = get(&mut client, "/");
    let second = get(&mut client, "/again");

    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    server.stop();
}

#[test]
fn peer_hangup_without_sending() {
    let counting = Counting::new();
    let hits = counting.hits.clone();
    let server = start(|builder| builder.route("/", counting));

    let client = connect(server.addr);
    drop(client); // hang up before sending a byte

    // Give the worker a moment to see the hangup.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    server.stop();
}

#[test]
fn idle_connection_times_out() {
    let server = start(|builder| builder.route("/", Counting::new()));

    let mut client = connect(server.addr);
    // Never send anything; after keep_alive_timeout ticks the owning
    // worker closes the socket.
    expect_eof(&mut client);

    server.stop();
}

#[test]
fn round_robin_across_workers() {
    const WORKERS: usize = 2;

    let tag = ThreadTag::new();
    let seen = tag.seen.clone();
    let server = start(|builder| {
        builder
            .route("/", tag)
            .server_limits(ServerLimits {
                workers: WORKERS,
                ..ServerLimits::default()
            })
            // Connections idle while their siblings are being served; give
            // them a generous reap window so none dies mid-test.
            .connection_limits(ConnLimits {
                keep_alive_timeout: 120,
                timer_granularity: Duration::from_millis(25),
                ..ConnLimits::default()
            })
    });

    // Hold 4 connections per worker open at once.
    let mut clients: Vec<TcpStream> = (0..4 * WORKERS).map(|_| connect(server.addr)).collect();

    let mut tags = Vec::new();
    for client in &mut clients {
        let reply = get(client, "/");
        tags.push(reply.split("\r\n\r\n").nth(1).unwrap().to_string());
    }

    // Every worker took its share...
    assert_eq!(seen.lock().unwrap().len(), WORKERS);

    // ...and a connection never migrates: a second request on the same
    // socket is served by the same worker thread.
    for (client, tag) in clients.iter_mut().zip(&tags) {
        let reply = get(client, "/");
        assert_eq!(reply.split("\r\n\r\n").nth(1).unwrap(), tag);
    }

    // Round-robin spreads evenly: each worker appears for exactly half
    // the connections.
    let mut per_tag = std::collections::HashMap::new();
    for tag in &tags {
        *per_tag.entry(tag.clone()).or_insert(0usize) += 1;
    }
    assert_eq!(per_tag.len(), WORKERS);
    for (_, count) in per_tag {
        assert_eq!(count, 4);
    }

    server.stop();
}

#[test]
fn shutdown_with_live_connections() {
    let server = start(|builder| builder.route("/", Counting::new()));

    let mut clients: Vec<TcpStream> = (0..4).map(|_| connect(server.addr)).collect();
    for client in &mut clients {
        let reply = get(client, "/");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    // stop() raises shutdown and joins the run thread; a hung worker
    // would hang the join.
    server.stop();

    // Workers closed every live connection on their way out.
    for client in &mut clients {
        let mut chunk = [0u8; 64];
        match client.read(&mut chunk) {
            Ok(n) => assert_eq!(n, 0),
            Err(_) => {} // reset is also an acceptable abrupt goodbye
        }
    }
}

#[test]
fn unknown_path_is_404() {
    let server = start(|builder| builder.route("/api", Counting::new()));

    let mut client = connect(server.addr);
    let reply = get(&mut client, "/elsewhere");

    assert!(reply.starts_with("HTTP/1.1 404 Not found\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.contains("could not be found"));

    server.stop();
}

#[test]
fn oversized_request_head_is_rejected() {
    let server = start(|builder| builder.route("/", Counting::new()));

    let mut client = connect(server.addr);
    // A header that never terminates, larger than max_request_size.
    write!(client, "GET / HTTP/1.1\r\nX-Filler: ").unwrap();
    let filler = vec![b'a'; 10 * 1024];
    client.write_all(&filler).unwrap();

    let reply = read_response(&mut client);
    assert!(reply.starts_with("HTTP/1.1 413 Request too large\r\n"));

    server.stop();
}

#[test]
fn query_parameters_reach_the_handler() {
    struct Echo;

    impl RouteHandler for Echo {
        fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
            match req.query(b"q") {
                Some(q) => {
                    resp.body(q);
                    StatusCode::Ok
                }
                None => StatusCode::BadRequest,
            }
        }
    }

    let server = start(|builder| builder.route("/echo", Echo));

    let mut client = connect(server.addr);
    let reply = get(&mut client, "/echo?q=needle&other=x");
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.ends_with("needle"));

    let denied = get(&mut client, "/echo");
    assert!(denied.starts_with("HTTP/1.1 400 Bad request\r\n"));

    server.stop();
}
