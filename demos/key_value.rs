//! In-memory key-value store: `/set?key=k&value=v` and `/get?key=k`.

use std::sync::Mutex;
use strand_web::{map::BucketMap, Request, Response, RouteHandler, Server, StatusCode};

struct Store {
    entries: Mutex<BucketMap<Vec<u8>, Vec<u8>>>,
}

struct SetHandler(&'static Store);
struct GetHandler(&'static Store);

impl RouteHandler for SetHandler {
    fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
        let (key, value) = match (req.query(b"key"), req.query(b"value")) {
            (Some(key), Some(value)) => (key, value),
            _ => return StatusCode::BadRequest,
        };

        let mut entries = match self.0.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return StatusCode::InternalError,
        };
        entries.add(key.to_vec(), value.to_vec());

        resp.body(b"stored\n");
        StatusCode::Ok
    }
}

impl RouteHandler for GetHandler {
    fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
        let key = match req.query(b"key") {
            Some(key) => key,
            None => return StatusCode::BadRequest,
        };

        let entries = match self.0.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return StatusCode::InternalError,
        };
        match entries.find(key) {
            Some(value) => {
                resp.body(value);
                resp.append(b"\n");
                StatusCode::Ok
            }
            None => StatusCode::NotFound,
        }
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let store: &'static Store = Box::leak(Box::new(Store {
        entries: Mutex::new(BucketMap::new(64)),
    }));

    Server::builder()
        .bind("127.0.0.1:8080")
        .route("/set", SetHandler(store))
        .route("/get", GetHandler(store))
        .build()?
        .run()
}
