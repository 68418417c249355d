use strand_web::{Request, Response, RouteHandler, Server, StatusCode};

struct Hello;

impl RouteHandler for Hello {
    fn handle(&self, req: &Request, resp: &mut Response) -> StatusCode {
        match req.query(b"name") {
            Some(name) => {
                resp.body(b"Hello, ");
                resp.append(name).append(b"!");
            }
            None => {
                resp.body("Hello, world!");
            }
        }
        StatusCode::Ok
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    Server::builder()
        .bind("127.0.0.1:8080")
        .route("/", Hello)
        .build()?
        .run()
}
