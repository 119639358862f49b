//! Serves `/ping` and pings itself once a second.
//!
//! ```sh
//! RUST_LOG=evbridge=debug cargo run --example ping
//! ```
//!
//! Stop with Ctrl-C.

use std::sync::Arc;

use evbridge::{
    EventLoop, HttpServer, InboundRequest, Method, OutboundConnection, Response, StatusCode, Uri,
    WatchedEvent,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let event_loop = Arc::new(EventLoop::new());

    let server = HttpServer::new(&event_loop);
    let addr = server.bind("127.0.0.1", 0);
    server.add_handler("/ping", |request| {
        let reply = serde_json::json!({ "pong": true, "peer": request.peer_addr().to_string() });
        match Response::new(StatusCode::Ok).json(&reply) {
            Ok(response) => request.reply(response),
            Err(e) => request.send_reply(StatusCode::InternalServerError, e.to_string()),
        }
    });
    info!(address = %addr, "serving /ping");

    let uri = match Uri::parse(&format!("http://{addr}/ping")) {
        Ok(uri) => uri,
        Err(e) => {
            warn!(error = %e, "bad self URI");
            return;
        }
    };
    let connection = Arc::new(OutboundConnection::new(Arc::clone(&event_loop), &uri));

    let pinger = {
        let connection = Arc::clone(&connection);
        let target = uri.request_target().to_owned();
        WatchedEvent::interval(&event_loop, move |_, _| {
            let request = InboundRequest::new(|done| match done.response() {
                Some(response) => info!(
                    status = response.status(),
                    body = %String::from_utf8_lossy(response.body()),
                    "ping answered"
                ),
                None => warn!(error = ?done.error(), "ping failed"),
            });
            connection.make_request(request, Method::Get, &target);
        })
    };
    pinger.arm(1.0);

    event_loop.run_forever();
    info!("shutting down");

    drop(pinger);
    drop(server);
    drop(connection);
}
