//! HTTP server bound to an [`EventLoop`].
//!
//! An [`HttpServer`] owns one HTTP endpoint: its listening sockets, the
//! connections accepted on them, and the [`Handler`] records that map exact
//! request paths to callbacks. Handlers run on the loop thread.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Error, OrFatal, Result};
use crate::event_loop::EventLoop;
use crate::http::{Request, Response, StatusCode};

mod connection;
mod exchange;

pub use connection::MAX_REQUEST_SIZE;
pub use exchange::ServerRequest;

/// How long a connection may sit idle between reads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(50);

/// Callback receiving each request routed to a [`Handler`].
pub type HandlerCallback = Arc<dyn Fn(ServerRequest) + Send + Sync + 'static>;

/// An exact request path paired with its callback. Owned by its server.
pub struct Handler {
    path: String,
    callback: HandlerCallback,
}

impl Handler {
    fn new(path: &str, callback: HandlerCallback) -> Self {
        Self {
            path: path.to_owned(),
            callback,
        }
    }

    /// The exact path this handler serves.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Trampoline from the endpoint back into the registered callback.
    fn dispatch(&self, request: ServerRequest) {
        (self.callback)(request);
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    timeout: Duration,
    max_body_size: usize,
}

/// State shared between the server and its connection tasks.
pub(crate) struct Shared {
    handlers: RwLock<Vec<Arc<Handler>>>,
    fallback: RwLock<Option<Arc<Handler>>>,
    settings: RwLock<Settings>,
}

impl Shared {
    fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The exact-path handler for `path`, else the default handler.
    fn find(&self, path: &str) -> Option<Arc<Handler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handlers.iter().find(|h| h.path == path) {
            return Some(Arc::clone(handler));
        }
        drop(handlers);
        self.fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn dispatch(&self, request: Request, peer: SocketAddr) -> Response {
        let path = request.path().to_owned();
        let Some(handler) = self.find(&path) else {
            debug!(peer = %peer, path = %path, "no handler — sending 404");
            return Response::new(StatusCode::NotFound).body("Not Found");
        };

        debug!(
            peer = %peer,
            method = %request.method(),
            path = %path,
            "dispatching request"
        );
        let (exchange, pending) = ServerRequest::new(request, peer);
        handler.dispatch(exchange);

        match pending.await {
            Ok(response) => response,
            Err(_) => {
                warn!(peer = %peer, path = %path, "request dropped without a reply — sending 500");
                Response::new(StatusCode::InternalServerError).body("Internal Server Error")
            }
        }
    }
}

struct Listener {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Engine-level HTTP endpoint: listeners plus the routing table.
pub(crate) struct HttpEndpoint {
    shared: Arc<Shared>,
    listeners: Mutex<Vec<Listener>>,
}

impl HttpEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                handlers: RwLock::new(Vec::new()),
                fallback: RwLock::new(None),
                settings: RwLock::new(Settings {
                    timeout: DEFAULT_TIMEOUT,
                    max_body_size: MAX_REQUEST_SIZE,
                }),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn bind(&self, event_loop: &EventLoop, address: &str, port: u16) -> Result<SocketAddr> {
        let bind_error = |source| Error::Bind {
            addr: format!("{address}:{port}"),
            source,
        };
        let std_listener = StdTcpListener::bind((address, port)).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let listener = event_loop
            .enter(|| TcpListener::from_std(std_listener))
            .map_err(bind_error)?;
        let addr = listener.local_addr()?;

        let task = event_loop.spawn(accept_loop(listener, addr, Arc::clone(&self.shared)));
        self.lock_listeners().push(Listener { addr, task });
        Ok(addr)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_handler(&self, path: &str, callback: HandlerCallback) -> bool {
        let mut handlers = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|h| h.path == path) {
            return false;
        }
        handlers.push(Arc::new(Handler::new(path, callback)));
        true
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        self.lock_listeners().drain(..).map(|l| l.task).collect()
    }

    fn clear_handlers(&self) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shared
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn accept_loop(listener: TcpListener, addr: SocketAddr, shared: Arc<Shared>) {
    info!(address = %addr, "listening");
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    let shared = Arc::clone(&shared);
                    connections.spawn(async move {
                        if let Err(e) = connection::serve(stream, peer, shared).await {
                            warn!(peer = %peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    error!(address = %addr, error = %e, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

/// An HTTP/1.1 server whose listeners and handlers live on an [`EventLoop`].
///
/// Requests are routed by exact path. At most one handler exists per path: a
/// second registration for the same path is refused. Requests without a
/// matching handler go to the default handler if one is set, else receive
/// `404 Not Found`.
///
/// Dropping the server closes its listening sockets and connections, then
/// releases every handler.
///
/// # Examples
///
/// ```rust,no_run
/// use evbridge::{EventLoop, HttpServer, StatusCode};
///
/// let event_loop = EventLoop::new();
/// let server = HttpServer::new(&event_loop);
/// server.bind("127.0.0.1", 8080);
/// server.add_handler("/ping", |request| request.send_reply(StatusCode::Ok, "pong"));
/// event_loop.run_forever();
/// ```
pub struct HttpServer<'a> {
    event_loop: &'a EventLoop,
    endpoint: HttpEndpoint,
}

impl<'a> HttpServer<'a> {
    /// Creates a server with no listeners and no handlers.
    pub fn new(event_loop: &'a EventLoop) -> Self {
        Self {
            event_loop,
            endpoint: event_loop.new_http_endpoint(),
        }
    }

    /// Starts listening on `address:port` and returns the bound address (useful
    /// with port 0). May be called more than once to listen on several sockets.
    ///
    /// # Panics
    ///
    /// Fatal if the socket cannot be bound.
    pub fn bind(&self, address: &str, port: u16) -> SocketAddr {
        self.endpoint.bind(self.event_loop, address, port).or_fatal()
    }

    /// Every address this server listens on, in bind order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoint.lock_listeners().iter().map(|l| l.addr).collect()
    }

    /// Routes requests for exactly `path` to `callback`.
    ///
    /// Returns `false`, leaving the existing handler in place, if `path`
    /// already has one.
    pub fn add_handler<F>(&self, path: &str, callback: F) -> bool
    where
        F: Fn(ServerRequest) + Send + Sync + 'static,
    {
        let added = self.endpoint.add_handler(path, Arc::new(callback));
        if !added {
            debug!(path, "handler already registered");
        }
        added
    }

    /// Receives requests no exact-path handler matched. Replaces any previous
    /// default handler.
    pub fn set_default_handler<F>(&self, callback: F)
    where
        F: Fn(ServerRequest) + Send + Sync + 'static,
    {
        let handler = Arc::new(Handler::new("", Arc::new(callback)));
        *self
            .endpoint
            .shared
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Number of exact-path handlers.
    pub fn handler_count(&self) -> usize {
        self.endpoint
            .shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Idle time after which a connection is closed. Applies to requests
    /// read after the call.
    pub fn set_timeout(&self, timeout: Duration) {
        self.update_settings(|s| s.timeout = timeout);
    }

    /// Largest accepted request body; larger ones receive `413`.
    pub fn set_max_body_size(&self, max_bytes: usize) {
        self.update_settings(|s| s.max_body_size = max_bytes);
    }

    fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        let mut settings = self
            .endpoint
            .shared
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut settings);
    }
}

impl Drop for HttpServer<'_> {
    fn drop(&mut self) {
        let tasks = self.endpoint.take_tasks();
        let listeners = tasks.len();
        self.event_loop.drain(tasks);
        self.endpoint.clear_handlers();
        debug!(listeners, "http server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    /// Sends `raw` to `addr` and returns everything the server writes back.
    fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    /// Runs the loop on a helper thread while `client` talks to the server.
    fn with_running_loop<R>(event_loop: &EventLoop, client: impl FnOnce() -> R) -> R {
        thread::scope(|s| {
            let runner = s.spawn(|| event_loop.run_forever());
            let result = client();
            event_loop.request_exit();
            runner.join().unwrap();
            result
        })
    }

    #[test]
    fn duplicate_path_is_refused() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);

        assert!(server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "first")));
        assert!(!server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "second")));
        assert!(server.add_handler("/ping/", |r| r.send_reply(StatusCode::Ok, "slash")));
        assert_eq!(server.handler_count(), 2);
    }

    #[test]
    fn duplicate_keeps_first_handler() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "first"));
        server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "second"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        });
        assert!(response.ends_with("\r\n\r\nfirst"));
    }

    #[test]
    fn bind_reports_ephemeral_port() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addrs(), vec![addr]);
    }

    #[test]
    fn port_is_free_again_after_drop() {
        let event_loop = EventLoop::new();
        let first = HttpServer::new(&event_loop);
        let addr = first.bind("127.0.0.1", 0);
        drop(first);

        let second = HttpServer::new(&event_loop);
        assert_eq!(second.bind("127.0.0.1", addr.port()), addr);
    }

    #[test]
    #[should_panic(expected = "failed to bind")]
    fn bind_conflict_is_fatal() {
        let event_loop = EventLoop::new();
        let first = HttpServer::new(&event_loop);
        let addr = first.bind("127.0.0.1", 0);

        let second = HttpServer::new(&event_loop);
        second.bind("127.0.0.1", addr.port());
    }

    #[test]
    fn serves_registered_path() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/ping", |r| {
            assert_eq!(r.query_string(), None);
            r.send_reply(StatusCode::Ok, "pong")
        });

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        });
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("Content-Length: 4\r\n\r\npong"));
    }

    #[test]
    fn unknown_path_is_404_without_default_handler() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "pong"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n")
        });
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn default_handler_catches_unmatched_paths() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.set_default_handler(|r| {
            let path = r.path().to_owned();
            r.send_reply(StatusCode::Ok, path)
        });

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /anything?x=1 HTTP/1.1\r\nConnection: close\r\n\r\n")
        });
        assert!(response.ends_with("\r\n\r\n/anything"));
    }

    #[test]
    fn dropped_request_gets_500() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/forget", drop);

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /forget HTTP/1.1\r\nConnection: close\r\n\r\n")
        });
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn body_is_delivered_and_oversize_rejected() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.set_max_body_size(8);
        server.add_handler("/echo", |r| {
            let body = r.body().to_vec();
            r.reply(Response::new(StatusCode::Ok).body_bytes(body))
        });

        let (small, large) = with_running_loop(&event_loop, || {
            (
                roundtrip(
                    addr,
                    "POST /echo HTTP/1.1\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
                ),
                roundtrip(
                    addr,
                    "POST /echo HTTP/1.1\r\nContent-Length: 9\r\nConnection: close\r\n\r\n123456789",
                ),
            )
        });
        assert!(small.ends_with("\r\n\r\nhello"));
        assert!(large.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[test]
    fn chunked_body_is_decoded_before_the_next_request() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/echo", |r| {
            let body = r.body().to_vec();
            r.reply(Response::new(StatusCode::Ok).body_bytes(body))
        });

        let response = with_running_loop(&event_loop, || {
            roundtrip(
                addr,
                "POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                 5\r\nhello\r\n0\r\n\r\n\
                 GET /echo HTTP/1.1\r\nConnection: close\r\n\r\n",
            )
        });
        assert!(response.contains("Content-Length: 5\r\n\r\nhello"));
        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(!response.contains("400 Bad Request"));
    }

    #[test]
    fn chunked_with_content_length_gets_400() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/echo", |r| r.send_reply(StatusCode::Ok, "reached"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(
                addr,
                "POST /echo HTTP/1.1\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\n\
                 0\r\n\r\n",
            )
        });
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(!response.contains("reached"));
    }

    #[test]
    fn oversize_chunked_body_gets_413() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.set_max_body_size(8);
        server.add_handler("/echo", |r| r.send_reply(StatusCode::Ok, "reached"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(
                addr,
                "POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                 5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n",
            )
        });
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[test]
    fn handler_content_length_is_not_duplicated() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/short", |r| {
            r.reply(
                Response::new(StatusCode::Ok)
                    .header("Content-Length", "2")
                    .body("okay"),
            )
        });

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "GET /short HTTP/1.1\r\nConnection: close\r\n\r\n")
        });
        assert_eq!(response.matches("Content-Length").count(), 1);
        assert!(response.ends_with("Content-Length: 4\r\n\r\nokay"));
    }

    #[test]
    fn pipelined_requests_on_one_connection() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/a", |r| r.send_reply(StatusCode::Ok, "A"));
        server.add_handler("/b", |r| r.send_reply(StatusCode::Ok, "B"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(
                addr,
                "GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
            )
        });
        let a = response.find("\r\n\r\nA").unwrap();
        let b = response.find("\r\n\r\nB").unwrap();
        assert!(a < b);
    }

    #[test]
    fn head_request_has_no_body() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);
        server.add_handler("/ping", |r| r.send_reply(StatusCode::Ok, "pong"));

        let response = with_running_loop(&event_loop, || {
            roundtrip(addr, "HEAD /ping HTTP/1.1\r\nConnection: close\r\n\r\n")
        });
        assert!(response.ends_with("Content-Length: 4\r\n\r\n"));
    }

    #[test]
    fn malformed_request_gets_400() {
        let event_loop = EventLoop::new();
        let server = HttpServer::new(&event_loop);
        let addr = server.bind("127.0.0.1", 0);

        let response = with_running_loop(&event_loop, || roundtrip(addr, "NOT HTTP\r\n\r\n"));
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
