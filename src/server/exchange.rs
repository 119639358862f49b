//! The handler's view of one request/response cycle.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::http::{Headers, Method, Request, Response, StatusCode};

/// A request delivered to a [`Handler`](super::Handler), together with the
/// right to answer it.
///
/// The reply is a one-shot hand-off back to the connection: it may be sent
/// from inside the handler, or later from another callback or thread after
/// moving the `ServerRequest` there. Dropping it without replying answers
/// `500 Internal Server Error`.
#[derive(Debug)]
pub struct ServerRequest {
    request: Request,
    peer: SocketAddr,
    reply: oneshot::Sender<Response>,
}

impl ServerRequest {
    pub(crate) fn new(request: Request, peer: SocketAddr) -> (Self, oneshot::Receiver<Response>) {
        let (reply, pending) = oneshot::channel();
        (
            Self {
                request,
                peer,
                reply,
            },
            pending,
        )
    }

    /// The parsed request, body included.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// The target path, without the query string.
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Everything after the `?`, if there was one.
    pub fn query_string(&self) -> Option<&str> {
        self.request.query_string()
    }

    /// The request's header fields.
    pub fn headers(&self) -> &Headers {
        self.request.headers()
    }

    /// The fully buffered body, de-chunked if it was sent chunked.
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Address of the connected client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Deserializes the request body as JSON.
    ///
    /// # Errors
    ///
    /// Whatever `serde_json` reports for the body.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// Sends `response`. If the client has gone away in the meantime the
    /// response is discarded.
    pub fn reply(self, response: Response) {
        if self.reply.send(response).is_err() {
            debug!(peer = %self.peer, path = %self.request.path(), "client gone before reply");
        }
    }

    /// Replies with `status` and a plain-text body.
    pub fn send_reply(self, status: StatusCode, body: impl Into<String>) {
        self.reply(Response::new(status).body(body));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &[u8]) -> Request {
        let (request, offset) = Request::parse(raw).unwrap().unwrap();
        request.with_body(Bytes::copy_from_slice(&raw[offset..]))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn reply_reaches_the_connection() {
        let (exchange, pending) = ServerRequest::new(request(b"GET /ping HTTP/1.1\r\n\r\n"), peer());
        assert_eq!(exchange.path(), "/ping");
        assert_eq!(exchange.peer_addr(), peer());

        exchange.send_reply(StatusCode::Ok, "pong");
        let response = pending.await.unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn reply_from_another_thread() {
        let (exchange, pending) = ServerRequest::new(request(b"GET /slow HTTP/1.1\r\n\r\n"), peer());
        std::thread::spawn(move || exchange.send_reply(StatusCode::Accepted, ""))
            .join()
            .unwrap();
        assert_eq!(pending.await.unwrap().status(), StatusCode::Accepted);
    }

    #[tokio::test]
    async fn dropping_without_reply_is_observable() {
        let (exchange, pending) = ServerRequest::new(request(b"GET / HTTP/1.1\r\n\r\n"), peer());
        drop(exchange);
        assert!(pending.await.is_err());
    }

    #[test]
    fn json_body() {
        #[derive(serde::Deserialize)]
        struct Ping {
            seq: u32,
        }

        let raw = b"POST /ping HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"seq\":42}";
        let (exchange, _pending) = ServerRequest::new(request(raw), peer());
        let ping: Ping = exchange.json().unwrap();
        assert_eq!(ping.seq, 42);
    }
}
