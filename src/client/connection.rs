//! Engine-level client connection: one keep-alive socket to one `host:port`.
//!
//! Requests submitted to the same connection are serialized in submission
//! order. The socket is opened on first use, kept open while the peer allows
//! it, and reopened once transparently when a reused socket turns out to have
//! been closed by the peer in the meantime. That retry is limited to
//! idempotent methods, since the peer may have acted on the first copy.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::InboundRequest;
use super::response::{self, ClientResponse};
use crate::dns::DnsResolver;
use crate::error::{Error, Result};
use crate::http::Method;
use crate::server::{DEFAULT_TIMEOUT, MAX_REQUEST_SIZE};

#[derive(Debug, Clone, Copy)]
struct Settings {
    timeout: Duration,
    max_body_size: usize,
}

type Slot = Arc<tokio::sync::Mutex<Option<TcpStream>>>;

pub(crate) struct HttpConnection {
    handle: Handle,
    dns: Arc<DnsResolver>,
    host: String,
    port: u16,
    stream: Slot,
    settings: Mutex<Settings>,
}

impl HttpConnection {
    pub(crate) fn new(handle: Handle, dns: Arc<DnsResolver>, host: &str, port: u16) -> Self {
        Self {
            handle,
            dns,
            host: host.to_owned(),
            port,
            stream: Arc::new(tokio::sync::Mutex::new(None)),
            settings: Mutex::new(Settings {
                timeout: DEFAULT_TIMEOUT,
                max_body_size: MAX_REQUEST_SIZE,
            }),
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn set_timeout(&self, timeout: Duration) {
        self.lock_settings().timeout = timeout;
    }

    pub(crate) fn set_max_body_size(&self, max_bytes: usize) {
        self.lock_settings().max_body_size = max_bytes;
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `request` on this connection. Its completion runs on the loop
    /// even if the connection is dropped first.
    pub(crate) fn submit(&self, request: InboundRequest, method: Method, target: &str) {
        let wire = encode(&method, target, &self.host_header(), &request);
        let exchange = Exchange {
            dns: Arc::clone(&self.dns),
            host: self.host.clone(),
            port: self.port,
            stream: Arc::clone(&self.stream),
            settings: *self.lock_settings(),
            expects_body: method.expects_response_body(),
            retry_stale: method.is_idempotent(),
        };
        debug!(
            host = %self.host,
            port = self.port,
            method = %method,
            request_target = target,
            "request queued"
        );

        self.handle.spawn(async move {
            let outcome = exchange.run(wire).await;
            request.complete(outcome);
        });
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Serializes the request line, output headers and body.
fn encode(method: &Method, target: &str, host: &str, request: &InboundRequest) -> Bytes {
    let body = request.output_body();
    let mut headers = request.output_headers().clone();
    if !headers.contains("host") {
        headers.insert("Host", host);
    }
    let sends_body = !body.is_empty() || matches!(method, Method::Post | Method::Put | Method::Patch);
    if sends_body && !headers.contains("content-length") {
        headers.insert("Content-Length", body.len().to_string());
    }

    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + body.len());
    buf.put(format!("{method} {target} HTTP/1.1\r\n").as_bytes());
    headers.write_to(&mut buf);
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// Everything one queued request needs, detached from the connection.
struct Exchange {
    dns: Arc<DnsResolver>,
    host: String,
    port: u16,
    stream: Slot,
    settings: Settings,
    expects_body: bool,
    retry_stale: bool,
}

impl Exchange {
    async fn run(self, wire: Bytes) -> Result<ClientResponse> {
        let mut slot = self.stream.lock().await;
        let reused = slot.is_some();

        match self.attempt(&mut slot, &wire).await {
            Err(e @ (Error::ConnectionClosed | Error::Io(_))) if reused && self.retry_stale => {
                debug!(host = %self.host, error = %e, "kept-alive connection went stale — reconnecting");
                self.attempt(&mut slot, &wire).await
            }
            outcome => outcome,
        }
    }

    async fn attempt(&self, slot: &mut Option<TcpStream>, wire: &[u8]) -> Result<ClientResponse> {
        tokio::time::timeout(self.settings.timeout, self.exchange(slot, wire))
            .await
            .unwrap_or(Err(Error::TimedOut))
    }

    /// Takes the kept-alive socket (or opens one) and puts it back only if
    /// the response leaves it reusable.
    async fn exchange(&self, slot: &mut Option<TcpStream>, wire: &[u8]) -> Result<ClientResponse> {
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        stream.write_all(wire).await?;
        stream.flush().await?;
        let received =
            response::read_response(&mut stream, self.expects_body, self.settings.max_body_size)
                .await?;

        if received.reusable {
            *slot = Some(stream);
        } else {
            trace!(host = %self.host, "connection not reusable — closing");
        }
        Ok(received.response)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addrs = self.dns.resolve(&self.host, self.port).await?;
        let stream = TcpStream::connect(&addrs[..]).await?;
        stream.set_nodelay(true)?;
        debug!(host = %self.host, port = self.port, peer = ?stream.peer_addr().ok(), "connected");
        Ok(stream)
    }
}
