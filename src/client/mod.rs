//! HTTP client side: outbound connections and their request wrappers.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, OrFatal, Result};
use crate::event_loop::EventLoop;
use crate::http::Method;

pub(crate) mod connection;
mod request;
mod response;
mod uri;

pub use request::{CompletionCallback, InboundRequest, Phase};
pub use response::ClientResponse;
pub use uri::Uri;

use connection::HttpConnection;

/// A client connection to the `host:port` named by a URI.
///
/// Holds a shared owner of its [`EventLoop`], so the loop lives at least as
/// long as the connection. Completions run on the loop thread; requests still
/// in flight when the connection is dropped complete normally.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use evbridge::{EventLoop, InboundRequest, Method, OutboundConnection, Uri};
///
/// let event_loop = Arc::new(EventLoop::new());
/// let uri = Uri::parse("http://127.0.0.1:8080/").unwrap();
/// let connection = OutboundConnection::new(Arc::clone(&event_loop), &uri);
///
/// let exit = event_loop.exit_handle();
/// let request = InboundRequest::new(move |done| {
///     println!("{} {:?}", done.response_code(), done.response().map(|r| r.body()));
///     exit.request_exit();
/// });
/// connection.make_request(request, Method::Get, "/ping");
/// event_loop.run_forever();
/// ```
pub struct OutboundConnection {
    // Dropped before the loop.
    connection: HttpConnection,
    event_loop: Arc<EventLoop>,
}

impl OutboundConnection {
    /// Binds a connection to the host and port of `uri`.
    ///
    /// See [`Uri::effective_port`] for the port policy. A port of 0 is not
    /// rejected here; requests on such a connection complete with an error.
    ///
    /// # Panics
    ///
    /// Fatal if `uri` has no scheme or no host.
    pub fn new(event_loop: Arc<EventLoop>, uri: &Uri) -> Self {
        Self::try_new(event_loop, uri).or_fatal()
    }

    fn try_new(event_loop: Arc<EventLoop>, uri: &Uri) -> Result<Self> {
        let invalid = |reason| Error::InvalidUri {
            uri: uri.to_string(),
            reason,
        };
        uri.scheme().ok_or_else(|| invalid("missing scheme"))?;
        let host = uri.host().ok_or_else(|| invalid("missing host"))?;
        let port = uri.effective_port();

        debug!(host, port, "outbound connection created");
        Ok(Self {
            connection: event_loop.new_http_connection(host, port),
            event_loop,
        })
    }

    /// Host this connection talks to.
    pub fn host(&self) -> &str {
        self.connection.host()
    }

    /// Port this connection talks to; 0 when none could be derived.
    pub fn port(&self) -> u16 {
        self.connection.port()
    }

    /// The loop completions run on.
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Per-attempt deadline covering connect, send and receive. Applies to
    /// requests made after the call.
    pub fn set_timeout(&self, timeout: Duration) {
        self.connection.set_timeout(timeout);
    }

    /// Largest accepted response body. Larger responses complete with an error.
    pub fn set_max_body_size(&self, max_bytes: usize) {
        self.connection.set_max_body_size(max_bytes);
    }

    /// Sends `method target` over this connection. `request` supplies the
    /// output headers and body and receives the outcome.
    ///
    /// # Panics
    ///
    /// Fatal if `target` is empty or contains whitespace or control
    /// characters.
    pub fn make_request(&self, request: InboundRequest, method: Method, target: &str) {
        validate_target(target).or_fatal();
        self.connection.submit(request, method, target);
    }
}

impl Drop for OutboundConnection {
    fn drop(&mut self) {
        debug!(host = %self.connection.host(), port = self.connection.port(), "outbound connection dropped");
    }
}

fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() || target.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidTarget {
            target: target.to_owned(),
        });
    }
    Ok(())
}
