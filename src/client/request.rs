//! The completion wrapper for one outbound request/response cycle.

use std::fmt;

use tracing::debug;

use super::ClientResponse;
use crate::error::Error;
use crate::http::Headers;

/// Invoked exactly once, with the completed wrapper, when a submitted
/// request finishes.
pub type CompletionCallback = Box<dyn FnOnce(&InboundRequest) + Send + 'static>;

/// Where an [`InboundRequest`] is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, possibly submitted, not yet answered.
    Pending,
    /// The cycle finished; the outcome is readable.
    Completed,
}

/// One HTTP request/response cycle bound to a completion callback.
///
/// Built by the caller, given output headers and a body, then moved into
/// [`OutboundConnection::make_request`](super::OutboundConnection::make_request).
/// From then on the connection owns it: when the cycle finishes the wrapper
/// moves to [`Phase::Completed`], the callback runs once on the loop thread
/// with a reference to it, and the wrapper is dropped right after.
///
/// A wrapper dropped while still pending (never submitted, or its loop shut
/// down first) releases its state and its callback never runs.
///
/// # Examples
///
/// ```
/// use evbridge::InboundRequest;
///
/// let mut request = InboundRequest::new(|done| {
///     match done.error() {
///         Some(e) => eprintln!("request failed: {e}"),
///         None => println!("status {}", done.response_code()),
///     }
/// });
/// request.set_header("Accept", "text/plain");
/// ```
pub struct InboundRequest {
    phase: Phase,
    headers: Headers,
    body: Vec<u8>,
    response: Option<ClientResponse>,
    error: Option<Error>,
    callback: Option<CompletionCallback>,
}

impl InboundRequest {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(&InboundRequest) + Send + 'static,
    {
        Self {
            phase: Phase::Pending,
            headers: Headers::new(),
            body: Vec::new(),
            response: None,
            error: None,
            callback: Some(Box::new(callback)),
        }
    }

    /// Appends an output header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces the outgoing body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Header fields that will be sent.
    pub fn output_headers(&self) -> &Headers {
        &self.headers
    }

    /// Body that will be sent.
    pub fn output_body(&self) -> &[u8] {
        &self.body
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The peer's response, if one was received.
    pub fn response(&self) -> Option<&ClientResponse> {
        self.response.as_ref()
    }

    /// The response status, or 0 when no response arrived.
    pub fn response_code(&self) -> u16 {
        self.response.as_ref().map_or(0, ClientResponse::status)
    }

    /// Why no response arrived.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Completion trampoline: records `outcome`, hands the wrapper to its
    /// callback once, then drops it.
    pub(crate) fn complete(mut self, outcome: crate::Result<ClientResponse>) {
        debug_assert_eq!(self.phase, Phase::Pending);
        match outcome {
            Ok(response) => self.response = Some(response),
            Err(e) => {
                debug!(error = %e, "request failed");
                self.error = Some(e);
            }
        }
        self.phase = Phase::Completed;

        if let Some(callback) = self.callback.take() {
            callback(&self);
        }
    }
}

impl Drop for InboundRequest {
    fn drop(&mut self) {
        if self.phase == Phase::Pending {
            debug!("request dropped before completion");
        }
    }
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("phase", &self.phase)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("response", &self.response)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
