//! Responses as the server sends them.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// What a handler answers a [`ServerRequest`](crate::ServerRequest) with.
///
/// The connection fills in `Connection`, `Content-Length` and, for non-empty
/// bodies without one, a plain-text `Content-Type`. A `Content-Length` or
/// `Transfer-Encoding` set by the handler is replaced.
///
/// # Examples
///
/// ```
/// use evbridge::http::{Response, StatusCode};
///
/// let wire = Response::new(StatusCode::Created)
///     .header("Location", "/items/7")
///     .body("created")
///     .into_bytes();
///
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(text.ends_with("Content-Length: 7\r\n\r\ncreated"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    head_only: bool,
}

impl Response {
    /// Creates an empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_only: false,
        }
    }

    /// Adds a header field; earlier fields of the same name stay.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a text body.
    #[must_use]
    pub fn body(self, text: impl Into<String>) -> Self {
        let text: String = text.into();
        self.body_bytes(text)
    }

    /// Sets a binary body.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets `value`, serialized, as an `application/json` body.
    ///
    /// # Errors
    ///
    /// Whatever `serde_json` reports for `value`.
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body_bytes(encoded))
    }

    /// Whether the connection stays open after this response. A handler may
    /// force a close; it cannot keep open a connection the client closes.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Advertises the body length without sending the body (HEAD).
    pub(crate) fn head_only(mut self) -> Self {
        self.head_only = true;
        self
    }

    /// The status the response will be sent with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Header fields set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The response as it goes on the wire.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.set(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );

        // The body always goes out whole, so its length is the only framing.
        self.headers.remove("transfer-encoding");
        if !self.status.forbids_body() {
            self.headers.set("Content-Length", self.body.len().to_string());
        }

        let mut wire = BytesMut::with_capacity(64 + 48 * self.headers.len() + self.body.len());
        wire.put(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        self.headers.write_to(&mut wire);
        wire.put_slice(b"\r\n");

        if !self.head_only && !self.status.forbids_body() {
            wire.put_slice(&self.body);
        }
        wire
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
