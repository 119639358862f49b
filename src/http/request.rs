//! Requests as the server receives them.

use bytes::Bytes;
use thiserror::Error;

use super::chunked::ChunkError;
use super::{Headers, MAX_HEADERS, Method};

/// Why a buffered request head was refused.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("request line has no {0}")]
    Missing(&'static str),

    #[error("Content-Length is not a number: {0:?}")]
    ContentLength(String),

    #[error("both Content-Length and Transfer-Encoding are present")]
    AmbiguousLength,

    #[error("unsupported Transfer-Encoding: {0:?}")]
    TransferEncoding(String),

    #[error("bad chunked body: {0}")]
    Chunked(#[from] ChunkError),
}

/// How the body following a request head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Length(usize),
    Chunked,
}

/// A request received by an [`HttpServer`](crate::HttpServer).
///
/// # Examples
///
/// ```
/// use evbridge::http::{Method, Request};
///
/// let raw = b"GET /ping?verbose=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, body_at) = Request::parse(raw).unwrap().expect("complete head");
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/ping");
/// assert_eq!(request.query_param("verbose"), Some("1"));
/// assert_eq!(body_at, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Parses the request head at the start of `buf`.
    ///
    /// `Ok(None)` means the head is not complete yet. Otherwise returns the
    /// request, still without its body, and the offset where the body starts.
    ///
    /// # Errors
    ///
    /// [`RequestError`] when the head can never become a valid request.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_at) = head.parse(buf)? else {
            return Ok(None);
        };

        let method = Method::from(head.method.ok_or(RequestError::Missing("method"))?);
        let target = head.path.ok_or(RequestError::Missing("target"))?;
        let version = head.version.ok_or(RequestError::Missing("version"))?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };

        let request = Self {
            method,
            path: path.to_owned(),
            query,
            version,
            headers: Headers::from_parsed(head.headers),
            body: Bytes::new(),
        };
        Ok(Some((request, body_at)))
    }

    /// Attaches the body once it is fully buffered.
    pub fn with_body(self, body: Bytes) -> Self {
        Self { body, ..self }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Everything after the `?`, undecoded.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First value of `key` in the query string. `+` is not decoded.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }

    /// Minor HTTP version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The request's header fields.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body, empty until it has been attached with [`with_body`](Self::with_body).
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the client wants the connection kept open: by default for
    /// HTTP/1.1, only on request for HTTP/1.0.
    pub fn is_keep_alive(&self) -> bool {
        match self.version {
            _ if self.headers.has_token("connection", "close") => false,
            1 => true,
            _ => self.headers.has_token("connection", "keep-alive"),
        }
    }

    /// Declared body length, zero without a `Content-Length` field.
    ///
    /// # Errors
    ///
    /// [`RequestError::ContentLength`] when the field is not a number.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        let Some(value) = self.headers.get("content-length") else {
            return Ok(0);
        };
        value
            .trim()
            .parse()
            .map_err(|_| RequestError::ContentLength(value.to_owned()))
    }

    /// Works out where the body ends. `chunked` must be the final transfer
    /// coding, and may not be combined with `Content-Length`.
    pub(crate) fn body_framing(&self) -> Result<BodyFraming, RequestError> {
        if !self.headers.contains("transfer-encoding") {
            return self.content_length().map(BodyFraming::Length);
        }
        if self.headers.contains("content-length") {
            return Err(RequestError::AmbiguousLength);
        }
        let last = self
            .headers
            .get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .last();
        match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
            other => Err(RequestError::TransferEncoding(
                other.unwrap_or_default().to_owned(),
            )),
        }
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        match token.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}
