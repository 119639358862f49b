//! HTTP/1.1 vocabulary shared by the server and client sides.
//!
//! [`Method`], [`StatusCode`], [`Headers`], the server-side [`Request`]
//! parser and the server-side [`Response`] builder.

use std::fmt;
use std::str::FromStr;

pub mod chunked;
pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// Maximum number of headers parsed per message.
pub(crate) const MAX_HEADERS: usize = 64;

/// `true` for 1xx, 204 and 304, whose responses end at the header block.
pub(crate) fn forbids_body(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}

macro_rules! status_codes {
    ($( $variant:ident = $code:literal, $reason:literal; )+) => {
        /// Status codes the server side emits.
        ///
        /// Client responses keep the raw `u16` instead, since a peer may send
        /// any code.
        ///
        /// # Examples
        ///
        /// ```
        /// use evbridge::http::StatusCode;
        ///
        /// assert_eq!(StatusCode::Ok.as_u16(), 200);
        /// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
        /// assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $( $variant = $code, )+
        }

        impl StatusCode {
            /// The reason phrase written on the status line.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $( Self::$variant => $reason, )+
                }
            }

            /// The variant for `code`, if the server side knows it.
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";

    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NoContent = 204, "No Content";

    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    NotModified = 304, "Not Modified";

    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    RequestTimeout = 408, "Request Timeout";
    PayloadTooLarge = 413, "Payload Too Large";
    UriTooLong = 414, "URI Too Long";

    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Responses with this code never carry a body.
    pub fn forbids_body(self) -> bool {
        forbids_body(self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.as_u16()
    }
}

macro_rules! methods {
    ($( $variant:ident => $name:literal, )+) => {
        /// A request method. Unknown tokens are kept verbatim as
        /// [`Method::Custom`].
        ///
        /// # Examples
        ///
        /// ```
        /// use evbridge::http::Method;
        ///
        /// let method: Method = "DELETE".parse().unwrap();
        /// assert_eq!(method, Method::Delete);
        /// assert_eq!(Method::Custom("PURGE".into()).as_str(), "PURGE");
        /// ```
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Method {
            $( $variant, )+
            /// A non-standard extension method.
            Custom(String),
        }

        impl Method {
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $name, )+
                    Self::Custom(token) => token.as_str(),
                }
            }
        }

        impl FromStr for Method {
            type Err = std::convert::Infallible;

            fn from_str(token: &str) -> Result<Self, Self::Err> {
                Ok(match token {
                    $( $name => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                })
            }
        }
    };
}

methods! {
    Get => "GET",
    Head => "HEAD",
    Post => "POST",
    Put => "PUT",
    Delete => "DELETE",
    Connect => "CONNECT",
    Options => "OPTIONS",
    Trace => "TRACE",
    Patch => "PATCH",
}

impl Method {
    /// `false` for HEAD, whose responses describe a body without sending it.
    pub fn expects_response_body(&self) -> bool {
        *self != Self::Head
    }

    /// Whether sending the request twice has the same effect as sending it
    /// once. Only these are retried after a stale connection.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodiless_status_codes() {
        assert!(StatusCode::NoContent.forbids_body());
        assert!(StatusCode::NotModified.forbids_body());
        assert!(StatusCode::Continue.forbids_body());
        assert!(!StatusCode::Ok.forbids_body());
        assert!(!forbids_body(404));
    }

    #[test]
    fn status_lookup() {
        assert_eq!(StatusCode::from_u16(413), Some(StatusCode::PayloadTooLarge));
        assert_eq!(StatusCode::from_u16(299), None);
        assert_eq!(StatusCode::GatewayTimeout.canonical_reason(), "Gateway Timeout");
    }

    #[test]
    fn method_tokens() {
        for name in ["GET", "POST", "HEAD", "PURGE"] {
            let method: Method = name.parse().unwrap();
            assert_eq!(method.as_str(), name);
        }
        assert!(!Method::Head.expects_response_body());
        assert!(Method::Get.expects_response_body());
        assert!(Method::Put.is_idempotent());
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
        assert_eq!(Method::from("get"), Method::Custom("get".to_owned()));
    }
}
