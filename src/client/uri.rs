//! Absolute and relative URI references, as far as a client needs them.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed URI reference: `scheme://[userinfo@]host[:port]/path?query#fragment`.
///
/// Every component is optional. The fragment is discarded.
///
/// # Examples
///
/// ```
/// use evbridge::Uri;
///
/// let uri = Uri::parse("http://example.com/status?full=1").unwrap();
/// assert_eq!(uri.scheme(), Some("http"));
/// assert_eq!(uri.host(), Some("example.com"));
/// assert_eq!(uri.port(), None);
/// assert_eq!(uri.effective_port(), 80);
/// assert_eq!(uri.path_and_query(), "/status?full=1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    raw: String,
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u32>,
    path_and_query: String,
}

impl Uri {
    /// Parses `input`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUri`] for whitespace or control characters, a
    /// malformed authority, or a non-numeric port.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidUri {
            uri: input.to_owned(),
            reason,
        };

        if input.is_empty() {
            return Err(invalid("empty"));
        }
        if input
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(invalid("contains whitespace or control characters"));
        }

        let (scheme, rest) = match split_scheme(input) {
            Some((scheme, rest)) => (Some(scheme.to_owned()), rest),
            None => (None, input),
        };

        let (authority, tail) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find(['/', '?', '#']).unwrap_or(after.len());
                (Some(&after[..end]), &after[end..])
            }
            None => (None, rest),
        };
        let path_and_query = tail.split('#').next().unwrap_or_default().to_owned();

        let (host, port) = match authority {
            Some(authority) => parse_authority(authority).map_err(invalid)?,
            None => (None, None),
        };

        Ok(Self {
            raw: input.to_owned(),
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    /// The scheme, as written.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Host without IPv6 brackets. `None` when absent or empty.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The port exactly as declared, even when out of range. Values too large
    /// for `u32` saturate.
    pub fn port(&self) -> Option<u32> {
        self.port
    }

    /// The port a connection to this URI uses.
    ///
    /// A declared port outside `1..=65535` counts as absent. An absent port
    /// defaults to 80 when the scheme is exactly `http`, else to 0.
    ///
    /// ```
    /// use evbridge::Uri;
    ///
    /// assert_eq!(Uri::parse("http://h:8080/").unwrap().effective_port(), 8080);
    /// assert_eq!(Uri::parse("http://h:70000/").unwrap().effective_port(), 80);
    /// assert_eq!(Uri::parse("https://h/").unwrap().effective_port(), 0);
    /// ```
    pub fn effective_port(&self) -> u16 {
        match self.port.and_then(|p| u16::try_from(p).ok()) {
            Some(port) if port != 0 => port,
            _ if self.scheme() == Some("http") => 80,
            _ => 0,
        }
    }

    /// Path plus query string; empty for an authority-only URI.
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// The request target to send for this URI: [`path_and_query`], or `/`
    /// when that is empty.
    ///
    /// [`path_and_query`]: Self::path_and_query
    pub fn request_target(&self) -> &str {
        if self.path_and_query.is_empty() {
            "/"
        } else {
            &self.path_and_query
        }
    }

    /// The URI exactly as parsed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits `scheme:rest` where the scheme is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = input.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme, rest))
}

type Authority = (Option<String>, Option<u32>);

fn parse_authority(authority: &str) -> std::result::Result<Authority, &'static str> {
    let host_port = match authority.rsplit_once('@') {
        Some((_userinfo, host_port)) => host_port,
        None => authority,
    };

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or("unterminated IPv6 literal")?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or("junk after IPv6 literal")?),
        };
        (host, port)
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    let port = match port {
        None | Some("") => None,
        Some(digits) => Some(parse_port(digits)?),
    };
    let host = (!host.is_empty()).then(|| host.to_owned());
    Ok((host, port))
}

fn parse_port(digits: &str) -> std::result::Result<u32, &'static str> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("non-numeric port");
    }
    Ok(digits
        .bytes()
        .fold(0u32, |acc, b| acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_without_port_defaults_to_80() {
        let uri = Uri::parse("http://example.com/index.html").unwrap();
        assert_eq!(uri.port(), None);
        assert_eq!(uri.effective_port(), 80);
    }

    #[test]
    fn explicit_port_wins() {
        let uri = Uri::parse("http://127.0.0.1:8080/ping").unwrap();
        assert_eq!(uri.host(), Some("127.0.0.1"));
        assert_eq!(uri.effective_port(), 8080);
        assert_eq!(uri.request_target(), "/ping");
    }

    #[test]
    fn out_of_range_port_counts_as_absent() {
        for raw in ["http://h:0/", "http://h:65536/", "http://h:99999999999/"] {
            assert_eq!(Uri::parse(raw).unwrap().effective_port(), 80, "{raw}");
        }
        assert_eq!(
            Uri::parse("http://h:99999999999/").unwrap().port(),
            Some(u32::MAX)
        );
    }

    #[test]
    fn other_schemes_default_to_zero() {
        assert_eq!(Uri::parse("https://h/").unwrap().effective_port(), 0);
        assert_eq!(Uri::parse("HTTP://h/").unwrap().effective_port(), 0);
        assert_eq!(Uri::parse("ws://h:0/").unwrap().effective_port(), 0);
        assert_eq!(Uri::parse("https://h:443/").unwrap().effective_port(), 443);
    }

    #[test]
    fn ipv6_host_loses_brackets() {
        let uri = Uri::parse("http://[::1]:9000/x").unwrap();
        assert_eq!(uri.host(), Some("::1"));
        assert_eq!(uri.effective_port(), 9000);
    }

    #[test]
    fn userinfo_and_fragment_are_dropped() {
        let uri = Uri::parse("http://user:pw@host:81/a?b=c#frag").unwrap();
        assert_eq!(uri.host(), Some("host"));
        assert_eq!(uri.port(), Some(81));
        assert_eq!(uri.path_and_query(), "/a?b=c");
    }

    #[test]
    fn relative_reference_has_no_scheme_or_host() {
        let uri = Uri::parse("/ping?x=1").unwrap();
        assert_eq!(uri.scheme(), None);
        assert_eq!(uri.host(), None);
        assert_eq!(uri.path_and_query(), "/ping?x=1");
    }

    #[test]
    fn authority_only() {
        let uri: Uri = "http://localhost".parse().unwrap();
        assert_eq!(uri.path_and_query(), "");
        assert_eq!(uri.request_target(), "/");
        assert_eq!(uri.to_string(), "http://localhost");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Uri::parse("").is_err());
        assert!(Uri::parse("http://h/a b").is_err());
        assert!(Uri::parse("http://h:port/").is_err());
        assert!(Uri::parse("http://[::1/").is_err());
    }
}
