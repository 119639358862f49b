//! Reading an HTTP/1.1 response off a client connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::http::chunked::ChunkedDecoder;
use crate::http::{self, Headers, MAX_HEADERS};
use crate::server::MAX_REQUEST_SIZE;

/// A response delivered to a completed [`InboundRequest`](super::InboundRequest).
#[derive(Debug, Clone)]
pub struct ClientResponse {
    status: u16,
    reason: String,
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl ClientResponse {
    /// The status code exactly as the peer sent it.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The response's header fields.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body, de-chunked. Empty for HEAD, 204 and 304.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Whatever `serde_json` reports for the body.
    pub fn json<T>(&self) -> std::result::Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version == 1 || self.headers.has_token("connection", "keep-alive")
    }
}

/// A response plus whether its connection can carry another request.
#[derive(Debug)]
pub(crate) struct Received {
    pub(crate) response: ClientResponse,
    pub(crate) reusable: bool,
}

/// Reads one complete response from `reader`.
///
/// `expects_body` is `false` for HEAD. Interim 1xx responses other than
/// `101 Switching Protocols` are skipped.
pub(crate) async fn read_response<R>(
    reader: &mut R,
    expects_body: bool,
    max_body_size: usize,
) -> Result<Received>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    let mut response = loop {
        let (response, head_len) = loop {
            if let Some(parsed) = parse_head(&buf)? {
                break parsed;
            }
            if buf.len() > MAX_REQUEST_SIZE {
                return Err(Error::BodyTooLarge {
                    max_bytes: MAX_REQUEST_SIZE,
                });
            }
            fill(reader, &mut buf).await?;
        };
        buf.advance(head_len);

        if (100..200).contains(&response.status) && response.status != 101 {
            trace!(status = response.status, "skipping interim response");
            continue;
        }
        break response;
    };

    let mut reusable = response.is_keep_alive();

    response.body = if !expects_body || http::forbids_body(response.status) {
        Bytes::new()
    } else if response.headers.has_token("transfer-encoding", "chunked") {
        read_chunked(reader, &mut buf, max_body_size).await?
    } else if let Some(value) = response.headers.get("content-length") {
        let length: usize = value
            .trim()
            .parse()
            .map_err(|_| Error::Parse(httparse::Error::HeaderValue))?;
        if length > max_body_size {
            return Err(Error::BodyTooLarge {
                max_bytes: max_body_size,
            });
        }
        while buf.len() < length {
            fill(reader, &mut buf).await?;
        }
        buf.split_to(length).freeze()
    } else {
        // Delimited by close; the connection is spent either way.
        reusable = false;
        read_to_close(reader, &mut buf, max_body_size).await?
    };

    if !buf.is_empty() {
        reusable = false;
    }

    Ok(Received { response, reusable })
}

fn parse_head(buf: &[u8]) -> Result<Option<(ClientResponse, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut headers);

    let head_len = match raw.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    Ok(Some((
        ClientResponse {
            status: raw.code.unwrap_or_default(),
            reason: raw.reason.unwrap_or_default().to_owned(),
            version: raw.version.unwrap_or(1),
            headers: Headers::from_parsed(raw.headers),
            body: Bytes::new(),
        },
        head_len,
    )))
}

/// Reads more bytes; a clean close here means the response was cut short.
async fn fill<R>(reader: &mut R, buf: &mut BytesMut) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    if reader.read_buf(buf).await? == 0 {
        return Err(Error::ConnectionClosed);
    }
    Ok(())
}

async fn read_chunked<R>(reader: &mut R, buf: &mut BytesMut, max_body_size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ChunkedDecoder::new(max_body_size);
    loop {
        if let Some(body) = decoder.decode(buf)? {
            return Ok(body);
        }
        fill(reader, buf).await?;
    }
}

async fn read_to_close<R>(reader: &mut R, buf: &mut BytesMut, max_body_size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    loop {
        if buf.len() > max_body_size {
            return Err(Error::BodyTooLarge {
                max_bytes: max_body_size,
            });
        }
        if reader.read_buf(buf).await? == 0 {
            return Ok(buf.split().freeze());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    async fn read(raw: &[u8], expects_body: bool) -> Result<Received> {
        let mut reader = raw;
        read_response(&mut reader, expects_body, MAX).await
    }

    #[tokio::test]
    async fn content_length_body() {
        let received = read(
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong",
            true,
        )
        .await
        .unwrap();
        assert_eq!(received.response.status(), 200);
        assert_eq!(received.response.reason(), "OK");
        assert_eq!(&received.response.body()[..], b"pong");
        assert!(received.reusable);
    }

    #[tokio::test]
    async fn chunked_body_with_trailer() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nExpires: never\r\n\r\n";
        let received = read(raw, true).await.unwrap();
        assert_eq!(&received.response.body()[..], b"Wikipedia");
        assert!(received.reusable);
    }

    #[tokio::test]
    async fn bad_chunk_size() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert!(matches!(read(raw, true).await, Err(Error::InvalidChunk)));
    }

    #[tokio::test]
    async fn chunked_body_over_limit() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n800\r\n";
        assert!(matches!(
            read(raw, true).await,
            Err(Error::BodyTooLarge { max_bytes: MAX })
        ));
    }

    #[tokio::test]
    async fn close_delimited_body() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\nuntil the end";
        let received = read(raw, true).await.unwrap();
        assert_eq!(&received.response.body()[..], b"until the end");
        assert_eq!(received.response.version(), 0);
        assert!(!received.reusable);
    }

    #[tokio::test]
    async fn head_and_no_content_have_no_body() {
        let head = read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n", false)
            .await
            .unwrap();
        assert!(head.response.body().is_empty());
        assert!(head.reusable);

        let empty = read(b"HTTP/1.1 204 No Content\r\n\r\n", true).await.unwrap();
        assert_eq!(empty.response.status(), 204);
        assert!(empty.response.body().is_empty());
    }

    #[tokio::test]
    async fn interim_continue_is_skipped() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n";
        let received = read(raw, true).await.unwrap();
        assert_eq!(received.response.status(), 201);
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        assert!(matches!(read(raw, true).await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn oversize_body_is_refused() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n";
        assert!(matches!(
            read(raw, true).await,
            Err(Error::BodyTooLarge { max_bytes: MAX })
        ));
    }

    #[tokio::test]
    async fn connection_close_is_not_reusable() {
        let raw = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok";
        assert!(!read(raw, true).await.unwrap().reusable);
    }

    #[tokio::test]
    async fn json_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\n{\"pong\":true}";
        let received = read(raw, true).await.unwrap();
        let value: serde_json::Value = received.response.json().unwrap();
        assert_eq!(value["pong"], true);
    }
}
