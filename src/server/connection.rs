//! Serving one accepted connection.
//!
//! HTTP/1.1 connections are persistent by default: one request is read per
//! iteration until the peer closes, asks for `Connection: close`, or stays
//! idle past the server timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::Shared;
use crate::http::chunked::{ChunkError, ChunkedDecoder};
use crate::http::request::{BodyFraming, Request, RequestError};
use crate::http::{Method, Response, StatusCode};

/// Largest request head we buffer before answering 413. Also bounds the
/// chunk-size lines and trailers of a chunked body.
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

pub(super) async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let settings = shared.settings();

        let (request, body_offset) = loop {
            match Request::parse(&buf) {
                Ok(Some(parsed)) => break parsed,
                Ok(None) if buf.len() > MAX_REQUEST_SIZE => {
                    warn!(peer = %peer, "request head too large — sending 413");
                    return reject(&mut stream, StatusCode::PayloadTooLarge, "Request head too large")
                        .await;
                }
                Ok(None) => {
                    if !read_more(&mut stream, &mut buf, settings.timeout, peer).await? {
                        return Ok(());
                    }
                }
                Err(e) => return bad_request(&mut stream, peer, &e).await,
            }
        };

        let framing = match request.body_framing() {
            Ok(framing) => framing,
            Err(e) => return bad_request(&mut stream, peer, &e).await,
        };
        buf.advance(body_offset);

        let body = match framing {
            BodyFraming::Length(content_length) => {
                if content_length > settings.max_body_size {
                    warn!(peer = %peer, content_length, "request body too large — sending 413");
                    return reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large")
                        .await;
                }
                while buf.len() < content_length {
                    if !read_more(&mut stream, &mut buf, settings.timeout, peer).await? {
                        return Ok(());
                    }
                }
                buf.split_to(content_length).freeze()
            }
            BodyFraming::Chunked => {
                let mut decoder = ChunkedDecoder::new(settings.max_body_size);
                let buffered_limit = settings.max_body_size.saturating_add(MAX_REQUEST_SIZE);
                loop {
                    match decoder.decode(&mut buf) {
                        Ok(Some(body)) => break body,
                        Ok(None) if buf.len() > buffered_limit => {
                            warn!(peer = %peer, "chunk framing too large — sending 413");
                            return reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large")
                                .await;
                        }
                        Ok(None) => {
                            if !read_more(&mut stream, &mut buf, settings.timeout, peer).await? {
                                return Ok(());
                            }
                        }
                        Err(ChunkError::TooLarge { max_bytes }) => {
                            warn!(peer = %peer, max_bytes, "chunked body too large — sending 413");
                            return reject(&mut stream, StatusCode::PayloadTooLarge, "Request entity too large")
                                .await;
                        }
                        Err(e) => return bad_request(&mut stream, peer, &RequestError::from(e)).await,
                    }
                }
            }
        };
        let request = request.with_body(body);

        let keep_alive = request.is_keep_alive();
        let head_only = request.method() == &Method::Head;

        let response = shared.dispatch(request, peer).await;
        let keep_alive = keep_alive && response.is_keep_alive();
        let mut response = response.keep_alive(keep_alive);
        if head_only {
            response = response.head_only();
        }

        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer, "Connection: close — shutting down");
            return Ok(());
        }
    }
}

/// Reads more bytes into `buf`. `false` once the peer closed or idled out.
async fn read_more(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    timeout: Duration,
    peer: SocketAddr,
) -> io::Result<bool> {
    match tokio::time::timeout(timeout, stream.read_buf(buf)).await {
        Ok(Ok(0)) => {
            debug!(peer = %peer, "connection closed by peer");
            Ok(false)
        }
        Ok(Ok(_)) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            debug!(peer = %peer, ?timeout, "connection idle — closing");
            Ok(false)
        }
    }
}

async fn bad_request(stream: &mut TcpStream, peer: SocketAddr, e: &RequestError) -> io::Result<()> {
    warn!(peer = %peer, error = %e, "bad request — sending 400");
    reject(stream, StatusCode::BadRequest, &format!("Bad Request: {e}")).await
}

async fn reject(stream: &mut TcpStream, status: StatusCode, body: &str) -> io::Result<()> {
    let response = Response::new(status).body(body).keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}
