//! Incremental decoding of `Transfer-Encoding: chunked` bodies.
//!
//! Shared by the server (request bodies) and the client (response bodies).
//! The decoder consumes framing from the caller's buffer as it goes, so the
//! buffer only ever holds the chunk currently being read.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Why a chunked body was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("malformed chunk framing")]
    Malformed,

    #[error("chunked body exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

#[derive(Debug, Clone, Copy)]
enum State {
    Size,
    Data(usize),
    Trailers,
}

#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    body: BytesMut,
    state: State,
    max_body_size: usize,
}

impl ChunkedDecoder {
    pub(crate) fn new(max_body_size: usize) -> Self {
        Self {
            body: BytesMut::new(),
            state: State::Size,
            max_body_size,
        }
    }

    /// Consumes as much of `buf` as forms complete framing.
    ///
    /// `Ok(None)` means more input is needed; `buf` keeps whatever partial
    /// framing is left. On `Ok(Some(body))` the terminating empty line (and
    /// any trailer fields) have been consumed and `buf` holds only what
    /// follows the body.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ChunkError> {
        loop {
            match self.state {
                State::Size => {
                    let (offset, size) = match httparse::parse_chunk_size(&buf[..]) {
                        Ok(httparse::Status::Complete(parsed)) => parsed,
                        Ok(httparse::Status::Partial) => return Ok(None),
                        Err(_) => return Err(ChunkError::Malformed),
                    };
                    buf.advance(offset);

                    if size == 0 {
                        self.state = State::Trailers;
                        continue;
                    }
                    let size = usize::try_from(size).map_err(|_| ChunkError::Malformed)?;
                    if self.body.len().saturating_add(size) > self.max_body_size {
                        return Err(ChunkError::TooLarge {
                            max_bytes: self.max_body_size,
                        });
                    }
                    self.state = State::Data(size);
                }
                State::Data(size) => {
                    let framed = size.checked_add(2).ok_or(ChunkError::Malformed)?;
                    if buf.len() < framed {
                        return Ok(None);
                    }
                    if &buf[size..framed] != b"\r\n" {
                        return Err(ChunkError::Malformed);
                    }
                    self.body.extend_from_slice(&buf[..size]);
                    buf.advance(framed);
                    self.state = State::Size;
                }
                State::Trailers => match buf.windows(2).position(|w| w == b"\r\n") {
                    Some(0) => {
                        buf.advance(2);
                        self.state = State::Size;
                        return Ok(Some(std::mem::take(&mut self.body).freeze()));
                    }
                    Some(end) => buf.advance(end + 2),
                    None => return Ok(None),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_body_in_one_buffer() {
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\nnext"[..]);
        let body = ChunkedDecoder::new(64).decode(&mut buf).unwrap();
        assert_eq!(body.as_deref(), Some(&b"Wikipedia"[..]));
        assert_eq!(&buf[..], b"next");
    }

    #[test]
    fn body_split_across_reads() {
        let mut decoder = ChunkedDecoder::new(64);
        let mut buf = BytesMut::from(&b"5\r\nhel"[..]);
        assert_eq!(decoder.decode(&mut buf), Ok(None));

        buf.extend_from_slice(b"lo\r\n0\r\n");
        assert_eq!(decoder.decode(&mut buf), Ok(None));

        buf.extend_from_slice(b"Expires: never\r\n\r\n");
        let body = decoder.decode(&mut buf).unwrap();
        assert_eq!(body.as_deref(), Some(&b"hello"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn missing_crlf_after_data() {
        let mut buf = BytesMut::from(&b"2\r\nokXX0\r\n\r\n"[..]);
        assert_eq!(
            ChunkedDecoder::new(64).decode(&mut buf),
            Err(ChunkError::Malformed)
        );
    }

    #[test]
    fn size_over_limit_is_refused_before_buffering() {
        let mut buf = BytesMut::from(&b"10\r\n"[..]);
        assert_eq!(
            ChunkedDecoder::new(8).decode(&mut buf),
            Err(ChunkError::TooLarge { max_bytes: 8 })
        );
    }

    #[test]
    fn unbounded_limit_does_not_overflow() {
        let mut buf = BytesMut::from(&b"ffffffffffffffff\r\n"[..]);
        assert_eq!(
            ChunkedDecoder::new(usize::MAX).decode(&mut buf),
            Err(ChunkError::Malformed)
        );
    }
}
