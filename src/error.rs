//! Error types and the fatal error path.
//!
//! Setup and allocation failures (runtime construction, descriptor
//! registration, bind, malformed request targets) are unrecoverable: the
//! public API reports them through [`OrFatal::or_fatal`], which logs the
//! diagnostic and panics. Release builds abort on panic.
//!
//! Transport failures of client requests are not fatal. They travel inside the
//! completed [`InboundRequest`](crate::client::InboundRequest).

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;
use tracing::error;

use crate::http::chunked::ChunkError;

/// Every failure the adapter can observe.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build event loop runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to install {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to register descriptor {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid timeout of {seconds} seconds")]
    InvalidTimeout { seconds: f64 },

    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("invalid request target {target:?}")]
    InvalidTarget { target: String },

    #[error("could not resolve {host}")]
    Resolve { host: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("invalid chunked transfer encoding")]
    InvalidChunk,

    #[error("response body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("connection closed before the response was complete")]
    ConnectionClosed,

    #[error("request timed out")]
    TimedOut,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ChunkError> for Error {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::Malformed => Error::InvalidChunk,
            ChunkError::TooLarge { max_bytes } => Error::BodyTooLarge { max_bytes },
        }
    }
}

/// Converts a setup failure into a process-level fatal error.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "fatal event loop error");
                panic!("fatal: {e}");
            }
        }
    }
}
