//! # evbridge
//!
//! Ownership-respecting wrappers around a callback-driven event loop:
//! descriptor readiness and timers, an HTTP/1.1 server, and an HTTP/1.1
//! client, all dispatched serially on one loop thread.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evbridge::{EventLoop, HttpServer, StatusCode};
//!
//! let event_loop = EventLoop::new();
//! let server = HttpServer::new(&event_loop);
//! let addr = server.bind("127.0.0.1", 8080);
//! println!("Listening on http://{addr}");
//!
//! server.add_handler("/ping", |request| {
//!     request.send_reply(StatusCode::Ok, "pong");
//! });
//!
//! // Returns on SIGINT, SIGTERM, SIGHUP or an ExitHandle request.
//! event_loop.run_forever();
//! ```
//!
//! Unix only: descriptor readiness works on raw file descriptors.

// ── Loop context, events and signals ──────────────────────────────────────────
pub mod dns;
pub mod error;
pub mod event;
pub mod event_loop;
mod signal;

// ── HTTP ──────────────────────────────────────────────────────────────────────
pub mod client;
pub mod http;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use client::{ClientResponse, InboundRequest, OutboundConnection, Uri};
pub use dns::DnsResolver;
pub use error::{Error, Result};
pub use event::{EventFlags, WatchedEvent};
pub use event_loop::{EventLoop, ExitHandle};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Handler, HttpServer, ServerRequest};
