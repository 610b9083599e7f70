//! # Host Bridge Traits
//!
//! Capability contracts the preparation core requires from its host.
//!
//! ## Overview
//!
//! This crate defines the seam between the core and the host platform. Each
//! trait represents something the core needs but does not implement itself:
//!
//! - [`HttpClient`](http::HttpClient) - Streaming GETs that surface redirects
//!   and transport failures instead of hiding them
//! - [`StreamResolver`](remote::StreamResolver) - Short-lived download URLs
//!   for catalog entries
//! - [`SessionBootstrap`](remote::SessionBootstrap) - Re-authentication after
//!   a dropped connection
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should report failures that never produced an HTTP response as
//! `BridgeError::ConnectionFailed`; the core retries only those.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be
//! shared across preparation tasks.

pub mod error;
pub mod http;
pub mod log;
pub mod remote;

pub use error::BridgeError;

pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpStreamResponse};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use remote::{SessionBootstrap, StreamResolver};
