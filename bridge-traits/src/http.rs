//! HTTP Client Abstraction
//!
//! Provides streaming HTTP GETs whose redirects and transport failures are
//! surfaced to the caller instead of being handled inside the client.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Body of a streaming response, yielded chunk by chunk as it arrives.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Response whose headers have arrived but whose body is still in flight.
///
/// Dropping the value aborts the underlying request.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl HttpStreamResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Target of a redirect response, if the server sent one.
    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"ByteStream { ... }")
            .finish()
    }
}

/// Async HTTP client trait
///
/// Implementations must:
/// - Never follow redirects on their own; 3xx responses are returned as-is
/// - Report failures that produced no HTTP response as
///   [`BridgeError::ConnectionFailed`](crate::error::BridgeError::ConnectionFailed)
/// - Report body read failures the same way, through the body stream
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
/// use futures::StreamExt;
///
/// async fn count_bytes(client: &dyn HttpClient, url: &str) -> Result<usize> {
///     let mut response = client.open_stream(HttpRequest::get(url)).await?;
///     let mut total = 0;
///     while let Some(chunk) = response.body.next().await {
///         total += chunk?.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return as soon as response headers are available.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails (`ConnectionFailed`)
    /// - The request cannot be built, e.g. malformed URL (`OperationFailed`)
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse>;
}
