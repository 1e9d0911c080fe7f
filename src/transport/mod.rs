//! The transport capability and its intercepting decorator.
//!
//! Everything that talks HTTP goes through [`Transport`]. The proxy wraps the
//! real client in an [`InterceptingTransport`] so every exchange is observed;
//! the reconstructor keeps a handle on the inner transport so its own page
//! requests are never classified.

pub mod http;
pub mod intercept;
pub mod observed;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::pin::Pin;
use thiserror::Error;

pub use http::HttpTransport;
pub use intercept::{Exchange, ExchangeObserver, InterceptingTransport};
pub use observed::ObservedBody;

/// Errors raised by a transport before a usable response exists.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed
    #[error("Request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded total timeout
    #[error("Request to '{url}' timed out after {duration}s")]
    Timeout { url: String, duration: u64 },

    /// Connection-level failure not tied to a reqwest error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The response body could not be read to the end
    #[error("Failed to read response body: {0}")]
    Body(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// An outbound request, fully buffered.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = body.into();
        request
    }
}

/// A response with its whole body in memory.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        content_type(&self.headers)
    }
}

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A response whose body arrives as a stream of chunks.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Something that can carry an HTTP exchange.
///
/// `send` awaits the full body; `send_streaming` hands the body over chunk by
/// chunk. The default `send_streaming` buffers through `send`, so a transport
/// only has to implement the streaming path when it can do better.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.send(request).await?;
        let body: BodyStream = Box::pin(futures_util::stream::iter(vec![Ok(response.body)]));
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body,
        })
    }
}

pub(crate) fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}
