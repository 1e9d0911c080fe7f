use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::classify::CaptureError;
use crate::transport::{
    content_type, HttpRequest, HttpResponse, ObservedBody, StreamingResponse, Transport,
    TransportError,
};

/// Default cap on how much of a streamed body is buffered for observation.
pub const DEFAULT_OBSERVED_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Prefix some JSON endpoints put in front of their body to defeat script
/// inclusion.
const HIJACK_GUARD: &str = "while(1);";

/// One observed request/response pair with a parsed JSON body.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub url: String,
    pub request_headers: HeaderMap,
    pub request_body: Bytes,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub response: Value,
}

/// Receives every successful JSON exchange seen by an [`InterceptingTransport`].
pub trait ExchangeObserver: Send + Sync {
    fn observe(&self, exchange: &Exchange) -> Result<(), CaptureError>;
}

/// Transport decorator that reports completed exchanges to an observer.
///
/// Callers get exactly what the inner transport returned; observation
/// failures are logged and dropped.
#[derive(Clone)]
pub struct InterceptingTransport {
    inner: Arc<dyn Transport>,
    observer: Arc<dyn ExchangeObserver>,
    body_limit: usize,
}

impl InterceptingTransport {
    pub fn new(inner: Arc<dyn Transport>, observer: Arc<dyn ExchangeObserver>) -> Self {
        Self {
            inner,
            observer,
            body_limit: DEFAULT_OBSERVED_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// The undecorated transport. Requests sent through it are not observed.
    pub fn inner(&self) -> Arc<dyn Transport> {
        self.inner.clone()
    }
}

#[async_trait]
impl Transport for InterceptingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let origin = Origin::from(&request);
        let response = self.inner.send(request).await?;

        if should_observe(response.status, &response.headers) && response.body.len() <= self.body_limit {
            let content_type = response.content_type().map(str::to_owned);
            deliver(&*self.observer, origin, response.status, content_type, &response.body);
        }

        Ok(response)
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let origin = Origin::from(&request);
        let response = self.inner.send_streaming(request).await?;

        if !should_observe(response.status, &response.headers) {
            return Ok(response);
        }

        let status = response.status;
        let content_type = content_type(&response.headers).map(str::to_owned);
        let observer = self.observer.clone();
        let body = ObservedBody::new(response.body, self.body_limit, move |bytes| {
            deliver(&*observer, origin, status, content_type, &bytes);
        });

        Ok(StreamingResponse {
            status,
            headers: response.headers,
            body: Box::pin(body),
        })
    }
}

/// Request-side metadata kept until the response body is complete.
struct Origin {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
}

impl From<&HttpRequest> for Origin {
    fn from(request: &HttpRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        }
    }
}

fn should_observe(status: StatusCode, headers: &HeaderMap) -> bool {
    status.is_success() && content_type(headers).is_some_and(|ct| ct.contains("json"))
}

fn deliver(
    observer: &dyn ExchangeObserver,
    origin: Origin,
    status: StatusCode,
    content_type: Option<String>,
    body: &[u8],
) {
    let Some(response) = parse_json_body(body) else {
        tracing::trace!(url = %origin.url, "Response body is not JSON, skipping");
        return;
    };

    let exchange = Exchange {
        method: origin.method,
        url: origin.url,
        request_headers: origin.headers,
        request_body: origin.body,
        status,
        content_type,
        response,
    };

    match catch_unwind(AssertUnwindSafe(|| observer.observe(&exchange))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!(url = %exchange.url, error = %err, "Exchange observation failed");
        }
        Err(_) => {
            tracing::warn!(url = %exchange.url, "Exchange observer panicked");
        }
    }
}

/// Parse a JSON body, tolerating a leading hijack guard.
pub fn parse_json_body(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?.trim_start();
    let text = text.strip_prefix(HIJACK_GUARD).unwrap_or(text);
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_guarded_json() {
        let value = parse_json_body(b"while(1);\n{\"actions\":[]}").unwrap();
        assert!(value.get("actions").is_some());
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_json_body(b"<html></html>").is_none());
        assert!(parse_json_body(&[0xff, 0xfe]).is_none());
    }
}
