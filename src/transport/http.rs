use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::TransportConfig;
use crate::transport::{
    BodyStream, HttpRequest, HttpResponse, StreamingResponse, Transport, TransportError,
};

/// The real network transport, backed by reqwest.
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds.into()))
            // Redirects belong to the host application, not the proxy.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.timeout_seconds.into()),
        })
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<reqwest::Response, TransportError> {
        let url = request.url.clone();
        let builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        match timeout(self.request_timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(TransportError::Request { url, source }),
            Err(_) => Err(TransportError::Timeout {
                url,
                duration: self.request_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.dispatch(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.dispatch(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body: BodyStream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| TransportError::Body(e.to_string())),
        );

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}
