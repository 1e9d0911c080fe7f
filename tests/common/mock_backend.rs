//! Axum upstream that replays scripted responses and records what it got.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

/// One request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path plus query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Scripted upstream reply. An empty script answers `{"ok": true}`.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::value(&serde_json::json!({ "ok": true }))
    }
}

impl MockResponse {
    pub fn value(body: &serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            ..Self::value(&serde_json::json!({ "error": message }))
        }
    }
}

#[derive(Clone, Default)]
struct Script {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    script: Script,
    shutdown: watch::Sender<bool>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let script = Script::default();
        let (shutdown, mut stopped) = watch::channel(false);

        let app = Router::new().fallback(reply).with_state(script.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.changed().await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            script,
            shutdown,
        }
    }

    pub async fn enqueue_response(&self, response: MockResponse) {
        self.script.responses.lock().await.push_back(response);
    }

    pub async fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.script.requests.lock().await.clone()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Forget recorded requests and any unused scripted responses.
    pub async fn clear(&self) {
        self.script.requests.lock().await.clear();
        self.script.responses.lock().await.clear();
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn reply(State(script): State<Script>, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    script.requests.lock().await.push(CapturedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.to_string()),
        headers: parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.to_vec(),
    });

    let response = script.responses.lock().await.pop_front().unwrap_or_default();
    Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap())
        .header(CONTENT_TYPE, response.content_type)
        .body(Body::from(response.body))
        .unwrap()
}
