//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_backend;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use querytap::classify::ProtocolRules;
use querytap::config::ProtocolConfig;
use querytap::model::CapturedResult;
use querytap::capture::ResultSink;
use querytap::reconstruct::{FetchProgress, ProgressSink};
use querytap::replay::{CONTEXT_FIELD, MESSAGE_FIELD, TOKEN_FIELD};
use querytap::transport::{Exchange, HttpRequest, HttpResponse, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Find an available port for testing.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to free port");
    listener.local_addr().unwrap().port()
}

/// Wait for a server to become available.
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn default_rules() -> ProtocolRules {
    ProtocolRules::from_config(&ProtocolConfig::default()).unwrap()
}

// -- Page builders ------------------------------------------------------------

/// Rows `{"Id": "<n>", "Name": "row <n>"}` for every n in `range`.
pub fn rows(range: Range<usize>) -> Vec<Value> {
    range
        .map(|i| json!({ "Id": format!("{:06}", i), "Name": format!("row {}", i) }))
        .collect()
}

pub fn columns() -> Vec<Value> {
    vec![
        json!({ "fieldName": "Id", "label": "Record ID" }),
        json!({ "fieldName": "Name", "label": "Name" }),
    ]
}

/// An enveloped action response carrying one page.
pub fn enveloped_body(
    query_id: Option<&str>,
    page: Range<usize>,
    total: Option<u64>,
    with_columns: bool,
) -> Value {
    let rows = rows(page);
    let mut return_value = json!({
        "rows": rows,
        "returnedCount": rows.len(),
    });
    if with_columns {
        return_value["columns"] = json!(columns());
    }
    if query_id.is_some() || total.is_some() {
        return_value["status"] = json!({
            "queryId": query_id,
            "totalCount": total,
        });
    }
    json!({
        "actions": [{
            "id": "101;a",
            "state": "SUCCESS",
            "returnValue": return_value,
        }]
    })
}

/// A tabular query page.
pub fn tabular_body(total: u64, done: bool, page: Range<usize>, next: Option<&str>) -> Value {
    let records: Vec<Value> = rows(page)
        .into_iter()
        .map(|mut row| {
            row["attributes"] = json!({ "type": "Account" });
            row
        })
        .collect();
    let mut body = json!({
        "totalSize": total,
        "done": done,
        "records": records,
    });
    if let Some(next) = next {
        body["nextRecordsUrl"] = json!(next);
    }
    body
}

/// Form body of an action request posting `query_text`.
pub fn query_form(query_text: &str) -> Vec<u8> {
    let message = json!({
        "actions": [{
            "id": "101;a",
            "descriptor": "apex://QueryRunnerController/ACTION$runQuery",
            "callingDescriptor": "UNKNOWN",
            "params": {
                "queryText": query_text,
                "rowLimit": 2000,
                "auxiliaryNamespace": "",
            }
        }]
    });
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair(MESSAGE_FIELD, &message.to_string())
        .append_pair(CONTEXT_FIELD, r#"{"mode":"PROD","fwuid":"abc"}"#)
        .append_pair(TOKEN_FIELD, "csrf-token")
        .finish()
        .into_bytes()
}

pub fn session_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("cookie", HeaderValue::from_static("sid=session-1"));
    headers
}

pub fn bearer_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_static("Bearer token-1"));
    headers
}

/// An observed exchange as the intercepting transport would report it.
pub fn exchange(url: &str, response: Value) -> Exchange {
    exchange_with_request(url, HeaderMap::new(), Vec::new(), response)
}

pub fn exchange_with_request(
    url: &str,
    request_headers: HeaderMap,
    request_body: Vec<u8>,
    response: Value,
) -> Exchange {
    Exchange {
        method: if request_body.is_empty() { Method::GET } else { Method::POST },
        url: url.to_string(),
        request_headers,
        request_body: Bytes::from(request_body),
        status: StatusCode::OK,
        content_type: Some("application/json".to_string()),
        response,
    }
}

pub fn json_response(body: &Value) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    HttpResponse {
        status: StatusCode::OK,
        headers,
        body: Bytes::from(body.to_string()),
    }
}

pub fn status_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

// -- Fakes --------------------------------------------------------------------

/// Transport answering from a script, recording every request.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn push_json(&self, body: Value) {
        self.push(json_response(&body));
    }

    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".to_string())))
    }
}

/// Result sink that keeps everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<CapturedResult>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn results(&self) -> Vec<CapturedResult> {
        self.results.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.results.lock().len()
    }
}

impl ResultSink for CollectingSink {
    fn on_result(&self, result: CapturedResult) {
        self.results.lock().push(result);
    }
}

/// Progress sink recording `(progress, batch length)` per page.
#[derive(Default)]
pub struct CollectingProgress {
    pages: Mutex<Vec<(FetchProgress, usize)>>,
}

impl CollectingProgress {
    pub fn pages(&self) -> Vec<(FetchProgress, usize)> {
        self.pages.lock().clone()
    }
}

impl ProgressSink for CollectingProgress {
    fn on_page(&self, progress: &FetchProgress, batch: &[Value]) {
        self.pages.lock().push((*progress, batch.len()));
    }
}

/// Decode the `message` field of a form-encoded action request.
pub fn form_message(body: &[u8]) -> Value {
    let message = url::form_urlencoded::parse(body)
        .find(|(key, _)| key == MESSAGE_FIELD)
        .map(|(_, value)| value.into_owned())
        .expect("message field");
    serde_json::from_str(&message).unwrap()
}
