//! Control API routes and the forwarding fallback.

use axum::body::Body;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::header::{
    HeaderName, ACCEPT_ENCODING, CONNECTION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
    HOST, TRANSFER_ENCODING,
};
use axum::http::{Request, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::accumulator::AccumulatorStore;
use crate::capture::{CaptureCounters, CaptureHub, CaptureSummary, CounterSnapshot, ResultFormatter};
use crate::proxy::error::ProxyError;
use crate::reconstruct::{Reconstructor, Termination, TracingProgress};
use crate::transport::{HttpRequest, Transport};

/// Request headers not passed upstream. Dropping `accept-encoding` lets the
/// client negotiate compression itself so observed bodies arrive decoded.
const STRIPPED_REQUEST_HEADERS: [HeaderName; 4] = [HOST, ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH];

/// Response headers not copied back. The body is re-streamed, and a declared
/// length would let hyper stop polling before the observed stream ends.
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 3] = [CONNECTION, TRANSFER_ENCODING, CONTENT_LENGTH];

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Intercepting transport every forwarded request goes through.
    pub transport: Arc<dyn Transport>,
    pub upstream_base_url: String,
    pub hub: Arc<CaptureHub>,
    pub store: AccumulatorStore,
    pub counters: Arc<CaptureCounters>,
    pub reconstructor: Arc<Reconstructor>,
    pub formatter: Arc<dyn ResultFormatter>,
    /// Captures with a fetch-all currently running.
    pub fetches: Arc<Mutex<HashSet<Uuid>>>,
}

/// Marks a capture as being fetched until dropped.
struct FetchClaim {
    fetches: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl FetchClaim {
    fn acquire(fetches: &Arc<Mutex<HashSet<Uuid>>>, id: Uuid) -> Option<Self> {
        fetches.lock().insert(id).then(|| Self {
            fetches: fetches.clone(),
            id,
        })
    }
}

impl Drop for FetchClaim {
    fn drop(&mut self) {
        self.fetches.lock().remove(&self.id);
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub captures: usize,
    pub pending_queries: usize,
    pub counters: CounterSnapshot,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchParams {
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FetchAllResponse {
    #[serde(flatten)]
    pub capture: CaptureSummary,
    pub pages: usize,
    pub termination: Termination,
}

/// Build the router: control routes under `control_prefix`, everything else
/// forwarded upstream.
pub fn build_router(state: AppState, control_prefix: &str) -> Router {
    let control = Router::new()
        .route("/health", get(health))
        .route("/captures", get(list_captures))
        .route("/captures/{id}/download", get(download_capture))
        .route("/captures/{id}/fetch-all", post(fetch_all))
        .fallback(unknown_control_route);

    Router::new()
        .nest(control_prefix.trim_end_matches('/'), control)
        .fallback(forward)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        service: "querytap",
        captures: state.hub.len(),
        pending_queries: state.store.len(),
        counters: state.counters.snapshot(),
    })
}

async fn list_captures(State(state): State<AppState>) -> Json<Vec<CaptureSummary>> {
    Json(state.hub.summaries())
}

async fn download_capture(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response<Body>, ProxyError> {
    let entry = state.hub.get(id).ok_or(ProxyError::CaptureNotFound { id })?;
    let text = state
        .formatter
        .format(&entry.result.rows, &entry.result.columns)?;

    Ok(Response::builder()
        .header(CONTENT_TYPE, state.formatter.content_type())
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.csv\"", id),
        )
        .body(Body::from(text))?)
}

async fn fetch_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<FetchParams>,
) -> Result<Json<FetchAllResponse>, ProxyError> {
    let _claim = FetchClaim::acquire(&state.fetches, id).ok_or(ProxyError::FetchInProgress { id })?;

    let entry = state.hub.get(id).ok_or(ProxyError::CaptureNotFound { id })?;
    if !entry.result.can_fetch_more() {
        return Err(ProxyError::NotFetchable { id });
    }

    let offset = params.offset.unwrap_or(0);
    tracing::info!(capture = %id, offset, "Starting fetch-all");
    let outcome = state
        .reconstructor
        .resume(&entry.result, offset, &TracingProgress)
        .await?;

    let capture = state
        .hub
        .replace(id, outcome.result)
        .ok_or(ProxyError::CaptureNotFound { id })?;

    Ok(Json(FetchAllResponse {
        capture,
        pages: outcome.pages,
        termination: outcome.termination,
    }))
}

async fn unknown_control_route(OriginalUri(uri): OriginalUri) -> ProxyError {
    ProxyError::UnknownControlRoute(uri.path().to_string())
}

/// Forward any non-control request to the upstream through the
/// intercepting transport, streaming the response back.
async fn forward(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.upstream_base_url.trim_end_matches('/'),
        path_and_query
    );

    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let mut headers = parts.headers;
    for name in STRIPPED_REQUEST_HEADERS.iter() {
        headers.remove(name);
    }

    let request = HttpRequest {
        method: parts.method,
        url,
        headers,
        body,
    };
    tracing::debug!(method = %request.method, url = %request.url, "Forwarding request");

    let upstream = state.transport.send_streaming(request).await?;

    let mut builder = Response::builder().status(upstream.status);
    for (name, value) in upstream.headers.iter() {
        if !STRIPPED_RESPONSE_HEADERS.contains(name) {
            builder = builder.header(name, value);
        }
    }

    Ok(builder.body(Body::from_stream(upstream.body))?)
}
