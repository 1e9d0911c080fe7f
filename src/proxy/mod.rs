pub mod error;
pub mod router;
pub mod shutdown;

use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::accumulator::{AccumulatorStore, TokioScheduler};
use crate::capture::{
    CaptureCounters, CaptureHub, CapturePipeline, DelimitedFormatter, ResultSink, TracingNotifier,
};
use crate::classify::ProtocolRules;
use crate::config::{Config, ConfigError};
use crate::proxy::error::ProxyError;
use crate::proxy::router::{build_router, AppState};
use crate::proxy::shutdown::ShutdownManager;
use crate::reconstruct::Reconstructor;
use crate::transport::{HttpTransport, InterceptingTransport, Transport};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}

/// The forwarding proxy with its capture pipeline and control API.
pub struct ProxyServer {
    pub addr: SocketAddr,
    /// The bound listener, populated by bind(), consumed by run().
    listener: Option<TcpListener>,
    bind_addr: String,
    control_prefix: String,
    state: AppState,
    shutdown: Arc<ShutdownManager>,
}

impl ProxyServer {
    /// Wire the full pipeline over a reqwest-backed transport.
    ///
    /// Must be called inside a Tokio runtime; flush timers are spawned on it.
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.transport)?);
        Self::with_transport(config, http)
    }

    /// Same as [`new`](Self::new) with a caller-supplied inner transport.
    pub fn with_transport(config: &Config, inner: Arc<dyn Transport>) -> Result<Self, ProxyError> {
        let scheduler = TokioScheduler::current()
            .ok_or_else(|| ProxyError::Internal("no Tokio runtime for flush timers".to_string()))?;
        let rules = ProtocolRules::from_config(&config.protocol).map_err(|e| {
            ConfigError::ValidationError {
                message: format!("Invalid protocol pattern: {}", e),
            }
        })?;

        let counters = Arc::new(CaptureCounters::default());
        let hub = Arc::new(CaptureHub::new(
            config.capture.history,
            Arc::new(TracingNotifier::new(config.proxy.control_prefix.clone())),
            counters.clone(),
        ));
        let sink: Arc<dyn ResultSink> = hub.clone();
        let store = AccumulatorStore::new(
            Arc::new(scheduler),
            sink.clone(),
            Duration::from_millis(config.capture.flush_delay_ms),
        );
        let pipeline = Arc::new(CapturePipeline::new(rules, store.clone(), sink));

        let intercepting = InterceptingTransport::new(inner, pipeline)
            .with_body_limit(config.transport.max_observed_body_bytes());
        let reconstructor = Arc::new(Reconstructor::new(
            intercepting.inner(),
            config.fetch.batch_size,
        ));

        let state = AppState {
            transport: Arc::new(intercepting),
            upstream_base_url: config.proxy.upstream_base_url.clone(),
            hub,
            store,
            counters,
            reconstructor,
            formatter: Arc::new(DelimitedFormatter::default()),
            fetches: Arc::default(),
        };

        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            listener: None,
            bind_addr: config.proxy.bind_addr.clone(),
            control_prefix: config.proxy.control_prefix.clone(),
            state,
            shutdown: Arc::new(ShutdownManager::new()),
        })
    }

    /// Bind the configured address. The listener is kept until run().
    pub async fn bind(&mut self) -> Result<SocketAddr, ProxyError> {
        let addr: SocketAddr = self.bind_addr.parse().map_err(|e| {
            ConfigError::ValidationError {
                message: format!("Invalid bind address '{}': {}", self.bind_addr, e),
            }
        })?;

        let listener = TcpListener::bind(addr).await?;
        self.addr = listener.local_addr()?;
        self.listener = Some(listener);
        tracing::info!(addr = %self.addr, upstream = %self.state.upstream_base_url, "Proxy bound");
        Ok(self.addr)
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.control_prefix)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serve until shutdown is signalled.
    ///
    /// Binds first if bind() was not called.
    pub async fn run(mut self) -> Result<(), ProxyError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ProxyError::Internal("listener missing after bind".to_string()))?;

        tracing::info!(
            addr = %self.addr,
            control = %self.control_prefix,
            "Starting proxy server"
        );

        let app = self.router();
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = shutdown.wait_for_shutdown().await {
                    tracing::warn!(error = %e, "Signal handler failed; stopping");
                }
            })
            .into_future()
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

#[derive(Clone)]
pub struct ProxyHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ProxyHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}
