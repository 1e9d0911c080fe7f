use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Local listener and upstream routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address for the local proxy server (host:port).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Base URL every non-control request is forwarded to.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// Path prefix reserved for the control API.
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connection timeout in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Largest response body handed to the observer, in MiB (default: 64).
    #[serde(default = "default_max_observed_body_mb")]
    pub max_observed_body_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Quiet period before a partial paginated result is flushed (default: 1500).
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    /// Number of finished results kept for the control API (default: 50).
    #[serde(default = "default_history")]
    pub history: usize,
}

/// Request-shape knobs of the host application's protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Query parameter marking a column-metadata preflight request.
    #[serde(default = "default_preflight_param")]
    pub preflight_param: String,
    /// Query parameter carrying the query id when the envelope lacks one.
    #[serde(default = "default_query_id_param")]
    pub query_id_param: String,
    /// Regex matching continuation-locator request URLs.
    #[serde(default = "default_locator_pattern")]
    pub locator_pattern: String,
    /// Regex matching the background query endpoint that is gated by preflights.
    #[serde(default = "default_background_pattern")]
    pub background_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Rows requested per reconstruction page (default: 49999).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8484".to_string()
}

fn default_upstream_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_control_prefix() -> String {
    "/_querytap".to_string()
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_timeout() -> u32 {
    120
}

fn default_max_observed_body_mb() -> u32 {
    64
}

fn default_flush_delay_ms() -> u64 {
    1500
}

fn default_history() -> usize {
    50
}

fn default_preflight_param() -> String {
    "columns".to_string()
}

fn default_query_id_param() -> String {
    "queryId".to_string()
}

fn default_locator_pattern() -> String {
    r"/query/[0-9A-Za-z]{15,18}-\d+".to_string()
}

fn default_background_pattern() -> String {
    "/tooling/query".to_string()
}

fn default_batch_size() -> usize {
    49_999
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream_base_url: default_upstream_base_url(),
            control_prefix: default_control_prefix(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            timeout_seconds: default_timeout(),
            max_observed_body_mb: default_max_observed_body_mb(),
        }
    }
}

impl TransportConfig {
    pub fn max_observed_body_bytes(&self) -> usize {
        self.max_observed_body_mb as usize * 1024 * 1024
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
            history: default_history(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            preflight_param: default_preflight_param(),
            query_id_param: default_query_id_param(),
            locator_pattern: default_locator_pattern(),
            background_pattern: default_background_pattern(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}
