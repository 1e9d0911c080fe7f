mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{
    CaptureConfig, Config, FetchConfig, ProtocolConfig, ProxyConfig, TransportConfig,
};
