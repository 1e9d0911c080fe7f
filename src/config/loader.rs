use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::config::types::Config;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/querytap/config.toml` on Unix,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("querytap").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - If the file exists, parses it as TOML and validates.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Loads and validates configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - The upstream base URL parses as an http(s) URL
    /// - Batch size and history capacity are non-zero
    /// - Both protocol patterns compile
    /// - The control prefix is an absolute path
    pub fn validate(&self) -> Result<(), ConfigError> {
        let upstream = &self.proxy.upstream_base_url;
        match Url::parse(upstream) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::ValidationError {
                    message: format!("Upstream base URL '{}' is not a valid http(s) URL", upstream),
                })
            }
        }

        if self.fetch.batch_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "fetch.batch_size must be greater than zero".to_string(),
            });
        }

        if self.capture.history == 0 {
            return Err(ConfigError::ValidationError {
                message: "capture.history must be greater than zero".to_string(),
            });
        }

        for (name, pattern) in [
            ("locator_pattern", &self.protocol.locator_pattern),
            ("background_pattern", &self.protocol.background_pattern),
        ] {
            if let Err(e) = Regex::new(pattern) {
                return Err(ConfigError::ValidationError {
                    message: format!("protocol.{} is not a valid regex: {}", name, e),
                });
            }
        }

        let prefix = &self.proxy.control_prefix;
        if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!("Control prefix '{}' must start with '/'", prefix),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = Config::default();
        config.fetch.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn rejects_bad_upstream() {
        let mut config = Config::default();
        config.proxy.upstream_base_url = "ftp://host".to_string();
        assert!(config.validate().is_err());
        config.proxy.upstream_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_relative_prefix() {
        let mut config = Config::default();
        config.proxy.control_prefix = "_querytap".to_string();
        assert!(config.validate().is_err());
    }
}
