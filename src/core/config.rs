use crate::errors::{ErrorCategory, Result, ServerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variables with this prefix override file values, e.g. `RAGENT__CACHE__MAX_SIZE=64`.
pub const ENV_PREFIX: &str = "RAGENT";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub transport: TransportKind,
    pub bind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Tcp,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
    pub retry_on: Vec<ErrorCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub default_timeout_ms: u64,
    /// Command line of the automation driver; empty means no backend.
    pub driver_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transport: TransportKind::Stdio,
            bind: "127.0.0.1:8765".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 256,
            ttl_secs: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: Some(10_000),
            jitter: true,
            retry_on: vec![ErrorCategory::Timeout, ErrorCategory::Unavailable],
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            driver_command: vec![],
        }
    }
}

impl Config {
    /// Loads defaults, then `path` (if given), then `RAGENT__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ServerError::ConfigurationError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ServerError::ConfigurationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ServerError::ConfigurationError(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.batch.max_concurrency == 0 {
            return Err(ServerError::ConfigurationError(
                "batch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(ServerError::ConfigurationError(
                "session.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.tools.default_timeout_ms == 0 {
            return Err(ServerError::ConfigurationError(
                "tools.default_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_size, 256);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.server.transport, TransportKind::Stdio);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ServerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cache": {"max_size": 8}, "batch": {}}"#).unwrap();
        assert_eq!(config.cache.max_size, 8);
        assert!(config.cache.enabled);
        assert_eq!(config.batch.max_concurrency, 4);
        assert_eq!(
            config.retry.retry_on,
            vec![ErrorCategory::Timeout, ErrorCategory::Unavailable]
        );
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let result = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ServerError::ConfigurationError(_))));
    }
}
