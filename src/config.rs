/*!
 * Configuration file support
 *
 * One TOML file configures every role of the `vhal` binary:
 *
 * ```toml
 * [server]
 * listen_addr = "0.0.0.0:50051"
 * hardware_op_timeout_ms = 1000
 *
 * [client]
 * service_addr = "10.0.2.2:50051"
 * rpc_timeout = 2000
 *
 * [logging]
 * level = "debug"
 *
 * [[properties]]
 * prop = 0x21400101
 * access = "read_write"
 * change_mode = "on_change"
 * initial = { int32_values = [0] }
 * ```
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vhal_connect::ClientConfig;
use vhal_proxy::{ProxyConfig, DEFAULT_HARDWARE_OP_TIMEOUT};

use crate::error::{ConfigError, Result};
use crate::fake::PropertyDefinition;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VhalConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,

    /// Properties added to the built-in fake property set
    pub properties: Vec<PropertyDefinition>,
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address as `host:port`
    pub listen_addr: String,

    /// How long a set/get RPC waits for the hardware
    pub hardware_op_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let proxy = ProxyConfig::default();
        Self {
            listen_addr: proxy.server_addr,
            hardware_op_timeout_ms: DEFAULT_HARDWARE_OP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            server_addr: self.listen_addr.clone(),
            hardware_op_timeout: Duration::from_millis(self.hardware_op_timeout_ms),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,

    /// JSON log file; stdout when unset
    pub log_file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl VhalConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: VhalConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject settings that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("server.listen_addr is empty".into()));
        }
        if self.server.hardware_op_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.hardware_op_timeout_ms must be positive".into(),
            ));
        }
        if self.client.service_addr.is_empty() {
            return Err(ConfigError::Invalid("client.service_addr is empty".into()));
        }
        if self.client.reconnect_backoff.is_zero()
            || self.client.max_reconnect_backoff < self.client.reconnect_backoff
        {
            return Err(ConfigError::Invalid(
                "client reconnect backoff must be positive and not above its maximum".into(),
            ));
        }
        for definition in &self.properties {
            let config = &definition.config;
            if config.max_sample_rate < config.min_sample_rate {
                return Err(ConfigError::Invalid(format!(
                    "property {:#x}: max_sample_rate below min_sample_rate",
                    config.prop
                )));
            }
        }
        Ok(())
    }
}
