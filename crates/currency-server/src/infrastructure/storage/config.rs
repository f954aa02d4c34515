//! TOML-based configuration for the currency server.
//!
//! The file is read from `--config <path>` when given, otherwise from the
//! platform config directory:
//! - Windows:  `%APPDATA%\RemoteCurrency\server.toml`
//! - others:   `$XDG_CONFIG_HOME/remote-currency/server.toml`
//!   (falling back to `~/.config/remote-currency/server.toml`)
//!
//! Every field has a default, so a missing file, a missing section or a
//! missing key all fall back to the built-in values:
//!
//! ```toml
//! [server]
//! log_level = "info"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! port = 12345
//! max_connections = 64
//!
//! [connection]
//! input_buffer_capacity = 16384   # 0 = default
//! output_buffer_capacity = 16384  # 0 = default
//! max_line_length = 1024          # CR LF included; 0 = default
//!
//! [rates]
//! base = "USD"
//!
//! [rates.table]
//! EUR = 1.08
//! GBP = 1.27
//! ```

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use linecmd_core::connection::DEFAULT_BUFFER_CAPACITY;
use linecmd_core::{ConnectionConfig, LineConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::rates::{RateError, RateTable, DEFAULT_BASE_CURRENCY, DEFAULT_RATES};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `network.bind_address` is not an IP address.
    #[error("invalid bind address {value:?}: {source}")]
    InvalidBindAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// The `[rates]` section does not describe a usable rate table.
    #[error("invalid rates: {0}")]
    InvalidRates(#[from] RateError),

    /// The receive buffer cannot hold one full-length line.
    #[error(
        "connection.input_buffer_capacity ({capacity}) is smaller than \
         connection.max_line_length ({max_line_length})"
    )]
    BufferSmallerThanLine {
        capacity: usize,
        max_line_length: usize,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub rates: RatesConfig,
}

/// General server behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on; 0 picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connections accepted beyond this many live ones are dropped at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Per-connection buffer and line limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    #[serde(default)]
    pub input_buffer_capacity: usize,
    #[serde(default)]
    pub output_buffer_capacity: usize,
    #[serde(default)]
    pub max_line_length: usize,
}

/// Exchange rates: value of one unit of each currency in `base`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatesConfig {
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default = "default_rate_table")]
    pub table: BTreeMap<String, f64>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    12345
}
fn default_max_connections() -> usize {
    64
}
fn default_base() -> String {
    DEFAULT_BASE_CURRENCY.to_string()
}
fn default_rate_table() -> BTreeMap<String, f64> {
    DEFAULT_RATES
        .iter()
        .map(|(code, rate)| (code.to_string(), *rate))
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            table: default_rate_table(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// The address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` is not an
    /// IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr =
            self.bind_address
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddress {
                    value: self.bind_address.clone(),
                    source,
                })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl ConnectionSection {
    /// Byte-stream settings for one connection named `name`.
    pub fn connection_config(&self, name: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            name: name.into(),
            input_buffer_capacity: self.input_buffer_capacity,
            output_buffer_capacity: self.output_buffer_capacity,
        }
    }

    pub fn line_config(&self) -> LineConfig {
        LineConfig::with_max_line_length(self.max_line_length)
    }

    /// Checks that a full-length line fits in the receive buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BufferSmallerThanLine`] otherwise; such a
    /// connection would fail every maximal line with a buffer overflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = match self.input_buffer_capacity {
            0 => DEFAULT_BUFFER_CAPACITY,
            n => n,
        };
        let max_line_length = self.line_config().effective_max_line_length();
        if capacity < max_line_length {
            return Err(ConfigError::BufferSmallerThanLine {
                capacity,
                max_line_length,
            });
        }
        Ok(())
    }
}

impl RatesConfig {
    /// Builds the rate table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRates`] for a bad code or a rate that is
    /// not finite and positive.
    pub fn to_table(&self) -> Result<RateTable, ConfigError> {
        let mut table = RateTable::new(&self.base)?;
        for (code, rate) in &self.table {
            table.insert(code, *rate)?;
        }
        Ok(table)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path, if the platform config directory
/// can be determined from the environment.
pub fn default_config_path() -> Option<PathBuf> {
    platform_config_dir().map(|dir| dir.join("server.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::BufferSmallerThanLine`] if the `[connection]` limits
/// contradict each other.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            config.connection.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RemoteCurrency"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("remote-currency"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
