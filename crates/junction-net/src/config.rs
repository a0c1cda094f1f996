//! TOML-based configuration for Junction clients and servers.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! [network]
//! host = "127.0.0.1"
//! port = 6868
//!
//! [transport]
//! chunk_size = 1024
//! read_buffer_size = 1024
//! idle_poll_ms = 100
//! ```
//!
//! The frame terminator is fixed by the wire format and has no setting here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

    /// A value parsed correctly but is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JunctionConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Where to listen (server) or where to connect (client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Hostname or IP address.  Servers bind it; clients resolve and connect to it.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.  `0` asks the OS for an ephemeral port when binding.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Per-connection tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Maximum number of bytes handed to the socket per write call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Size of the buffer each socket read fills.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Upper bound, in milliseconds, on how long an idle dispatch loop sleeps
    /// before re-checking its inbox.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

// ── Serde default functions ───────────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6868
}

fn default_chunk_size() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_idle_poll_ms() -> u64 {
    100
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_buffer_size: default_read_buffer_size(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl TransportConfig {
    /// The idle-poll bound as a [`Duration`].
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Rejects zero sizes and a zero poll interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("transport.chunk_size must be > 0".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "transport.read_buffer_size must be > 0".into(),
            ));
        }
        if self.idle_poll_ms == 0 {
            return Err(ConfigError::Invalid("transport.idle_poll_ms must be > 0".into()));
        }
        Ok(())
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

impl JunctionConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: JunctionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// errors of [`JunctionConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes the config as pretty-printed TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the config to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on any file system failure.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` if given, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// The errors of [`JunctionConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Replaces the network endpoint with whichever values are `Some`.
    pub fn with_network_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.network.host = host;
        }
        if let Some(port) = port {
            self.network.port = port;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
