//! Server and client configuration
//!
//! The server config can be loaded from a TOML file; every field has a
//! default so the relay runs without one. Command-line flags override
//! whatever the file says.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Default TCP port for both server and client
pub const DEFAULT_PORT: u16 = 12345;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Lines a session may have queued before new ones are dropped for it
    pub outbound_queue: usize,
    /// Registry command channel capacity
    pub registry_buffer: usize,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
    /// Upper bound for a single socket write to one peer
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            outbound_queue: 32,
            registry_buffer: 256,
            max_line_length: 8192,
            write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse from TOML text; missing keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with
    ///
    /// Queue capacities, the line limit and the write timeout must all be
    /// non-zero.
    pub fn validate(&self) -> Result<(), AppError> {
        let sizes = [
            ("outbound_queue", self.outbound_queue),
            ("registry_buffer", self.registry_buffer),
            ("max_line_length", self.max_line_length),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(AppError::InvalidSetting {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if self.write_timeout_secs == 0 {
            return Err(AppError::InvalidSetting {
                field: "write_timeout_secs",
                reason: "must be at least one second",
            });
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Reference client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    /// `host:port` to connect to
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
