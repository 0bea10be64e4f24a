//! Error types for the chat relay
//!
//! Defines application-level errors and per-peer delivery errors.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Application-level errors
///
/// `Bind` and `Config*` are fatal at startup. Everything raised while a
/// connection is being served is contained to that connection.
#[derive(Debug, Error)]
pub enum AppError {
    /// Listening socket could not be opened (fatal)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Client could not reach the server
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error on a single connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (over-long line or IO failure underneath the codec)
    #[error("line codec error: {0}")]
    Line(#[from] LinesCodecError),

    /// Configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the expected shape
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    /// A configuration value is out of range
    #[error("invalid config value `{field}`: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },

    /// The registry actor has stopped
    #[error("session registry closed")]
    RegistryClosed,

    /// A session's username is final once set
    #[error("username already set")]
    UsernameAlreadySet,
}

/// Per-peer delivery errors
///
/// Returned when a line cannot be queued for one session. The registry
/// logs these and moves on to the next peer.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session's writer has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// The session's outbound queue is full (slow consumer)
    #[error("Outbound queue full")]
    QueueFull,
}

/// Convenience for binding errors where only the address string is known
pub(crate) fn bind_error(addr: impl Into<String>, source: std::io::Error) -> AppError {
    AppError::Bind {
        addr: addr.into(),
        source,
    }
}

/// Helper used by the client to build a connect failure
pub(crate) fn connect_error(addr: impl Into<String>, source: std::io::Error) -> AppError {
    AppError::Connect {
        addr: addr.into(),
        source,
    }
}
