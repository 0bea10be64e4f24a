//! Session struct definition
//!
//! Represents one accepted connection with its identity and outbound queue.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::error::{AppError, SendError};
use crate::types::SessionId;

/// Connected session information
///
/// Owned by the connection handler for its whole lifetime. The username is
/// unset until the handshake completes and final afterwards.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this connection
    pub id: SessionId,
    /// Remote address, for logging
    pub peer: String,
    /// Accept time
    pub created_at: DateTime<Local>,
    /// Username (None before handshake)
    username: Option<String>,
    /// Server → Client line queue, drained by the session's writer task
    outbound: mpsc::Sender<Arc<str>>,
}

impl Session {
    /// Create a new session for a freshly accepted connection
    pub fn new(peer: impl Into<String>, outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: SessionId::new(),
            peer: peer.into(),
            created_at: Local::now(),
            username: None,
            outbound,
        }
    }

    /// The username, once the handshake has completed
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the username if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }

    /// Check if this session has completed the handshake
    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    /// Set the session's username
    ///
    /// Fails if it was already set; a username never changes once chosen.
    pub fn set_username(&mut self, username: String) -> Result<(), AppError> {
        if self.username.is_some() {
            return Err(AppError::UsernameAlreadySet);
        }
        self.username = Some(username);
        Ok(())
    }

    /// The view of this session the registry keeps for broadcasting
    ///
    /// `None` until the username is set, so an unnamed session can't be registered.
    pub fn handle(&self) -> Option<SessionHandle> {
        let username = self.username.clone()?;
        Some(SessionHandle {
            id: self.id,
            username,
            outbound: self.outbound.clone(),
        })
    }
}

/// Non-owning registry entry for a session
///
/// Holds only what a broadcast needs. Dropping every handle (and the
/// owning [`Session`]) closes the outbound queue, which ends the writer.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub username: String,
    outbound: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    /// Queue a line for this session without waiting
    ///
    /// A full queue means the peer isn't keeping up; the line is dropped
    /// for this peer only.
    pub fn try_deliver(&self, line: Arc<str>) -> Result<(), SendError> {
        self.outbound.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}
