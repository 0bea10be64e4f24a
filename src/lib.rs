//! Multi-client TCP Chat Relay Library
//!
//! A line-based chat relay: every connected client picks a username and
//! every line it sends is relayed, timestamped, to all other clients.
//!
//! # Features
//! - Username handshake (`ENTER_USERNAME` sentinel)
//! - Join / chat / leave broadcasts with `yyyy-MM-dd HH:mm:ss` timestamps
//! - No self-echo
//! - Bounded per-session outbound queues with write timeouts
//! - Graceful shutdown with departure notices
//! - Reference terminal client
//!
//! # Architecture
//! - `SessionRegistry` is an actor task owning all registered sessions
//! - Each connection has a `handler` task reading lines and a writer task
//!   draining that session's outbound queue
//! - No locks needed for membership - all access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_relay::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::bind(ServerConfig::default()).await.unwrap();
//!     server.run_until_ctrl_c().await;
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::{ClientConfig, ServerConfig};
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use message::{ClientLine, MessageKind, OutboundMessage, ENTER_USERNAME};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{Session, SessionHandle};
pub use types::SessionId;
