//! Command-line interface
//!
//! `chat_relay server` runs the relay; `chat_relay client` connects the
//! reference terminal client.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{ClientConfig, ServerConfig, DEFAULT_PORT};
use crate::error::AppError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TOML configuration file. Flags below override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ServerArgs {
    /// Resolve the effective server configuration
    pub fn into_config(self) -> Result<ServerConfig, AppError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host running the relay.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port the relay listens on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl ClientArgs {
    pub fn into_config(self) -> ClientConfig {
        ClientConfig {
            host: self.host,
            port: self.port,
        }
    }
}
