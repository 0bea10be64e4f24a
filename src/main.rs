//! Chat relay - Entry Point
//!
//! `server` binds the listener and serves until Ctrl-C; `client` runs the
//! reference terminal client.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::cli::{Cli, Command};
use chat_relay::{client, AppError, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    // Logs go to stderr so the client's stdout only carries chat text
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = args.into_config()?;
            let server = Server::bind(config).await?;
            info!("Chat relay listening on {}", server.local_addr()?);

            server.run_until_ctrl_c().await;
            Ok(())
        }
        Command::Client(args) => {
            let code = match client::run(&args.into_config()).await {
                Ok(()) => 0,
                Err(e @ AppError::Connect { .. }) => {
                    error!("{}", e);
                    println!("Unable to connect to the server");
                    1
                }
                Err(e) => {
                    error!("Client error: {}", e);
                    1
                }
            };
            // stdin's reader thread may still be parked on a read; don't wait for it
            std::process::exit(code);
        }
    }
}
