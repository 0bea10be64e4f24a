//! TCP accept loop
//!
//! Binds the listening socket, spawns one handler task per accepted
//! connection, and on shutdown stops accepting, cancels every live session
//! and waits for their close steps to finish.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{bind_error, AppError};
use crate::handler::handle_connection;
use crate::registry::SessionRegistry;

/// Pause after a failed accept (EMFILE and friends tend to repeat)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The chat relay server
pub struct Server {
    listener: TcpListener,
    registry: SessionRegistry,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind the listening socket and start the session registry
    ///
    /// Fails with [`AppError::InvalidSetting`] for an unusable config and
    /// [`AppError::Bind`] if the address is unavailable.
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        config.validate()?;
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| bind_error(addr, e))?;
        let registry = SessionRegistry::spawn(config.registry_buffer);

        Ok(Self {
            listener,
            registry,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registry shared by every connection of this server
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept connections until the process is terminated
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until Ctrl-C
    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
            }
        })
        .await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Accept failures are logged and do not stop the loop.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            registry,
            config,
        } = self;
        let sessions = CancellationToken::new();
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Chat relay started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let registry = registry.clone();
                        let config = Arc::clone(&config);
                        let token = sessions.clone();

                        // Spawn handler task for each connection
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, registry, config, token).await {
                                warn!(peer = %addr, "Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => accept_failed(e).await,
                },
                // Reap finished handlers so the set only holds live ones
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("Chat relay shutting down");
        drop(listener);
        sessions.cancel();
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        info!("Chat relay stopped");
    }
}

async fn accept_failed(e: io::Error) {
    error!("Failed to accept connection: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Bind `port` on all interfaces and serve forever
///
/// Only returns on a bind failure.
pub async fn run(port: u16) -> Result<(), AppError> {
    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };
    Server::bind(config).await?.run().await;
    Ok(())
}
