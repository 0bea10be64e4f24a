//! Line-based connection handler
//!
//! Handles individual client connections: the username handshake, relaying
//! chat lines through the [`SessionRegistry`], and the close step.
//!
//! Reads happen on the handler task. Writes go through a dedicated writer
//! task that drains the session's bounded outbound queue, so a peer that
//! stops reading only ever stalls its own writer.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::message::{ClientLine, OutboundMessage, ENTER_USERNAME};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::types::SessionId;

/// Handle a new TCP connection
///
/// Runs the session to completion. Errors are confined to this connection;
/// the caller only logs them.
pub async fn handle_connection(
    stream: TcpStream,
    registry: SessionRegistry,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer);

    let (reader, writer) = stream.into_split();
    serve(reader, writer, peer, registry, config, shutdown).await
}

/// Drive one session over an arbitrary byte stream split into halves
///
/// AwaitingUsername → Active → Closing. Closing runs exactly once whichever
/// way the first two phases end, including on error.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    peer: String,
    registry: SessionRegistry,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let write_timeout = config.write_timeout();
    let mut lines = FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(config.max_line_length),
    );
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    // Sentinel is written before the writer task exists, so it is always first
    send_line(&mut sink, ENTER_USERNAME, write_timeout).await?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Arc<str>>(config.outbound_queue);
    let mut session = Session::new(peer, outbound_tx);
    let session_id = session.id;
    info!(session = %session_id, peer = %session.peer, "Client connected");

    // Cancelled by server shutdown or by the writer giving up on the peer
    let closing = shutdown.child_token();
    let writer_task = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        write_timeout,
        closing.clone(),
        session_id,
    ));

    let result = run_session(&mut session, &mut lines, &registry, &closing).await;

    // Closing
    drop(lines);
    close_session(&registry, &session).await;
    drop(session);

    // Every sender is gone now; the writer flushes what is queued and shuts the socket
    if let Err(e) = writer_task.await {
        warn!(session = %session_id, "Write task failed: {}", e);
    }

    info!(session = %session_id, "Client disconnected");
    result
}

/// Handshake then chat loop; returns when the session should close
async fn run_session<R>(
    session: &mut Session,
    lines: &mut FramedRead<R, LinesCodec>,
    registry: &SessionRegistry,
    closing: &CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
{
    let Some(username) = await_username(session.id, lines, closing).await? else {
        debug!(session = %session.id, "Connection closed before handshake");
        return Ok(());
    };

    session.set_username(username)?;
    let Some(handle) = session.handle() else {
        return Ok(());
    };
    let notice = OutboundMessage::joined(session.display_name()).render();
    registry.join(handle, notice).await?;
    info!(session = %session.id, username = %session.display_name(), "Client joined");

    loop {
        let frame = tokio::select! {
            _ = closing.cancelled() => {
                debug!(session = %session.id, "Session cancelled");
                return Ok(());
            }
            frame = lines.next() => frame,
        };

        let line = match frame {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(e.into()),
            None => {
                debug!(session = %session.id, "Client closed the connection");
                return Ok(());
            }
        };

        match ClientLine::parse(line) {
            ClientLine::Exit => {
                debug!(session = %session.id, "Client sent exit");
                return Ok(());
            }
            ClientLine::Chat(text) => {
                let line = OutboundMessage::chat(session.display_name(), text).render();
                let delivered = registry.broadcast(line, Some(session.id)).await?;
                debug!(session = %session.id, delivered, "Relayed chat line");
            }
        }
    }
}

/// Read lines until a non-blank username arrives
///
/// `None` if the connection ends (or the session is cancelled) first.
async fn await_username<R>(
    id: SessionId,
    lines: &mut FramedRead<R, LinesCodec>,
    closing: &CancellationToken,
) -> Result<Option<String>, AppError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closing.cancelled() => return Ok(None),
            frame = lines.next() => frame,
        };

        match frame {
            Some(Ok(line)) => {
                let username = line.trim();
                if username.is_empty() {
                    debug!(session = %id, "Ignoring blank username");
                    continue;
                }
                return Ok(Some(username.to_string()));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(None),
        }
    }
}

/// Deregister `session` and announce its departure
///
/// Only the call that actually removes the session broadcasts, so calling
/// this again for the same session is a no-op. Returns whether this call
/// announced the departure.
pub async fn close_session(registry: &SessionRegistry, session: &Session) -> bool {
    if !session.has_username() {
        return false;
    }

    match registry.remove(session.id).await {
        Ok(Some(handle)) => {
            info!(session = %session.id, username = %handle.username, "Client left");
            let notice = OutboundMessage::left(handle.username).render();
            if let Err(e) = registry.broadcast(notice, None).await {
                warn!(session = %session.id, "Failed to announce departure: {}", e);
            }
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(session = %session.id, "Failed to deregister session: {}", e);
            false
        }
    }
}

/// Drain the outbound queue into the socket
async fn write_loop<W>(
    mut sink: FramedWrite<W, LinesCodec>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    write_timeout: Duration,
    closing: CancellationToken,
    id: SessionId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        if let Err(e) = send_line(&mut sink, line, write_timeout).await {
            warn!(session = %id, "Write failed, closing session: {}", e);
            closing.cancel();
            break;
        }
    }
    debug!(session = %id, "Write task ended");

    let _ = tokio::time::timeout(write_timeout, SinkExt::<Arc<str>>::close(&mut sink)).await;
}

/// Write one line, giving up after `limit`
async fn send_line<W, T>(
    sink: &mut FramedWrite<W, LinesCodec>,
    line: T,
    limit: Duration,
) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
    T: AsRef<str>,
{
    match tokio::time::timeout(limit, sink.send(line)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out").into()),
    }
}
