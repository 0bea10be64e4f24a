//! Reference terminal client
//!
//! Two activities share one `awaiting_username` flag: a receiver task that
//! prints server lines and raises the flag on [`ENTER_USERNAME`], and the
//! input loop that reads local lines and either answers the username
//! request or sends chat. The client ends when the user types `exit`, local
//! input ends, or the server goes away.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{connect_error, AppError};
use crate::message::{is_exit, ENTER_USERNAME};

pub const WELCOME: &str = "Welcome to the Chat Room!";
pub const USERNAME_PROMPT: &str = "Please enter your username: ";
pub const EMPTY_USERNAME: &str = "Username cannot be empty. Please try again.";
pub const CONNECTION_LOST: &str = "[System] Connection to the server has been lost.";

/// Shared local display
///
/// Both the receiver task and the input loop write here; each write holds
/// the lock, so lines never interleave mid-line.
pub struct Console<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Print a full line
    pub async fn line(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }

    /// Print without a newline, leaving the cursor after the text
    pub async fn prompt(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }
}

/// Username request raised by the receiver, answered by the input loop
#[derive(Default)]
struct UsernameRequest {
    awaiting: AtomicBool,
    raised: Notify,
}

impl UsernameRequest {
    fn raise(&self) {
        self.awaiting.store(true, Ordering::SeqCst);
        self.raised.notify_one();
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.awaiting.store(false, Ordering::SeqCst);
    }
}

/// Connect to the configured server and chat over stdin/stdout
pub async fn run(config: &ClientConfig) -> Result<(), AppError> {
    let addr = config.server_addr();
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| connect_error(&addr, e))?;
    info!("Connected to {}", addr);

    let (reader, writer) = stream.into_split();
    run_session(
        reader,
        writer,
        BufReader::new(tokio::io::stdin()),
        Console::new(tokio::io::stdout()),
    )
    .await
}

/// Run a client session over any transport and local console
pub async fn run_session<R, W, I, O>(
    reader: R,
    writer: W,
    input: I,
    console: Console<O>,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let request = Arc::new(UsernameRequest::default());
    let mut receiver = tokio::spawn(receive_loop(
        reader,
        console.clone(),
        Arc::clone(&request),
    ));

    console.line(WELCOME).await?;

    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    let mut input = input.lines();

    let result = tokio::select! {
        result = input_loop(&mut input, &mut sink, &console, &request) => result,
        received = &mut receiver => match received {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e).into()),
        },
    };

    receiver.abort();
    let _ = SinkExt::<String>::close(&mut sink).await;
    result
}

/// Print everything the server sends, except the username sentinel
async fn receive_loop<R, O>(
    reader: R,
    console: Console<O>,
    request: Arc<UsernameRequest>,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new());

    while let Some(frame) = lines.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                console.line(CONNECTION_LOST).await?;
                return Err(e.into());
            }
        };
        if line == ENTER_USERNAME {
            debug!("Server requested a username");
            request.raise();
        } else {
            console.line(&line).await?;
        }
    }

    info!("Disconnected from server");
    Ok(())
}

/// Read local lines and send them; returns once the session should end
async fn input_loop<I, W, O>(
    input: &mut Lines<I>,
    sink: &mut FramedWrite<W, LinesCodec>,
    console: &Console<O>,
    request: &UsernameRequest,
) -> Result<(), AppError>
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut prompted = false;

    loop {
        if request.is_awaiting() && !prompted {
            console.prompt(USERNAME_PROMPT).await?;
            prompted = true;
        }

        let line = tokio::select! {
            _ = request.raised.notified() => continue,
            line = input.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("Local input closed");
            return Ok(());
        };

        if request.is_awaiting() {
            prompted = false;
            if line.trim().is_empty() {
                console.line(EMPTY_USERNAME).await?;
                continue;
            }
            sink.send(line).await?;
            request.clear();
            continue;
        }

        let exit = is_exit(&line);
        sink.send(line).await?;
        if exit {
            return Ok(());
        }
    }
}
