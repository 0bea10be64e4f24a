//! Line protocol definitions
//!
//! Newline-delimited UTF-8 text in both directions. The server opens every
//! connection with the [`ENTER_USERNAME`] sentinel; the first line back is
//! the username and every following line is either [`EXIT_COMMAND`] or chat.
//! Everything the server relays is an [`OutboundMessage`] rendered as
//! `<timestamp> <username> ...`.

use chrono::{DateTime, Local, NaiveDateTime};

/// Sentinel sent by the server exactly once, before any other line
pub const ENTER_USERNAME: &str = "ENTER_USERNAME";

/// Chat-phase command that ends a session (matched case-insensitively)
pub const EXIT_COMMAND: &str = "exit";

/// `yyyy-MM-dd HH:mm:ss`, local server time
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rendered length of a [`TIMESTAMP_FORMAT`] timestamp
const TIMESTAMP_LEN: usize = 19;

/// What an outbound line announces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Sender completed the handshake
    Joined,
    /// Sender said something
    Chat(String),
    /// Sender's session closed
    Left,
}

/// Server → Client broadcast line
///
/// Carries its own timestamp so the text is fixed at the moment the
/// broadcast was issued, not when each peer's writer gets to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub timestamp: DateTime<Local>,
    pub sender: String,
    pub kind: MessageKind,
}

impl OutboundMessage {
    /// Join notice stamped with the current local time
    pub fn joined(sender: impl Into<String>) -> Self {
        Self::now(sender, MessageKind::Joined)
    }

    /// Chat line stamped with the current local time
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::now(sender, MessageKind::Chat(text.into()))
    }

    /// Departure notice stamped with the current local time
    pub fn left(sender: impl Into<String>) -> Self {
        Self::now(sender, MessageKind::Left)
    }

    fn now(sender: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            timestamp: Local::now(),
            sender: sender.into(),
            kind,
        }
    }

    /// Render to a single line of text (without the trailing newline)
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ts = self.timestamp.format(TIMESTAMP_FORMAT);
        match &self.kind {
            MessageKind::Joined => write!(f, "{} {} has joined the chat room.", ts, self.sender),
            MessageKind::Chat(text) => write!(f, "{} {} : {}", ts, self.sender, text),
            MessageKind::Left => write!(f, "{} {} has left the chat room.", ts, self.sender),
        }
    }
}

/// Client → Server line received after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// End the session; never relayed
    Exit,
    /// Relay verbatim to every other session
    Chat(String),
}

impl ClientLine {
    /// Classify a received line
    pub fn parse(line: String) -> Self {
        if is_exit(&line) {
            ClientLine::Exit
        } else {
            ClientLine::Chat(line)
        }
    }
}

/// True if `line` is exactly the exit command, ignoring case
///
/// Padded variants such as `" exit "` are ordinary chat.
pub fn is_exit(line: &str) -> bool {
    line.eq_ignore_ascii_case(EXIT_COMMAND)
}

/// Split a rendered line into its timestamp and the remainder after the space
///
/// Returns `None` if the line does not start with a well-formed timestamp.
pub fn split_timestamp(line: &str) -> Option<(NaiveDateTime, &str)> {
    let stamp = line.get(..TIMESTAMP_LEN)?;
    let rest = line.get(TIMESTAMP_LEN..)?.strip_prefix(' ')?;
    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((parsed, rest))
}
