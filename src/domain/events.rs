//! Relay event values: inbound client events and outbound queue entries.
//!
//! [`ChatMessage`] and [`TypingEvent`] are immutable once built. Fan-out
//! wraps them in an [`Arc`] so a single allocation is shared by every
//! session queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;
use crate::error::RelayError;

/// A chat message relayed to every connected session.
///
/// `seq` is zero until the broadcaster sequences the message; sequencing
/// yields a new value rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    handle: String,
    #[serde(rename = "message")]
    body: String,
    seq: u64,
}

impl ChatMessage {
    /// Creates an unsequenced chat message.
    #[must_use]
    pub fn new(handle: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            body: body.into(),
            seq: 0,
        }
    }

    /// Returns a copy of this message carrying the given sequence number.
    #[must_use]
    pub fn sequenced(self, seq: u64) -> Self {
        Self { seq, ..self }
    }

    /// Sender handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Message body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Broadcaster-assigned sequence number (`0` if not yet sequenced).
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

/// A "user is typing" notification. Only relayed or suppressed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingEvent {
    handle: String,
    #[serde(skip)]
    timestamp: DateTime<Utc>,
}

impl TypingEvent {
    /// Creates a typing event stamped with the current time.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            timestamp: Utc::now(),
        }
    }

    /// Sender handle.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// When the event was received.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// An entry in a session's outbound queue.
///
/// Serializes to the wire shape `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Sequenced chat message.
    ChatMessage(Arc<ChatMessage>),
    /// Typing indicator from another session.
    Typing(Arc<TypingEvent>),
    /// Sent once after the handshake.
    Welcome {
        /// Id issued to the receiving session.
        session_id: SessionId,
        /// Last sequence number assigned before this session joined.
        last_seq: u64,
    },
    /// Problem with a frame the receiving session sent.
    Error {
        /// Numeric error code (see [`RelayError::error_code`]).
        code: u32,
        /// Human-readable description.
        message: String,
    },
}

impl OutboundEvent {
    /// Returns the event name as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "chat-message",
            Self::Typing(_) => "typing",
            Self::Welcome { .. } => "welcome",
            Self::Error { .. } => "error",
        }
    }

    /// Sequence number for chat messages, `None` for everything else.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::ChatMessage(msg) => Some(msg.seq()),
            _ => None,
        }
    }

    /// Builds the error event reported back to a misbehaving session.
    #[must_use]
    pub fn from_error(err: &RelayError) -> Self {
        Self::Error {
            code: err.error_code(),
            message: err.to_string(),
        }
    }
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Chat message to relay to everyone.
    ChatMessage {
        /// Sender handle.
        handle: String,
        /// Message body.
        message: String,
    },
    /// Typing indicator to relay to everyone else.
    Typing {
        /// Sender handle.
        handle: String,
    },
}

impl InboundEvent {
    /// Sender handle carried by the event.
    #[must_use]
    pub fn handle(&self) -> &str {
        match self {
            Self::ChatMessage { handle, .. } | Self::Typing { handle } => handle,
        }
    }

    /// Checks field lengths against the configured limits.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidEvent`] for an empty or overlong handle
    /// or an overlong message body.
    pub fn validate(&self, max_handle_len: usize, max_message_len: usize) -> Result<(), RelayError> {
        let handle = self.handle();
        if handle.trim().is_empty() {
            return Err(RelayError::InvalidEvent("handle must not be empty".to_string()));
        }
        if handle.chars().count() > max_handle_len {
            return Err(RelayError::InvalidEvent(format!(
                "handle longer than {max_handle_len} characters"
            )));
        }
        if let Self::ChatMessage { message, .. } = self
            && message.chars().count() > max_message_len
        {
            return Err(RelayError::InvalidEvent(format!(
                "message longer than {max_message_len} characters"
            )));
        }
        Ok(())
    }
}
