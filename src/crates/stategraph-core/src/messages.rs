//! Conversation message envelope.
//!
//! The state's message log stores one envelope per message: role, content,
//! the turn the message belongs to, and a timestamp. The turn tag is what
//! lets the submission-time evaluator reconstruct `(user, ai)` pairs when the
//! cached turn mapping is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions or context for the model.
    System,
    /// Participant message.
    User,
    /// Model reply.
    Assistant,
}

impl MessageRole {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One message in the session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Who produced the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Turn the message belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    /// Creation time, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            turn: None,
            timestamp: None,
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            turn: None,
            timestamp: None,
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            turn: None,
            timestamp: None,
        }
    }

    /// Tag the message with its turn number.
    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = Some(turn);
        self
    }

    /// Stamp the message with the current time.
    pub fn with_timestamp_now(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }

    /// True when the content is empty or whitespace-only.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}
