//! Chat Messages and UI Updates
//!
//! Identifiers and enums shared by the transcript model, plus the
//! [`ChatUpdate`] events the stream coordinator publishes to a UI shell.
//!
//! # Design Philosophy
//!
//! The coordinator owns all rendering state. A UI shell subscribes to
//! `ChatUpdate`s and re-serializes the surfaces they name; it never decides
//! what to render on its own. That keeps the same core usable from a web
//! view, a TUI or a headless test.

use serde::{Deserialize, Serialize};

use crate::surface::SurfaceId;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier, sent to the chat endpoint with every prompt
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a fresh random conversation ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// User input
    User,
    /// The assistant
    Assistant,
    /// System message
    System,
}

/// Content type hints for message rendering
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ContentType {
    /// Plain text content (user prompts)
    #[default]
    Plain,
    /// Markdown-formatted content (assistant replies)
    Markdown,
    /// Error message content, rendered like a reply
    Error,
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// Updates published to the UI shell
#[derive(Clone, Debug, PartialEq)]
pub enum ChatUpdate {
    /// A message was appended to the transcript
    MessageAdded {
        /// Message ID
        id: MessageId,
        /// Who sent it
        role: MessageRole,
        /// Rendering hint
        content_type: ContentType,
        /// The message's surface, if it is rendered
        surface: Option<SurfaceId>,
    },

    /// A message was removed (a failed partial reply)
    MessageRemoved {
        /// Message ID
        id: MessageId,
    },

    /// A surface's content changed and should be re-serialized
    SurfaceUpdated {
        /// Owning message
        message_id: MessageId,
        /// Surface to re-serialize
        surface: SurfaceId,
    },

    /// The assistant reply finished and is fully rendered
    StreamEnded {
        /// Message ID that completed
        message_id: MessageId,
    },

    /// The assistant reply failed
    StreamFailed {
        /// Message ID of the removed partial reply
        message_id: MessageId,
        /// Error description
        error: String,
    },

    /// The transcript was cleared or a new conversation started
    ConversationReset {
        /// The conversation now active
        conversation_id: ConversationId,
    },
}
