//! Conversation Transcript
//!
//! The ordered message list the coordinator renders into surfaces.
//!
//! # Design Philosophy
//!
//! A conversation owns message text and metadata; surfaces own rendered
//! state. At most one assistant message streams at a time, and a failed
//! stream leaves no partial reply behind: it is removed and replaced by a
//! single error message.

use chrono::{DateTime, Utc};

use crate::messages::{ContentType, ConversationId, MessageId, MessageRole};
use crate::surface::SurfaceHandle;

/// A message in the transcript
#[derive(Clone, Debug)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Raw message text
    pub content: String,
    /// Rendering hint
    pub content_type: ContentType,
    /// Whether the message is still being streamed
    pub streaming: bool,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Surface the message renders into, if any
    pub surface: Option<SurfaceHandle>,
}

impl ChatMessage {
    /// Create a finished message
    pub fn new(role: MessageRole, content: String, content_type: ContentType) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            content_type,
            streaming: false,
            timestamp: Utc::now(),
            surface: None,
        }
    }

    /// Create an empty assistant message that will be streamed into `surface`
    pub fn streaming(surface: SurfaceHandle) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: String::new(),
            content_type: ContentType::Markdown,
            streaming: true,
            timestamp: Utc::now(),
            surface: Some(surface),
        }
    }

    /// Attach a surface
    #[must_use]
    pub fn with_surface(mut self, surface: SurfaceHandle) -> Self {
        self.surface = Some(surface);
        self
    }
}

/// The current conversation
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    messages: Vec<ChatMessage>,
    streaming_id: Option<MessageId>,
    started_at: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Start an empty conversation with a fresh ID
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    /// Start an empty conversation with a known ID
    #[must_use]
    pub fn with_id(id: ConversationId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            streaming_id: None,
            started_at: Utc::now(),
        }
    }

    /// Conversation ID sent with every prompt
    #[must_use]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// When this conversation began
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Messages in display order
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look up a message
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// The message currently streaming, if any
    #[must_use]
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.streaming_id.as_ref().and_then(|id| self.get(id))
    }

    /// Append a user prompt
    pub fn add_user_message(&mut self, content: String) -> MessageId {
        let msg = ChatMessage::new(MessageRole::User, content, ContentType::Plain);
        let id = msg.id.clone();
        self.messages.push(msg);
        id
    }

    /// Begin an assistant reply rendered into `surface`
    ///
    /// A reply still streaming is cancelled (removed) first.
    pub fn start_assistant_response(&mut self, surface: SurfaceHandle) -> MessageId {
        if let Some(previous) = self.streaming_id.clone() {
            self.cancel_streaming(&previous);
        }
        let msg = ChatMessage::streaming(surface);
        let id = msg.id.clone();
        self.messages.push(msg);
        self.streaming_id = Some(id.clone());
        id
    }

    /// Append text to the streaming reply
    ///
    /// Returns `false` if `id` is not the streaming message.
    pub fn append_streaming(&mut self, id: &MessageId, text: &str) -> bool {
        if self.streaming_id.as_ref() != Some(id) {
            return false;
        }
        match self.get_mut(id) {
            Some(msg) => {
                msg.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Finish the streaming reply
    pub fn complete_streaming(&mut self, id: &MessageId) -> Option<&ChatMessage> {
        if self.streaming_id.as_ref() == Some(id) {
            self.streaming_id = None;
        }
        let msg = self.get_mut(id)?;
        msg.streaming = false;
        Some(msg)
    }

    /// Remove a partial reply
    pub fn cancel_streaming(&mut self, id: &MessageId) -> Option<ChatMessage> {
        if self.streaming_id.as_ref() == Some(id) {
            self.streaming_id = None;
        }
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Append an assistant error message rendered into `surface`
    pub fn add_assistant_error(&mut self, content: String, surface: SurfaceHandle) -> MessageId {
        let msg = ChatMessage::new(MessageRole::Assistant, content, ContentType::Error)
            .with_surface(surface);
        let id = msg.id.clone();
        self.messages.push(msg);
        id
    }

    /// Drop every message, keeping the conversation ID
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_id = None;
    }

    /// Replace this conversation with a fresh one
    pub fn reset(&mut self) -> &ConversationId {
        *self = Self::new();
        &self.id
    }
}
