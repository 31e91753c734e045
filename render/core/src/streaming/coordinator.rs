//! Stream Coordinator
//!
//! Owns the transcript and drives one reply at a time from its response
//! source into a surface.
//!
//! # Lifecycle of a reply
//!
//! ```text
//! send_message ──▶ user msg + empty assistant msg ──▶ source.open()
//!                                                        │
//!      ┌─────────────────── stream task ─────────────────┘
//!      │ ChunkReceived  → buffer (+ partial render, enhance in Direct mode)
//!      │ StreamEnded    → full render (or reveal) → enhance → clear partial cache
//!      │ StreamFailed /
//!      │ channel closed → remove partial msg → add one error msg → notify
//!      ▼
//!  active slot released, ticket resolved
//! ```
//!
//! Only one reply streams at a time. `new_conversation` and `clear_chat`
//! supersede it: the task is aborted and the surface's reveal cancelled.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use super::source::{ChatRequest, ChunkEvent, ResponseSource};
use super::{RenderMode, StreamConfig};
use crate::animation::RevealAnimator;
use crate::capabilities::{HostCapabilities, Notifier};
use crate::config::RenderConfig;
use crate::enhance::BlockEnhancer;
use crate::error::{SendError, StreamError};
use crate::markup::{MarkupService, SweeperHandle};
use crate::messages::{ChatUpdate, ContentType, ConversationId, MessageId, MessageRole, NotifyLevel};
use crate::session::{ChatMessage, Conversation};
use crate::surface::SurfaceHandle;

// ============================================================================
// Tickets
// ============================================================================

/// How a reply ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Fully rendered and enhanced
    Completed,
    /// Replaced by an error message
    Failed(StreamError),
    /// Aborted by `new_conversation`, `clear_chat` or `shutdown`
    Superseded,
}

/// Receipt for an accepted prompt
#[derive(Debug)]
pub struct StreamTicket {
    user_message_id: MessageId,
    message_id: MessageId,
    surface: SurfaceHandle,
    done: oneshot::Receiver<StreamOutcome>,
}

impl StreamTicket {
    /// The user message that was appended
    #[must_use]
    pub fn user_message_id(&self) -> &MessageId {
        &self.user_message_id
    }

    /// The assistant message being streamed
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Surface the reply renders into
    #[must_use]
    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }

    /// Wait for the reply to finish
    pub async fn wait(self) -> StreamOutcome {
        self.done.await.unwrap_or(StreamOutcome::Superseded)
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Per-reply state, owned by the stream task
#[derive(Debug)]
struct StreamSession {
    message_id: MessageId,
    surface: SurfaceHandle,
    /// Raw accumulated text, append-only
    buffer: String,
    /// Buffer length at the last render
    rendered_len: usize,
    complete: bool,
}

impl StreamSession {
    fn new(message_id: MessageId, surface: SurfaceHandle) -> Self {
        Self {
            message_id,
            surface,
            buffer: String::new(),
            rendered_len: 0,
            complete: false,
        }
    }

    fn has_unrendered(&self) -> bool {
        self.buffer.len() > self.rendered_len
    }
}

/// The reply currently holding the stream slot
#[derive(Debug)]
struct ActiveStream {
    message_id: MessageId,
    surface: SurfaceHandle,
    task: Option<AbortHandle>,
}

impl ActiveStream {
    fn is_stale(&self) -> bool {
        self.task.as_ref().is_some_and(AbortHandle::is_finished)
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    conversation: Conversation,
    active: Option<ActiveStream>,
    sweeper: Option<SweeperHandle>,
}

struct Shared {
    config: StreamConfig,
    sweep_interval: std::time::Duration,
    markup: Arc<MarkupService>,
    enhancer: Arc<BlockEnhancer>,
    animator: RevealAnimator,
    source: Arc<dyn ResponseSource>,
    notifier: Arc<dyn Notifier>,
    tx: mpsc::Sender<ChatUpdate>,
    state: Mutex<CoordinatorState>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives replies from a response source into surfaces
#[derive(Clone)]
pub struct StreamCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCoordinator")
            .field("source", &self.shared.source.name())
            .field("mode", &self.shared.config.mode)
            .field("streaming", &self.is_streaming())
            .finish_non_exhaustive()
    }
}

impl StreamCoordinator {
    /// Create a coordinator publishing UI updates on `tx`
    pub fn new(
        config: &RenderConfig,
        source: Arc<dyn ResponseSource>,
        host: HostCapabilities,
        tx: mpsc::Sender<ChatUpdate>,
    ) -> Self {
        let markup = Arc::new(MarkupService::new(config.markup.clone()));
        let enhancer = Arc::new(BlockEnhancer::new(
            config.enhance.clone(),
            host.diagrams,
            host.clipboard,
            host.executor,
            Arc::clone(&host.notifier),
        ));
        let animator = RevealAnimator::new(Arc::clone(&markup), config.reveal.clone());

        Self {
            shared: Arc::new(Shared {
                config: config.stream.clone(),
                sweep_interval: config.markup.sweep_interval,
                markup,
                enhancer,
                animator,
                source,
                notifier: host.notifier,
                tx,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    /// Start background maintenance (the full-cache sweeper)
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if state.sweeper.as_ref().is_some_and(SweeperHandle::is_active) {
            return;
        }
        state.sweeper = Some(self.shared.markup.spawn_sweeper(self.shared.sweep_interval));
        tracing::info!(
            source = self.shared.source.name(),
            mode = ?self.shared.config.mode,
            "Stream coordinator started"
        );
    }

    /// Stop background work and abort any streaming reply
    pub fn shutdown(&self) {
        let sweeper = self.shared.state.lock().sweeper.take();
        if let Some(mut sweeper) = sweeper {
            sweeper.cancel();
        }
        if let Some(id) = self.shared.supersede() {
            tracing::debug!(message_id = %id, "Aborted reply on shutdown");
        }
        tracing::info!("Stream coordinator stopped");
    }

    /// Markup service shared by every surface
    #[must_use]
    pub fn markup(&self) -> &Arc<MarkupService> {
        &self.shared.markup
    }

    /// Block enhancer, for copy / execute / toggle actions from the UI
    #[must_use]
    pub fn enhancer(&self) -> &Arc<BlockEnhancer> {
        &self.shared.enhancer
    }

    /// Render mode in use
    #[must_use]
    pub fn mode(&self) -> RenderMode {
        self.shared.config.mode
    }

    /// Whether a reply currently holds the stream slot
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|a| !a.is_stale())
    }

    /// Current conversation ID
    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        self.shared.state.lock().conversation.id().clone()
    }

    /// Snapshot of the transcript
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.state.lock().conversation.messages().to_vec()
    }

    /// Surface of a message, if it has one
    #[must_use]
    pub fn surface(&self, id: &MessageId) -> Option<SurfaceHandle> {
        self.shared
            .state
            .lock()
            .conversation
            .get(id)
            .and_then(|m| m.surface.clone())
    }

    /// Submit a prompt
    ///
    /// The user message is appended before the response source is opened.
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyPrompt`] for a blank prompt and
    /// [`SendError::StreamActive`] while another reply is streaming.
    pub async fn send_message(&self, prompt: &str) -> Result<StreamTicket, SendError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SendError::EmptyPrompt);
        }

        let surface = SurfaceHandle::new();
        let (user_message_id, message_id, conversation_id) = {
            let mut state = self.shared.state.lock();
            if state.active.as_ref().is_some_and(|a| !a.is_stale()) {
                tracing::debug!("Rejected prompt while a reply is streaming");
                return Err(SendError::StreamActive);
            }
            let user_id = state.conversation.add_user_message(prompt.to_string());
            let message_id = state.conversation.start_assistant_response(surface.clone());
            state.active = Some(ActiveStream {
                message_id: message_id.clone(),
                surface: surface.clone(),
                task: None,
            });
            (user_id, message_id, state.conversation.id().clone())
        };

        tracing::info!(
            message_id = %message_id,
            conversation_id = %conversation_id,
            prompt_len = prompt.len(),
            "Prompt submitted"
        );

        self.shared
            .send(ChatUpdate::MessageAdded {
                id: user_message_id.clone(),
                role: MessageRole::User,
                content_type: ContentType::Plain,
                surface: None,
            })
            .await;
        self.shared
            .send(ChatUpdate::MessageAdded {
                id: message_id.clone(),
                role: MessageRole::Assistant,
                content_type: ContentType::Markdown,
                surface: Some(surface.id()),
            })
            .await;

        let request = ChatRequest {
            prompt: prompt.to_string(),
            conversation_id,
        };
        let rx = self.shared.source.open(&request).await;

        let (done_tx, done_rx) = oneshot::channel();
        let session = StreamSession::new(message_id.clone(), surface.clone());
        let task = tokio::spawn(Arc::clone(&self.shared).run(session, rx, done_tx));

        {
            let mut state = self.shared.state.lock();
            match state.active.as_mut() {
                Some(active) if active.message_id == message_id => {
                    active.task = Some(task.abort_handle());
                }
                // Superseded while the source was opening
                _ => task.abort(),
            }
        }

        Ok(StreamTicket {
            user_message_id,
            message_id,
            surface,
            done: done_rx,
        })
    }

    /// Start a new conversation, abandoning any streaming reply
    pub async fn new_conversation(&self) -> ConversationId {
        self.shared.supersede();
        let id = self.shared.state.lock().conversation.reset().clone();
        self.shared.markup.clear_partial_cache();
        tracing::info!(conversation_id = %id, "New conversation");
        self.shared
            .send(ChatUpdate::ConversationReset {
                conversation_id: id.clone(),
            })
            .await;
        id
    }

    /// Clear the transcript, keeping the conversation ID
    pub async fn clear_chat(&self) {
        self.shared.supersede();
        let id = {
            let mut state = self.shared.state.lock();
            state.conversation.clear();
            state.conversation.id().clone()
        };
        self.shared.markup.clear_partial_cache();
        tracing::info!(conversation_id = %id, "Chat cleared");
        self.shared
            .send(ChatUpdate::ConversationReset { conversation_id: id })
            .await;
    }
}

impl Shared {
    /// Send a message to the UI shell
    async fn send(&self, update: ChatUpdate) {
        if let Err(e) = self.tx.send(update).await {
            tracing::warn!("Failed to publish chat update: {}", e);
        }
    }

    /// Abort the active reply; returns its message ID
    fn supersede(&self) -> Option<MessageId> {
        let active = self.state.lock().active.take()?;
        if let Some(task) = &active.task {
            task.abort();
        }
        active.surface.cancel_animation();
        tracing::debug!(message_id = %active.message_id, "Superseded streaming reply");
        Some(active.message_id)
    }

    /// Free the stream slot if `id` still holds it
    fn release(&self, id: &MessageId) {
        let mut state = self.state.lock();
        if state.active.as_ref().is_some_and(|a| &a.message_id == id) {
            state.active = None;
        }
    }

    async fn run(
        self: Arc<Self>,
        mut session: StreamSession,
        mut rx: mpsc::Receiver<ChunkEvent>,
        done: oneshot::Sender<StreamOutcome>,
    ) {
        let result = loop {
            match rx.recv().await {
                Some(ChunkEvent::ChunkReceived(text)) => {
                    session.buffer.push_str(&text);
                    self.state
                        .lock()
                        .conversation
                        .append_streaming(&session.message_id, &text);
                    if self.config.mode == RenderMode::Direct {
                        self.render_partial(&mut session).await;
                    }
                }
                Some(ChunkEvent::StreamEnded) => break Ok(()),
                Some(ChunkEvent::StreamFailed(error)) => break Err(error),
                None => break Err(StreamError::Disconnected),
            }
        };
        drop(rx);

        let outcome = match result {
            Ok(()) => self.finish(&mut session).await,
            Err(error) => {
                self.fail(&session, &error).await;
                StreamOutcome::Failed(error)
            }
        };

        self.release(&session.message_id);
        let _ = done.send(outcome);
    }

    async fn render_partial(&self, session: &mut StreamSession) {
        if session.complete || !session.has_unrendered() {
            return;
        }
        let markup = self.markup.render_partial(&session.buffer);
        session.surface.set_markup(&markup);
        session.rendered_len = session.buffer.len();
        self.enhancer.enhance(&session.surface).await;
        self.send(ChatUpdate::SurfaceUpdated {
            message_id: session.message_id.clone(),
            surface: session.surface.id(),
        })
        .await;
    }

    async fn finish(&self, session: &mut StreamSession) -> StreamOutcome {
        session.complete = true;
        self.state.lock().conversation.complete_streaming(&session.message_id);

        match self.config.mode {
            RenderMode::Direct => {
                let markup = self.markup.render_full(&session.buffer);
                session.surface.set_markup(&markup);
                session.rendered_len = session.buffer.len();
            }
            RenderMode::Animated => {
                let (revealed_tx, revealed_rx) = oneshot::channel();
                self.animator
                    .start(session.buffer.clone(), &session.surface, move || {
                        let _ = revealed_tx.send(());
                    });
                if revealed_rx.await.is_err() {
                    // Reveal was cancelled; whoever cancelled it owns cleanup
                    return StreamOutcome::Superseded;
                }
                session.rendered_len = session.buffer.len();
            }
        }

        let report = self.enhancer.enhance_final(&session.surface).await;
        self.markup.clear_partial_cache();

        tracing::info!(
            message_id = %session.message_id,
            chars = session.buffer.chars().count(),
            blocks = session.surface.blocks().len(),
            enhanced = report.processed,
            "Reply complete"
        );

        self.send(ChatUpdate::SurfaceUpdated {
            message_id: session.message_id.clone(),
            surface: session.surface.id(),
        })
        .await;
        self.send(ChatUpdate::StreamEnded {
            message_id: session.message_id.clone(),
        })
        .await;
        StreamOutcome::Completed
    }

    async fn fail(&self, session: &StreamSession, error: &StreamError) {
        tracing::warn!(
            message_id = %session.message_id,
            error = %error,
            received = session.buffer.len(),
            "Reply failed"
        );
        session.surface.cancel_animation();
        session.surface.clear();

        let text = error.friendly_message();
        let error_surface = SurfaceHandle::new();
        error_surface.set_markup(&self.markup.render_full(&text));

        let error_id = {
            let mut state = self.state.lock();
            state.conversation.cancel_streaming(&session.message_id);
            state
                .conversation
                .add_assistant_error(text.clone(), error_surface.clone())
        };
        self.enhancer.enhance(&error_surface).await;
        self.markup.clear_partial_cache();

        self.send(ChatUpdate::MessageRemoved {
            id: session.message_id.clone(),
        })
        .await;
        self.send(ChatUpdate::MessageAdded {
            id: error_id,
            role: MessageRole::Assistant,
            content_type: ContentType::Error,
            surface: Some(error_surface.id()),
        })
        .await;
        self.send(ChatUpdate::StreamFailed {
            message_id: session.message_id.clone(),
            error: error.to_string(),
        })
        .await;
        self.notifier.notify(&text, NotifyLevel::Error);
    }
}
