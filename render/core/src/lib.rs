//! Genie Render Core - Headless Streaming Response Renderer for DB-Genie
//!
//! Turns a chat assistant's streamed markdown replies into sanitized HTML
//! surfaces: code blocks get highlighting plus copy and execute actions,
//! diagram blocks become SVG, and replies can be revealed with a typing
//! animation. No UI framework is involved; a shell subscribes to
//! [`ChatUpdate`]s and re-serializes the surfaces they name.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         UI Shell                                 │
//! │        (web view / TUI / genie-replay / integration test)        │
//! └───────────────▲──────────────────────────────┬───────────────────┘
//!                 │ ChatUpdate                   │ send_message / copy /
//!                 │                              │ execute / toggle
//! ┌───────────────┴──────────────────────────────▼───────────────────┐
//! │                      StreamCoordinator                           │
//! │  ┌────────────────┐  ┌───────────────┐  ┌──────────────────────┐ │
//! │  │ ResponseSource │─▶│ MarkupService │─▶│    SurfaceHandle     │ │
//! │  │ (http/scripted)│  │ full+partial  │  │  blocks, views,      │ │
//! │  └────────────────┘  │ FIFO caches   │  │  affordance state    │ │
//! │                      └───────┬───────┘  └──────────▲───────────┘ │
//! │                              │                     │             │
//! │                      ┌───────▼───────┐  ┌──────────┴───────────┐ │
//! │                      │ RevealAnimator│  │    BlockEnhancer     │ │
//! │                      └───────────────┘  │ classifier, syntect, │ │
//! │                                         │ DiagramRenderer      │ │
//! │                                         └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use genie_render_core::{
//!     load_config, HostCapabilities, HttpResponseSource, StreamCoordinator,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let source = Arc::new(HttpResponseSource::new(&config.stream));
//!     let (tx, mut rx) = mpsc::channel(100);
//!
//!     let coordinator = StreamCoordinator::new(&config, source, HostCapabilities::default(), tx);
//!     coordinator.start();
//!
//!     let ticket = coordinator.send_message("Show me all users").await?;
//!     let surface = ticket.surface().clone();
//!     ticket.wait().await;
//!     println!("{}", surface.to_html());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`classifier`]: SQL / diagram / language detection for fenced blocks
//! - [`markup`]: Markdown to sanitized HTML with memoizing caches
//! - [`surface`]: Render targets holding blocks and their enhancement state
//! - [`enhance`]: Highlighting, copy and execute actions, diagram swap-in
//! - [`diagram`]: Lazily loaded diagram engine and per-block diagram state
//! - [`animation`]: Typing-style reveal with scroll following
//! - [`streaming`]: Response sources and the stream coordinator
//! - [`session`]: Conversation transcript
//! - [`capabilities`]: Host traits (clipboard, SQL execution, notifications)
//! - [`messages`]: Identifiers and UI update events
//! - [`config`]: TOML + environment configuration
//! - [`error`]: Error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod animation;
pub mod capabilities;
pub mod classifier;
pub mod config;
pub mod diagram;
pub mod enhance;
pub mod error;
pub mod markup;
pub mod messages;
pub mod session;
pub mod streaming;
pub mod surface;

#[cfg(test)]
mod test_http;

// Classification exports
pub use classifier::{classify_block, detect_language, is_diagram_content, is_sql_content, BlockClass, Language};

// Markup exports
pub use markup::{parse_markup, FencedBlock, Markup, MarkupConfig, MarkupNode, MarkupService, SweeperHandle};

// Surface exports
pub use surface::{BlockDescriptor, BlockId, BlockView, CopyState, ExecuteState, ScrollEvent, SurfaceHandle, SurfaceId};

// Enhancement exports
pub use diagram::{BasicDiagramEngine, DiagramEngine, DiagramLoader, DiagramRenderer, DiagramState, DiagramView};
pub use enhance::{BlockEnhancer, EnhanceConfig, EnhanceReport};

// Animation exports
pub use animation::{AnimationHandle, AnimationState, RevealAnimator, RevealConfig, RevealUnit};

// Streaming exports
pub use streaming::{
    ChatRequest, ChunkEvent, HttpResponseSource, RenderMode, ResponseSource, ScriptedSource,
    StreamConfig, StreamCoordinator, StreamOutcome, StreamTicket,
};

// Transcript and host exports
pub use capabilities::{
    Clipboard, ExecutionOutcome, HostCapabilities, HttpSqlExecutor, MemoryClipboard, Notifier,
    RecordingNotifier, SqlExecutor, TracingNotifier,
};
pub use messages::{ChatUpdate, ContentType, ConversationId, MessageId, MessageRole, NotifyLevel};
pub use session::{ChatMessage, Conversation};

// Error exports
pub use error::{ClipboardError, DiagramError, ParseError, SendError, StreamError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RenderConfig, RenderToml,
};
