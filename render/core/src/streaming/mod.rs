//! Response Streaming
//!
//! Turns a chat endpoint's chunked reply into rendered, enhanced surfaces.
//!
//! # Architecture
//!
//! ```text
//!  send_message(prompt)
//!        │
//!        ▼
//!  ┌──────────────────┐  ChunkEvent   ┌───────────────────────────────┐
//!  │  ResponseSource  │ ────────────▶ │      stream task (1 / msg)    │
//!  │  (http/scripted) │    mpsc       │  buffer ─▶ MarkupService      │
//!  └──────────────────┘               │        ─▶ SurfaceHandle       │
//!                                     │        ─▶ BlockEnhancer       │
//!                                     │   or  ─▶ RevealAnimator       │
//!                                     └───────────────┬───────────────┘
//!                                                     │ ChatUpdate
//!                                                     ▼
//!                                                  UI shell
//! ```
//!
//! In [`RenderMode::Direct`] every chunk re-renders the whole buffer through
//! the partial cache. In [`RenderMode::Animated`] chunks are buffered and the
//! finished text is revealed by the animator.

mod coordinator;
mod source;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use coordinator::{StreamCoordinator, StreamOutcome, StreamTicket};
pub use source::{ChatRequest, ChunkEvent, HttpResponseSource, ResponseSource, ScriptedSource, Utf8Decoder};

/// How a streamed reply reaches its surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Render every chunk as it arrives
    #[default]
    Direct,
    /// Buffer the reply, then reveal it with the animator
    Animated,
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "animated" => Ok(Self::Animated),
            other => Err(format!("unknown render mode '{other}' (expected direct or animated)")),
        }
    }
}

/// Stream configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Chat endpoint URL
    pub endpoint: String,
    /// Query endpoint used by the execute affordance
    pub query_endpoint: String,
    /// Rendering mode
    pub mode: RenderMode,
    /// Capacity of the chunk channel between source and coordinator
    pub channel_capacity: usize,
    /// Whole-request timeout for the HTTP source
    pub request_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/pass_userinput_to_gemini".to_string(),
            query_endpoint: "http://127.0.0.1:5000/run_sql_query".to_string(),
            mode: RenderMode::Direct,
            channel_capacity: 100,
            request_timeout: Duration::from_secs(120),
        }
    }
}
