//! Error Taxonomy
//!
//! Every failure the renderer can encounter, grouped by where it is recovered.
//!
//! | Error            | Recovered by                                             |
//! |------------------|----------------------------------------------------------|
//! | [`ParseError`]   | Markup service: escaped-text fallback, never surfaced    |
//! | [`DiagramError`] | Block enhancer: raw code stays visible + notification    |
//! | [`ClipboardError`] | Copy affordance: notification, no state change         |
//! | [`StreamError`]  | Stream coordinator: friendly assistant-style message     |
//! | [`SendError`]    | Returned to the caller of `send_message`                 |
//!
//! Configuration errors live in [`crate::config::ConfigError`].

use thiserror::Error;

/// Markup parsing failure
///
/// The markup service converts these into an HTML-escaped fallback, so they
/// only ever show up in logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Source exceeds the configured parse limit
    #[error("source is {len} bytes, parse limit is {max}")]
    TooLarge {
        /// Source length in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// The markdown parser panicked on this input
    #[error("markdown parser panicked: {0}")]
    Panicked(String),
}

/// Diagram loading, validation or rendering failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiagramError {
    /// The diagram engine could not be loaded
    #[error("diagram engine failed to load: {0}")]
    LoadFailed(String),

    /// The source did not start with a recognized diagram header
    #[error("unrecognized diagram type: {0}")]
    UnknownDiagram(String),

    /// The source failed validation
    #[error("parse error on line {line}: {message}")]
    Invalid {
        /// 1-based line number of the offending statement
        line: usize,
        /// What went wrong
        message: String,
    },

    /// Validation passed but rendering failed
    #[error("diagram render failed: {0}")]
    RenderFailed(String),
}

/// Clipboard write failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClipboardError {
    /// No clipboard is available on this platform/surface
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// The write was attempted and rejected
    #[error("clipboard write failed: {0}")]
    WriteFailed(String),
}

/// Response stream failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Could not reach the chat endpoint
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The endpoint answered with a non-success status
    #[error("chat endpoint returned {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// The endpoint answered with an error envelope
    #[error("chat endpoint reported an error: {0}")]
    Rejected(String),

    /// Reading the body failed mid-stream
    #[error("stream read failed: {0}")]
    Read(String),

    /// The chunk channel closed without an end-of-stream marker
    #[error("stream disconnected unexpectedly")]
    Disconnected,
}

impl StreamError {
    /// Text shown in the chat in place of the failed reply
    #[must_use]
    pub fn friendly_message(&self) -> String {
        match self {
            Self::Connect(_) => {
                "I couldn't reach the server. Check your connection and try again.".to_string()
            }
            Self::Http { status, .. } if *status >= 500 => format!(
                "The server ran into a problem (HTTP {status}). Please try again in a moment."
            ),
            Self::Http { status, .. } => {
                format!("The server could not handle that request (HTTP {status}).")
            }
            Self::Rejected(message) => format!("Sorry, I couldn't answer that: {message}"),
            Self::Read(_) | Self::Disconnected => {
                "The response was interrupted before it finished. Please try again.".to_string()
            }
        }
    }
}

/// Rejection of a `send_message` call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Another response is still streaming for this chat
    #[error("a response is already streaming")]
    StreamActive,

    /// Prompt was empty after trimming
    #[error("prompt is empty")]
    EmptyPrompt,
}
