//! Response Sources
//!
//! A [`ResponseSource`] turns one prompt into a channel of [`ChunkEvent`]s.
//! The HTTP source talks to the chat endpoint; the scripted source replays
//! fixed chunks for tests and the replay binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::StreamConfig;
use crate::error::StreamError;
use crate::messages::ConversationId;

/// Longest error body kept in [`StreamError::Http`]
const MAX_ERROR_BODY: usize = 512;

/// One event on a response channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    /// More reply text
    ChunkReceived(String),
    /// The reply is complete
    StreamEnded,
    /// The reply failed; no further events follow
    StreamFailed(StreamError),
}

/// Body posted to the chat endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User prompt
    pub prompt: String,
    /// Conversation the prompt belongs to
    pub conversation_id: ConversationId,
}

/// Something that can answer a prompt with a stream of chunks
///
/// Closing the channel without `StreamEnded` or `StreamFailed` is treated as
/// a disconnect by the coordinator.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start answering `request`
    async fn open(&self, request: &ChatRequest) -> mpsc::Receiver<ChunkEvent>;
}

// ============================================================================
// UTF-8 decoding
// ============================================================================

/// Incremental UTF-8 decoder for a byte stream
///
/// A multi-byte character split across two network reads is held back until
/// its remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning all text that is complete so far
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated character: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

// ============================================================================
// HTTP source
// ============================================================================

/// JSON envelope the chat endpoint answers with when it does not stream
#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    status: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Translate a complete JSON reply into chunk events
fn envelope_events(body: &str) -> Vec<ChunkEvent> {
    let envelope: ChatEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return vec![ChunkEvent::StreamFailed(StreamError::Read(format!(
                "invalid response envelope: {e}"
            )))];
        }
    };

    if envelope.status == "success" {
        let mut events = Vec::with_capacity(2);
        if let Some(text) = envelope.response.filter(|t| !t.is_empty()) {
            events.push(ChunkEvent::ChunkReceived(text));
        }
        events.push(ChunkEvent::StreamEnded);
        events
    } else {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("status '{}'", envelope.status));
        vec![ChunkEvent::StreamFailed(StreamError::Rejected(message))]
    }
}

/// Posts prompts to the chat endpoint
///
/// Plain-text bodies are forwarded chunk by chunk as they arrive. A JSON
/// body is read as a `{status, response | message}` envelope.
#[derive(Clone, Debug)]
pub struct HttpResponseSource {
    endpoint: String,
    channel_capacity: usize,
    http_client: reqwest::Client,
}

impl HttpResponseSource {
    /// Create a source for the configured endpoint
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self {
            endpoint: config.endpoint.clone(),
            channel_capacity: config.channel_capacity.max(1),
            http_client,
        }
    }

    /// Endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ResponseSource for HttpResponseSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, request: &ChatRequest) -> mpsc::Receiver<ChunkEvent> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let client = self.http_client.clone();
        let endpoint = self.endpoint.clone();
        let body = request.clone();

        tokio::spawn(async move {
            tracing::debug!(endpoint = %endpoint, conversation_id = %body.conversation_id, "Posting prompt");
            let response = match client.post(&endpoint).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx
                        .send(ChunkEvent::StreamFailed(StreamError::Connect(e.to_string())))
                        .await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let body: String = text.chars().take(MAX_ERROR_BODY).collect();
                let _ = tx
                    .send(ChunkEvent::StreamFailed(StreamError::Http {
                        status: status.as_u16(),
                        body,
                    }))
                    .await;
                return;
            }

            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/json"));

            if is_json {
                let events = match response.text().await {
                    Ok(text) => envelope_events(&text),
                    Err(e) => vec![ChunkEvent::StreamFailed(StreamError::Read(e.to_string()))],
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                return;
            }

            let mut stream = response.bytes_stream();
            let mut decoder = Utf8Decoder::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = decoder.push(&bytes);
                        if !text.is_empty() && tx.send(ChunkEvent::ChunkReceived(text)).await.is_err() {
                            // Receiver dropped, stop reading
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(ChunkEvent::StreamFailed(StreamError::Read(e.to_string())))
                            .await;
                        return;
                    }
                }
            }

            let tail = decoder.finish();
            if !tail.is_empty() && tx.send(ChunkEvent::ChunkReceived(tail)).await.is_err() {
                return;
            }
            let _ = tx.send(ChunkEvent::StreamEnded).await;
        });

        rx
    }
}

// ============================================================================
// Scripted source
// ============================================================================

#[derive(Clone, Debug)]
enum Ending {
    End,
    Fail(StreamError),
    Close,
    Hold,
}

/// Replays a fixed list of chunks
#[derive(Clone, Debug)]
pub struct ScriptedSource {
    chunks: Vec<String>,
    ending: Ending,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedSource {
    /// Script that sends `chunks` and then ends normally
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ending: Ending::End,
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script that sends `text` in pieces of `chunk_chars` characters
    #[must_use]
    pub fn from_text(text: &str, chunk_chars: usize) -> Self {
        let size = chunk_chars.max(1);
        let chars: Vec<char> = text.chars().collect();
        Self::new(chars.chunks(size).map(|c| c.iter().collect::<String>()))
    }

    /// Fail with `error` after the chunks
    #[must_use]
    pub fn with_failure(mut self, error: StreamError) -> Self {
        self.ending = Ending::Fail(error);
        self
    }

    /// Close the channel after the chunks without an end marker
    #[must_use]
    pub fn without_end(mut self) -> Self {
        self.ending = Ending::Close;
        self
    }

    /// Keep the channel open after the chunks until the receiver goes away
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.ending = Ending::Hold;
        self
    }

    /// Wait `delay` before each event
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests this source has been opened with
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ResponseSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: &ChatRequest) -> mpsc::Receiver<ChunkEvent> {
        self.requests.lock().push(request.clone());
        let (tx, rx) = mpsc::channel(16);
        let chunks = self.chunks.clone();
        let ending = self.ending.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(ChunkEvent::ChunkReceived(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match ending {
                Ending::End => {
                    let _ = tx.send(ChunkEvent::StreamEnded).await;
                }
                Ending::Fail(error) => {
                    let _ = tx.send(ChunkEvent::StreamFailed(error)).await;
                }
                Ending::Close => {}
                Ending::Hold => tx.closed().await,
            }
        });

        rx
    }
}
