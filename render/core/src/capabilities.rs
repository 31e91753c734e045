//! External Collaborators
//!
//! The renderer talks to the outside world only through these traits:
//!
//! | Trait           | Used by            | Production implementation lives in |
//! |-----------------|--------------------|------------------------------------|
//! | [`SqlExecutor`] | execute affordance | [`HttpSqlExecutor`]                |
//! | [`Clipboard`]   | copy affordance    | the UI shell                       |
//! | [`Notifier`]    | all components     | the UI shell (toasts)              |
//!
//! The response source and diagram loader traits live next to their users
//! in [`crate::streaming`] and [`crate::diagram`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::diagram::DiagramRenderer;
use crate::error::ClipboardError;
use crate::messages::NotifyLevel;
use crate::streaming::StreamConfig;

// ============================================================================
// Query Execution
// ============================================================================

/// Result of executing one SQL block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// The query ran
    Success {
        /// Human-readable summary ("Retrieved 3 rows")
        summary: String,
    },
    /// The query was rejected or failed
    Failure {
        /// Error text from the backend
        message: String,
    },
}

impl ExecutionOutcome {
    /// Whether the query ran
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Wire shape of the query backend's reply
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// `"success"` or `"error"`
    pub status: String,
    /// Rows returned by a SELECT
    #[serde(default)]
    pub row_count: Option<u64>,
    /// Rows changed by any other statement
    #[serde(default)]
    pub affected_rows: Option<u64>,
    /// Error or informational text
    #[serde(default)]
    pub message: Option<String>,
}

impl From<ExecutionResponse> for ExecutionOutcome {
    fn from(response: ExecutionResponse) -> Self {
        if response.status != "success" {
            return Self::Failure {
                message: response
                    .message
                    .unwrap_or_else(|| "query failed".to_string()),
            };
        }

        let summary = match (response.row_count, response.affected_rows) {
            (Some(rows), _) => format!("Retrieved {rows} rows"),
            (None, Some(rows)) => format!("Affected rows: {rows}"),
            (None, None) => response
                .message
                .unwrap_or_else(|| "Query executed".to_string()),
        };
        Self::Success { summary }
    }
}

/// Runs SQL on behalf of an execute affordance
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute `sql` and report the outcome
    async fn execute(&self, sql: &str) -> ExecutionOutcome;
}

/// Executor used when no database is connected
#[derive(Clone, Copy, Debug, Default)]
pub struct DisconnectedExecutor;

#[async_trait]
impl SqlExecutor for DisconnectedExecutor {
    async fn execute(&self, _sql: &str) -> ExecutionOutcome {
        ExecutionOutcome::Failure {
            message: "No database selected".to_string(),
        }
    }
}

/// Runs SQL through the query backend's `POST {sql_query}` endpoint
///
/// Transport failures and non-2xx replies become
/// [`ExecutionOutcome::Failure`]; a 2xx body is read as an
/// [`ExecutionResponse`].
#[derive(Clone, Debug)]
pub struct HttpSqlExecutor {
    endpoint: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    sql_query: &'a str,
}

impl HttpSqlExecutor {
    /// Create an executor posting to `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self {
            endpoint: endpoint.into(),
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
impl SqlExecutor for HttpSqlExecutor {
    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        tracing::debug!(endpoint = %self.endpoint, "Executing SQL block");
        let response = match self
            .http_client
            .post(&self.endpoint)
            .json(&QueryRequest { sql_query: sql })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Query service unreachable");
                return ExecutionOutcome::Failure {
                    message: "Couldn't reach the query service".to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            return ExecutionOutcome::Failure {
                message: format!("Query service returned HTTP {}", status.as_u16()),
            };
        }

        match response.json::<ExecutionResponse>().await {
            Ok(reply) => reply.into(),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable query reply");
                ExecutionOutcome::Failure {
                    message: "The query service sent an unreadable reply".to_string(),
                }
            }
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// User-visible notifications (toasts)
pub trait Notifier: Send + Sync {
    /// Show `message` at `level`
    fn notify(&self, message: &str, level: NotifyLevel);
}

/// Notifier that writes to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Error => tracing::error!(notification = message),
            NotifyLevel::Warning => tracing::warn!(notification = message),
            NotifyLevel::Info | NotifyLevel::Success => {
                tracing::info!(notification = message, ?level);
            }
        }
    }
}

/// Notifier that keeps every notification (for tests and replay)
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    entries: Mutex<Vec<(String, NotifyLevel)>>,
}

impl RecordingNotifier {
    /// Everything notified so far
    #[must_use]
    pub fn entries(&self) -> Vec<(String, NotifyLevel)> {
        self.entries.lock().clone()
    }

    /// Notifications at `level`
    #[must_use]
    pub fn at_level(&self, level: NotifyLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, l)| *l == level)
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) {
        self.entries.lock().push((message.to_string(), level));
    }
}

// ============================================================================
// Clipboard
// ============================================================================

/// System clipboard access
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Replace the clipboard contents with `text`
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// In-process clipboard
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    /// Current contents
    #[must_use]
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}

/// Clipboard for surfaces without one
#[derive(Clone, Copy, Debug, Default)]
pub struct NoClipboard;

#[async_trait]
impl Clipboard for NoClipboard {
    async fn write_text(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Unavailable("no clipboard on this surface".to_string()))
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Everything the renderer needs from its host
#[derive(Clone)]
pub struct HostCapabilities {
    /// Clipboard for the copy affordance
    pub clipboard: Arc<dyn Clipboard>,
    /// Query runner for the execute affordance
    pub executor: Arc<dyn SqlExecutor>,
    /// Toast sink
    pub notifier: Arc<dyn Notifier>,
    /// Diagram renderer shared by all surfaces
    pub diagrams: Arc<DiagramRenderer>,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            clipboard: Arc::new(NoClipboard),
            executor: Arc::new(DisconnectedExecutor),
            notifier: Arc::new(TracingNotifier),
            diagrams: Arc::new(DiagramRenderer::default()),
        }
    }
}

impl HostCapabilities {
    /// Defaults, with SQL running against the configured query endpoint
    #[must_use]
    pub fn with_query_backend(config: &StreamConfig) -> Self {
        Self {
            executor: Arc::new(HttpSqlExecutor::new(
                config.query_endpoint.clone(),
                config.request_timeout,
            )),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("diagrams_loaded", &self.diagrams.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_select_response() {
        let response: ExecutionResponse =
            serde_json::from_str(r#"{"status":"success","row_count":3}"#).unwrap();
        assert_eq!(
            ExecutionOutcome::from(response),
            ExecutionOutcome::Success {
                summary: "Retrieved 3 rows".to_string()
            }
        );
    }

    #[test]
    fn test_outcome_from_error_response() {
        let response: ExecutionResponse =
            serde_json::from_str(r#"{"status":"error","message":"syntax error"}"#).unwrap();
        let outcome = ExecutionOutcome::from(response);
        assert!(!outcome.is_success());
        assert_eq!(
            outcome,
            ExecutionOutcome::Failure {
                message: "syntax error".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_http_executor_posts_query_and_maps_reply() {
        let server = crate::test_http::serve_once(
            "/run_sql_query",
            crate::test_http::fixed(
                "200 OK",
                "application/json",
                r#"{"status":"success","affected_rows":2,"table_name":"logs"}"#,
            ),
        )
        .await
        .unwrap();
        let executor = HttpSqlExecutor::new(server.url.clone(), Duration::from_secs(5));

        let outcome = executor.execute("DELETE FROM logs WHERE id < 3;").await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                summary: "Affected rows: 2".to_string()
            }
        );

        let request = server.request.await.unwrap().unwrap();
        assert!(request.starts_with("POST /run_sql_query "));
        assert!(request.ends_with(r#"{"sql_query":"DELETE FROM logs WHERE id < 3;"}"#));
    }

    #[tokio::test]
    async fn test_http_executor_reports_backend_error() {
        let server = crate::test_http::serve_once(
            "/run_sql_query",
            crate::test_http::fixed(
                "200 OK",
                "application/json",
                r#"{"status":"error","message":"No database selected"}"#,
            ),
        )
        .await
        .unwrap();
        let executor = HttpSqlExecutor::new(server.url, Duration::from_secs(5));
        assert_eq!(
            executor.execute("SELECT 1;").await,
            ExecutionOutcome::Failure {
                message: "No database selected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_http_executor_maps_http_failure() {
        let server = crate::test_http::serve_once(
            "/run_sql_query",
            crate::test_http::fixed("502 Bad Gateway", "text/plain", "upstream down"),
        )
        .await
        .unwrap();
        let executor = HttpSqlExecutor::new(server.url, Duration::from_secs(5));
        let outcome = executor.execute("SELECT 1;").await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failure {
                message: "Query service returned HTTP 502".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_query_backend_uses_configured_endpoint() {
        let server = crate::test_http::serve_once(
            "/sql",
            crate::test_http::fixed(
                "200 OK",
                "application/json",
                r#"{"status":"success","row_count":0,"result":[]}"#,
            ),
        )
        .await
        .unwrap();
        let config = StreamConfig {
            query_endpoint: server.url.clone(),
            ..StreamConfig::default()
        };

        let host = HostCapabilities::with_query_backend(&config);
        assert_eq!(
            host.executor.execute("SELECT * FROM empty;").await,
            ExecutionOutcome::Success {
                summary: "Retrieved 0 rows".to_string()
            }
        );
        assert!(server.request.await.unwrap().unwrap().starts_with("POST /sql "));
    }

    #[tokio::test]
    async fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::default();
        clipboard.write_text("SELECT 1;").await.unwrap();
        assert_eq!(clipboard.contents().as_deref(), Some("SELECT 1;"));
        assert!(NoClipboard.write_text("x").await.is_err());
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::default();
        notifier.notify("oops", NotifyLevel::Error);
        notifier.notify("fine", NotifyLevel::Info);
        assert_eq!(notifier.at_level(NotifyLevel::Error), vec!["oops"]);
        assert_eq!(notifier.entries().len(), 2);
    }
}
