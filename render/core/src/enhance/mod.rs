//! Block Enhancer
//!
//! Walks a surface and upgrades each code block exactly once:
//!
//! ```text
//! pending block ──► claim (processed set) ──┬─► diagram: DiagramRenderer ──► Diagram view
//!                                           └─► other:   syntect        ──► Highlighted / Plain
//!                                                   │
//!                                                   └─► copy affordance (+ execute for SQL)
//! ```
//!
//! # Idempotence
//!
//! A block is claimed by inserting its [`BlockId`] into the surface's
//! processed set before any work is done, so overlapping passes never
//! double-attach. Unclosed diagram fences are not claimed by [`BlockEnhancer::enhance`]:
//! their source is still growing and validating it would only produce
//! errors. [`BlockEnhancer::enhance_final`] claims them once the reply ends.
//!
//! Failures are per block. A diagram that fails to render keeps its raw code
//! visible and the pass moves on.

mod highlight;

pub use highlight::highlight;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::{Clipboard, ExecutionOutcome, Notifier, SqlExecutor};
use crate::diagram::{DiagramRenderer, DiagramView};
use crate::messages::NotifyLevel;
use crate::surface::{BlockDescriptor, BlockId, BlockView, CopyState, SurfaceHandle};

/// Enhancer configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhanceConfig {
    /// How long the copy affordance shows "Copied"
    pub copied_feedback: Duration,
    /// Whether to run the syntax highlighter at all
    pub highlight: bool,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            copied_feedback: Duration::from_secs(2),
            highlight: true,
        }
    }
}

/// What one `enhance` pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnhanceReport {
    /// Blocks claimed and processed in this pass
    pub processed: usize,
    /// Blocks given highlighted markup
    pub highlighted: usize,
    /// Blocks given an execute affordance
    pub executable: usize,
    /// Diagrams rendered
    pub diagrams_rendered: usize,
    /// Diagrams that failed validation or rendering
    pub diagrams_failed: usize,
    /// Unclosed diagram blocks left for a later pass
    pub deferred: usize,
}

impl EnhanceReport {
    /// Whether the pass changed the surface
    #[must_use]
    pub fn changed(&self) -> bool {
        self.processed > 0
    }
}

/// Attaches highlighting, affordances and diagrams to code blocks
pub struct BlockEnhancer {
    config: EnhanceConfig,
    diagrams: Arc<DiagramRenderer>,
    clipboard: Arc<dyn Clipboard>,
    executor: Arc<dyn SqlExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for BlockEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockEnhancer")
            .field("config", &self.config)
            .field("diagrams", &self.diagrams)
            .finish_non_exhaustive()
    }
}

impl BlockEnhancer {
    /// Create an enhancer
    #[must_use]
    pub fn new(
        config: EnhanceConfig,
        diagrams: Arc<DiagramRenderer>,
        clipboard: Arc<dyn Clipboard>,
        executor: Arc<dyn SqlExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            diagrams,
            clipboard,
            executor,
            notifier,
        }
    }

    /// Enhancer configuration
    #[must_use]
    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    /// Process every block not yet processed
    ///
    /// Calling this again without new blocks is a no-op.
    pub async fn enhance(&self, surface: &SurfaceHandle) -> EnhanceReport {
        self.run_pass(surface, false).await
    }

    /// Final pass once the reply text is complete
    ///
    /// Unclosed diagram fences are processed too: no more text will arrive,
    /// so the fence is treated as closed at end of input.
    pub async fn enhance_final(&self, surface: &SurfaceHandle) -> EnhanceReport {
        self.run_pass(surface, true).await
    }

    async fn run_pass(&self, surface: &SurfaceHandle, complete: bool) -> EnhanceReport {
        let mut report = EnhanceReport::default();

        for block in surface.pending_blocks() {
            if block.class.diagram && !block.closed && !complete {
                report.deferred += 1;
                continue;
            }
            if !surface.mark_processed(block.id) {
                continue;
            }
            report.processed += 1;

            if block.class.diagram {
                self.enhance_diagram(surface, &block, &mut report).await;
            } else {
                self.enhance_code(surface, &block, &mut report);
            }
        }

        if report.changed() {
            tracing::debug!(
                surface = %surface.id(),
                processed = report.processed,
                diagrams = report.diagrams_rendered,
                deferred = report.deferred,
                "Enhanced blocks"
            );
        }
        report
    }

    fn enhance_code(&self, surface: &SurfaceHandle, block: &BlockDescriptor, report: &mut EnhanceReport) {
        if self.config.highlight {
            if let Some(html) = highlight(&block.source, block.language(), block.class.sql) {
                surface.set_view(block.id, BlockView::Highlighted(html));
                report.highlighted += 1;
            }
        }

        surface.attach_affordances(block.id, block.class.sql);
        if block.class.sql {
            report.executable += 1;
        }
    }

    async fn enhance_diagram(
        &self,
        surface: &SurfaceHandle,
        block: &BlockDescriptor,
        report: &mut EnhanceReport,
    ) {
        let mut failure = None;
        let state = self
            .diagrams
            .render_with(&block.source, |_| {}, |e| failure = Some(e.to_string()))
            .await;

        match failure {
            None => report.diagrams_rendered += 1,
            Some(error) => {
                report.diagrams_failed += 1;
                self.notifier
                    .notify(&format!("Diagram error: {error}"), NotifyLevel::Error);
            }
        }

        surface.set_view(block.id, BlockView::Diagram(state));
        surface.attach_affordances(block.id, false);
    }

    // ------------------------------------------------------------------------
    // Affordance actions
    // ------------------------------------------------------------------------

    /// Copy a block's raw source to the clipboard
    ///
    /// Shows "Copied" for the feedback period, then reverts. On failure the
    /// user is notified and `false` is returned.
    pub async fn copy(&self, surface: &SurfaceHandle, id: BlockId) -> bool {
        let Some(block) = surface.block(id) else {
            return false;
        };
        if surface.copy_state(id).is_none() {
            return false;
        }

        if let Err(e) = self.clipboard.write_text(&block.source).await {
            tracing::warn!(surface = %surface.id(), block = %id, error = %e, "Copy failed");
            self.notifier
                .notify(&format!("Failed to copy: {e}"), NotifyLevel::Error);
            return false;
        }

        let feedback = self.config.copied_feedback;
        let reset_surface = surface.clone();
        let reset = tokio::spawn(async move {
            tokio::time::sleep(feedback).await;
            reset_surface.revert_copy_feedback(id);
        });
        surface.set_copy_state(id, CopyState::Copied, Some(reset.abort_handle()));
        true
    }

    /// Run a SQL block through the executor
    ///
    /// Returns `None` when the block has no execute affordance or a previous
    /// run is still in flight; such activations are ignored.
    pub async fn execute(&self, surface: &SurfaceHandle, id: BlockId) -> Option<ExecutionOutcome> {
        let block = surface.block(id)?;
        if !surface.try_begin_execute(id) {
            tracing::debug!(surface = %surface.id(), block = %id, "Execute ignored, not idle");
            return None;
        }

        let outcome = {
            let _busy = BusyGuard { surface, id };
            self.executor.execute(&block.source).await
        };

        match &outcome {
            ExecutionOutcome::Success { summary } => {
                self.notifier.notify(summary, NotifyLevel::Success);
            }
            ExecutionOutcome::Failure { message } => {
                self.notifier
                    .notify(&format!("Query failed: {message}"), NotifyLevel::Error);
            }
        }
        Some(outcome)
    }

    /// Swap a diagram block between rendered and raw views
    pub fn toggle_diagram(&self, surface: &SurfaceHandle, id: BlockId) -> Option<DiagramView> {
        surface.toggle_diagram_view(id)
    }
}

/// Restores the execute affordance to Idle, even if the run is dropped
struct BusyGuard<'a> {
    surface: &'a SurfaceHandle,
    id: BlockId,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.surface.finish_execute(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MemoryClipboard, NoClipboard, RecordingNotifier};
    use crate::markup::parse_markup;
    use crate::surface::ExecuteState;
    use async_trait::async_trait;

    struct FixedExecutor(ExecutionOutcome);

    #[async_trait]
    impl SqlExecutor for FixedExecutor {
        async fn execute(&self, _sql: &str) -> ExecutionOutcome {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.clone()
        }
    }

    fn enhancer_with(
        clipboard: Arc<dyn Clipboard>,
        outcome: ExecutionOutcome,
        notifier: Arc<RecordingNotifier>,
    ) -> BlockEnhancer {
        BlockEnhancer::new(
            EnhanceConfig::default(),
            Arc::new(DiagramRenderer::default()),
            clipboard,
            Arc::new(FixedExecutor(outcome)),
            notifier,
        )
    }

    fn surface_with(text: &str) -> SurfaceHandle {
        let surface = SurfaceHandle::new();
        surface.set_markup(&parse_markup(text, 1 << 20).unwrap());
        surface
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome::Success {
            summary: "Retrieved 1 rows".to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(MemoryClipboard::default()), success(), notifier);
        let surface = surface_with("```sql\nSELECT 1;\n```\n\n```python\nprint(1)\n```\n");

        let first = enhancer.enhance(&surface).await;
        assert_eq!(first.processed, 2);
        assert_eq!(first.executable, 1);
        let html = surface.to_html();

        let second = enhancer.enhance(&surface).await;
        assert_eq!(second, EnhanceReport::default());
        assert_eq!(surface.to_html(), html);
        assert_eq!(html.matches("copy-btn").count(), 2);
        assert_eq!(html.matches("execute-btn").count(), 1);
    }

    #[tokio::test]
    async fn test_unclosed_diagram_is_deferred() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(MemoryClipboard::default()), success(), notifier.clone());
        let surface = surface_with("```mermaid\ngraph TD\nA--");

        let report = enhancer.enhance(&surface).await;
        assert_eq!(report.deferred, 1);
        assert_eq!(report.processed, 0);
        assert!(notifier.entries().is_empty());

        surface.set_markup(&parse_markup("```mermaid\ngraph TD\nA-->B\n```\n", 1 << 20).unwrap());
        let report = enhancer.enhance(&surface).await;
        assert_eq!(report.diagrams_rendered, 1);
        assert!(surface.to_html().contains("<svg"));
    }

    #[tokio::test]
    async fn test_final_pass_claims_unclosed_diagram() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(MemoryClipboard::default()), success(), notifier);
        let surface = surface_with("Here:\n\n```mermaid\ngraph TD\nA-->B");

        assert_eq!(enhancer.enhance(&surface).await.deferred, 1);

        let report = enhancer.enhance_final(&surface).await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.diagrams_rendered, 1);
        assert_eq!(surface.processed_count(), 1);
        let html = surface.to_html();
        assert!(html.contains("<svg"));
        assert_eq!(html.matches("copy-btn").count(), 1);

        assert_eq!(enhancer.enhance_final(&surface).await, EnhanceReport::default());
    }

    #[tokio::test]
    async fn test_invalid_diagram_keeps_code_and_siblings() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(MemoryClipboard::default()), success(), notifier.clone());
        let surface = surface_with("```mermaid\ngraph TD\nA--\n```\n\n```sql\nSELECT 1;\n```\n");

        let report = enhancer.enhance(&surface).await;
        assert_eq!(report.diagrams_failed, 1);
        assert_eq!(report.processed, 2);
        assert_eq!(notifier.at_level(NotifyLevel::Error).len(), 1);

        let html = surface.to_html();
        assert!(html.contains("diagram-error"));
        assert!(html.contains("A--"));
        assert!(html.contains("execute-btn"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_feedback_reverts() {
        let clipboard = Arc::new(MemoryClipboard::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(clipboard.clone(), success(), notifier);
        let surface = surface_with("```sql\nSELECT 1;\n```\n");
        enhancer.enhance(&surface).await;
        let id = surface.blocks()[0].id;

        assert!(enhancer.copy(&surface, id).await);
        assert_eq!(clipboard.contents().as_deref(), Some("SELECT 1;\n"));
        assert_eq!(surface.copy_state(id), Some(CopyState::Copied));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(surface.copy_state(id), Some(CopyState::Idle));
    }

    #[tokio::test]
    async fn test_copy_failure_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(NoClipboard), success(), notifier.clone());
        let surface = surface_with("```\ntext\n```\n");
        enhancer.enhance(&surface).await;
        let id = surface.blocks()[0].id;

        assert!(!enhancer.copy(&surface, id).await);
        assert_eq!(surface.copy_state(id), Some(CopyState::Idle));
        assert_eq!(notifier.at_level(NotifyLevel::Error).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_ignores_second_activation_and_restores_idle() {
        let notifier = Arc::new(RecordingNotifier::default());
        let failure = ExecutionOutcome::Failure {
            message: "table missing".to_string(),
        };
        let enhancer = Arc::new(enhancer_with(
            Arc::new(MemoryClipboard::default()),
            failure.clone(),
            notifier.clone(),
        ));
        let surface = surface_with("```sql\nSELECT * FROM nope;\n```\n");
        enhancer.enhance(&surface).await;
        let id = surface.blocks()[0].id;

        let running = {
            let enhancer = Arc::clone(&enhancer);
            let surface = surface.clone();
            tokio::spawn(async move { enhancer.execute(&surface, id).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(surface.execute_state(id), Some(ExecuteState::Busy));
        assert_eq!(enhancer.execute(&surface, id).await, None);

        assert_eq!(running.await.unwrap(), Some(failure));
        assert_eq!(surface.execute_state(id), Some(ExecuteState::Idle));
        assert_eq!(
            notifier.at_level(NotifyLevel::Error),
            vec!["Query failed: table missing"]
        );
    }

    #[tokio::test]
    async fn test_toggle_diagram() {
        let notifier = Arc::new(RecordingNotifier::default());
        let enhancer = enhancer_with(Arc::new(MemoryClipboard::default()), success(), notifier);
        let surface = surface_with("```mermaid\ngraph TD\nA-->B\n```\n");
        enhancer.enhance(&surface).await;
        let id = surface.blocks()[0].id;

        assert_eq!(enhancer.toggle_diagram(&surface, id), Some(DiagramView::Raw));
        assert!(surface.to_html().contains("data-view=\"rendered\" hidden"));
        assert_eq!(enhancer.toggle_diagram(&surface, id), Some(DiagramView::Rendered));
    }
}
