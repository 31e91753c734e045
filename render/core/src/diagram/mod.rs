//! Diagram Renderer
//!
//! Turns diagram source into SVG through a pluggable engine.
//!
//! # Lifecycle
//!
//! ```text
//! first render ──► DiagramLoader::load (once per renderer) ──► engine
//!                        │ failure: not cached, retried next call
//! every render ──► engine.parse ──► engine.render ──► DiagramState::rendered
//!                        │ failure
//!                        └──► DiagramError (raw code stays visible)
//! ```
//!
//! Toggling between the rendered and raw views only flips
//! [`DiagramState::view`]; nothing is re-validated or re-rendered.

pub mod flowchart;

pub use flowchart::BasicDiagramEngine;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::DiagramError;

// ============================================================================
// Engine Traits
// ============================================================================

/// A diagram engine: validation plus SVG rendering
pub trait DiagramEngine: Send + Sync {
    /// Engine name (for logs)
    fn name(&self) -> &str;

    /// Validate `source` without rendering
    ///
    /// # Errors
    ///
    /// Returns the first problem found in `source`.
    fn parse(&self, source: &str) -> Result<(), DiagramError>;

    /// Render `source` to an SVG document
    ///
    /// # Errors
    ///
    /// Returns a `DiagramError` when `source` cannot be rendered.
    fn render(&self, source: &str) -> Result<String, DiagramError>;
}

/// Loads a diagram engine (possibly expensive, possibly remote)
#[async_trait]
pub trait DiagramLoader: Send + Sync {
    /// Produce the engine
    async fn load(&self) -> Result<Arc<dyn DiagramEngine>, DiagramError>;
}

/// Loader for the built-in [`BasicDiagramEngine`]
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinLoader;

#[async_trait]
impl DiagramLoader for BuiltinLoader {
    async fn load(&self) -> Result<Arc<dyn DiagramEngine>, DiagramError> {
        Ok(Arc::new(BasicDiagramEngine))
    }
}

// ============================================================================
// Diagram State
// ============================================================================

/// Which view of a diagram block is visible
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiagramView {
    /// The SVG
    #[default]
    Rendered,
    /// The original code block
    Raw,
}

/// Outcome of rendering one diagram block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagramState {
    /// Whether the source validated
    pub valid: bool,
    /// Rendered SVG (present only when valid)
    pub svg: Option<String>,
    /// Visible view
    pub view: DiagramView,
    /// Error message when invalid
    pub error: Option<String>,
}

impl DiagramState {
    /// A successful render, showing the SVG
    #[must_use]
    pub fn rendered(svg: String) -> Self {
        Self {
            valid: true,
            svg: Some(svg),
            view: DiagramView::Rendered,
            error: None,
        }
    }

    /// A failed render, showing the raw code
    #[must_use]
    pub fn failed(error: &DiagramError) -> Self {
        Self {
            valid: false,
            svg: None,
            view: DiagramView::Raw,
            error: Some(error.to_string()),
        }
    }

    /// Swap rendered and raw views
    ///
    /// Returns the new view, or `None` for an invalid diagram (which has
    /// nothing to swap to).
    pub fn toggle(&mut self) -> Option<DiagramView> {
        if self.svg.is_none() {
            return None;
        }
        self.view = match self.view {
            DiagramView::Rendered => DiagramView::Raw,
            DiagramView::Raw => DiagramView::Rendered,
        };
        Some(self.view)
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Renders diagram source with a lazily loaded engine
pub struct DiagramRenderer {
    loader: Arc<dyn DiagramLoader>,
    engine: OnceCell<Arc<dyn DiagramEngine>>,
    load_attempts: AtomicUsize,
}

impl std::fmt::Debug for DiagramRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramRenderer")
            .field("loaded", &self.is_loaded())
            .field("load_attempts", &self.load_attempts())
            .finish()
    }
}

impl Default for DiagramRenderer {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinLoader))
    }
}

impl DiagramRenderer {
    /// Create a renderer that loads its engine through `loader`
    #[must_use]
    pub fn new(loader: Arc<dyn DiagramLoader>) -> Self {
        Self {
            loader,
            engine: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Whether the engine has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.engine.initialized()
    }

    /// How many times the loader has been invoked
    #[must_use]
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    async fn engine(&self) -> Result<&Arc<dyn DiagramEngine>, DiagramError> {
        self.engine
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                let engine = self.loader.load().await?;
                tracing::debug!(engine = engine.name(), "Diagram engine loaded");
                Ok::<_, DiagramError>(engine)
            })
            .await
    }

    /// Validate and render `source`
    ///
    /// # Errors
    ///
    /// Returns `DiagramError::LoadFailed` if the engine cannot be loaded, or
    /// the engine's validation/render error.
    pub async fn render(&self, source: &str) -> Result<DiagramState, DiagramError> {
        let engine = self.engine().await.map_err(|e| match e {
            DiagramError::LoadFailed(_) => e,
            other => DiagramError::LoadFailed(other.to_string()),
        })?;

        engine.parse(source)?;
        let svg = engine.render(source)?;
        Ok(DiagramState::rendered(svg))
    }

    /// Callback form of [`Self::render`]
    ///
    /// Exactly one of the callbacks runs. The returned state is what the
    /// block should show (raw code on failure).
    pub async fn render_with<S, E>(&self, source: &str, on_success: S, on_error: E) -> DiagramState
    where
        S: FnOnce(&DiagramState),
        E: FnOnce(&DiagramError),
    {
        match self.render(source).await {
            Ok(state) => {
                on_success(&state);
                state
            }
            Err(error) => {
                tracing::warn!(error = %error, "Diagram render failed");
                on_error(&error);
                DiagramState::failed(&error)
            }
        }
    }
}
