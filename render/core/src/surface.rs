//! Rendering Surface
//!
//! A headless, in-memory document for one chat message. UI shells (web view,
//! TUI, test harness) serialize it with [`SurfaceHandle::to_html`] and
//! display the result; they never hold rendering state of their own.
//!
//! # Design Philosophy
//!
//! Surfaces are explicit handles, passed to every component that touches
//! them. Nothing looks a surface up by name or walks a global document.
//!
//! ```text
//! SurfaceHandle (Clone, Arc)
//!   ├── nodes        Html fragments + BlockId references, in order
//!   ├── block arena  BlockId → BlockEntry (source, view, affordances)
//!   ├── processed    set of BlockIds the enhancer has finished
//!   ├── scroll       broadcast of user scroll events
//!   └── animation    at most one live AnimationHandle
//! ```
//!
//! # Block identity
//!
//! `set_markup` is called for every partial render. A block keeps its
//! [`BlockId`] (and with it its enhancement and processed membership) when
//! its ordinal, info tag, source and closed flag are unchanged. Any change
//! allocates a fresh id, so the enhancer sees it as new work.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::animation::AnimationHandle;
use crate::classifier::BlockClass;
use crate::diagram::{DiagramState, DiagramView};
use crate::markup::sanitize::escape_html;
use crate::markup::{block_attributes, code_open_tag, FencedBlock, Markup, MarkupNode};

const SCROLL_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Identifiers
// ============================================================================

/// Surface identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface_{}", self.0)
    }
}

/// Identity of one block in a surface's arena
///
/// Ids are never reused within a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

// ============================================================================
// Block State
// ============================================================================

/// Snapshot of one block as the enhancer sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Arena identity
    pub id: BlockId,
    /// Position in the document's block sequence
    pub ordinal: usize,
    /// Fence info tag as written
    pub info: Option<String>,
    /// Classification resolved at parse time
    pub class: BlockClass,
    /// Raw code
    pub source: String,
    /// Whether the closing fence has arrived
    pub closed: bool,
}

impl BlockDescriptor {
    /// Detected language, if any
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.class.language.as_deref()
    }
}

/// Copy affordance state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyState {
    /// Ready to copy
    #[default]
    Idle,
    /// Showing "Copied" feedback
    Copied,
}

/// Execute affordance state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecuteState {
    /// Ready to run
    #[default]
    Idle,
    /// Query in flight
    Busy,
}

/// How a block's body is currently shown
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BlockView {
    /// Escaped source, as parsed
    #[default]
    Plain,
    /// Syntax-highlighted inner HTML for the `<code>` element
    Highlighted(String),
    /// Diagram output (rendered or failed)
    Diagram(DiagramState),
}

#[derive(Debug)]
struct BlockEntry {
    block: FencedBlock,
    view: BlockView,
    copy: Option<CopyState>,
    execute: Option<ExecuteState>,
    copy_reset: Option<AbortHandle>,
}

impl BlockEntry {
    fn new(block: FencedBlock) -> Self {
        Self {
            block,
            view: BlockView::Plain,
            copy: None,
            execute: None,
            copy_reset: None,
        }
    }

    fn matches(&self, block: &FencedBlock) -> bool {
        self.block.ordinal == block.ordinal
            && self.block.info == block.info
            && self.block.source == block.source
            && self.block.closed == block.closed
    }

    fn release(&mut self) {
        if let Some(reset) = self.copy_reset.take() {
            reset.abort();
        }
    }
}

impl Drop for BlockEntry {
    fn drop(&mut self) {
        self.release();
    }
}

/// A user scroll report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollEvent {
    /// Pixels between the viewport bottom and the content bottom
    pub distance_from_bottom: u32,
}

// ============================================================================
// Surface
// ============================================================================

#[derive(Debug)]
enum SurfaceNode {
    Html(String),
    Block(BlockId),
}

#[derive(Debug, Default)]
struct SurfaceState {
    nodes: Vec<SurfaceNode>,
    blocks: HashMap<BlockId, BlockEntry>,
    processed: HashSet<BlockId>,
    next_block: u64,
    revision: u64,
    scroll_requests: u64,
}

impl SurfaceState {
    fn ordered_blocks(&self) -> impl Iterator<Item = (BlockId, &BlockEntry)> {
        self.nodes.iter().filter_map(|node| match node {
            SurfaceNode::Block(id) => self.blocks.get(id).map(|entry| (*id, entry)),
            SurfaceNode::Html(_) => None,
        })
    }

    fn allocate(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }
}

#[derive(Debug)]
struct SurfaceShared {
    id: SurfaceId,
    state: Mutex<SurfaceState>,
    scroll_tx: broadcast::Sender<ScrollEvent>,
    animation: Mutex<Option<AnimationHandle>>,
}

/// Shared handle to one message's rendering surface
#[derive(Clone, Debug)]
pub struct SurfaceHandle {
    shared: Arc<SurfaceShared>,
}

impl Default for SurfaceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SurfaceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for SurfaceHandle {}

impl SurfaceHandle {
    /// Create an empty surface
    #[must_use]
    pub fn new() -> Self {
        let (scroll_tx, _) = broadcast::channel(SCROLL_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SurfaceShared {
                id: SurfaceId::next(),
                state: Mutex::new(SurfaceState::default()),
                scroll_tx,
                animation: Mutex::new(None),
            }),
        }
    }

    /// Surface identifier
    #[must_use]
    pub fn id(&self) -> SurfaceId {
        self.shared.id
    }

    // ------------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------------

    /// Replace the surface content with new markup
    ///
    /// Unchanged blocks keep their id, view and processed membership.
    pub fn set_markup(&self, markup: &Markup) {
        let mut state = self.shared.state.lock();

        let mut previous: HashMap<usize, BlockId> = state
            .ordered_blocks()
            .map(|(id, entry)| (entry.block.ordinal, id))
            .collect();

        let mut nodes = Vec::with_capacity(markup.nodes().len());
        let mut kept = HashSet::new();
        for node in markup.nodes() {
            match node {
                MarkupNode::Html(html) => nodes.push(SurfaceNode::Html(html.clone())),
                MarkupNode::Block(block) => {
                    let reused = previous
                        .remove(&block.ordinal)
                        .filter(|id| state.blocks.get(id).is_some_and(|e| e.matches(block)));
                    let id = match reused {
                        Some(id) => id,
                        None => {
                            let id = state.allocate();
                            state.blocks.insert(id, BlockEntry::new(block.clone()));
                            id
                        }
                    };
                    kept.insert(id);
                    nodes.push(SurfaceNode::Block(id));
                }
            }
        }

        state.blocks.retain(|id, _| kept.contains(id));
        state.processed.retain(|id| kept.contains(id));
        state.nodes = nodes;
        state.revision += 1;
    }

    /// Remove all content
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.nodes.clear();
        state.blocks.clear();
        state.processed.clear();
        state.revision += 1;
    }

    /// Number of `set_markup` / `clear` calls so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.shared.state.lock().revision
    }

    /// Serialize the surface to HTML
    #[must_use]
    pub fn to_html(&self) -> String {
        let state = self.shared.state.lock();
        let mut html = String::new();
        for node in &state.nodes {
            match node {
                SurfaceNode::Html(fragment) => html.push_str(fragment),
                SurfaceNode::Block(id) => {
                    if let Some(entry) = state.blocks.get(id) {
                        let processed = state.processed.contains(id);
                        render_block(&mut html, *id, entry, processed);
                    }
                }
            }
        }
        html
    }

    // ------------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------------

    /// All blocks, in document order
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockDescriptor> {
        let state = self.shared.state.lock();
        state
            .ordered_blocks()
            .map(|(id, entry)| describe(id, &entry.block))
            .collect()
    }

    /// Blocks not yet in the processed set, in document order
    #[must_use]
    pub fn pending_blocks(&self) -> Vec<BlockDescriptor> {
        let state = self.shared.state.lock();
        state
            .ordered_blocks()
            .filter(|(id, _)| !state.processed.contains(id))
            .map(|(id, entry)| describe(id, &entry.block))
            .collect()
    }

    /// Look up one block
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<BlockDescriptor> {
        let state = self.shared.state.lock();
        state.blocks.get(&id).map(|entry| describe(id, &entry.block))
    }

    /// Whether the enhancer has finished this block
    #[must_use]
    pub fn is_processed(&self, id: BlockId) -> bool {
        self.shared.state.lock().processed.contains(&id)
    }

    /// Add a block to the processed set
    ///
    /// Returns `false` if the block is gone or was already processed.
    pub fn mark_processed(&self, id: BlockId) -> bool {
        let mut state = self.shared.state.lock();
        state.blocks.contains_key(&id) && state.processed.insert(id)
    }

    /// Number of processed blocks
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.shared.state.lock().processed.len()
    }

    /// Current view of a block
    #[must_use]
    pub fn view(&self, id: BlockId) -> Option<BlockView> {
        self.shared.state.lock().blocks.get(&id).map(|e| e.view.clone())
    }

    /// Replace a block's view; returns `false` if the block is gone
    pub fn set_view(&self, id: BlockId, view: BlockView) -> bool {
        let mut state = self.shared.state.lock();
        match state.blocks.get_mut(&id) {
            Some(entry) => {
                entry.view = view;
                true
            }
            None => false,
        }
    }

    /// Swap a diagram block between rendered and raw views
    ///
    /// Returns the new view, or `None` when the block has no rendered
    /// diagram to swap to.
    pub fn toggle_diagram_view(&self, id: BlockId) -> Option<DiagramView> {
        let mut state = self.shared.state.lock();
        match state.blocks.get_mut(&id).map(|e| &mut e.view) {
            Some(BlockView::Diagram(diagram)) => diagram.toggle(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Affordances
    // ------------------------------------------------------------------------

    /// Attach copy (always) and execute (when `executable`) affordances
    pub fn attach_affordances(&self, id: BlockId, executable: bool) -> bool {
        let mut state = self.shared.state.lock();
        match state.blocks.get_mut(&id) {
            Some(entry) => {
                entry.copy.get_or_insert(CopyState::Idle);
                if executable {
                    entry.execute.get_or_insert(ExecuteState::Idle);
                }
                true
            }
            None => false,
        }
    }

    /// Copy affordance state, if attached
    #[must_use]
    pub fn copy_state(&self, id: BlockId) -> Option<CopyState> {
        self.shared.state.lock().blocks.get(&id).and_then(|e| e.copy)
    }

    /// Set copy feedback, replacing (and aborting) any pending reset
    pub fn set_copy_state(&self, id: BlockId, copy: CopyState, reset: Option<AbortHandle>) {
        let mut state = self.shared.state.lock();
        match state.blocks.get_mut(&id) {
            Some(entry) if entry.copy.is_some() => {
                entry.release();
                entry.copy = Some(copy);
                entry.copy_reset = reset;
            }
            _ => {
                if let Some(reset) = reset {
                    reset.abort();
                }
            }
        }
    }

    /// Return copy feedback to Idle (called by the reset task itself)
    pub fn revert_copy_feedback(&self, id: BlockId) {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.blocks.get_mut(&id) {
            entry.copy_reset = None;
            if entry.copy.is_some() {
                entry.copy = Some(CopyState::Idle);
            }
        }
    }

    /// Execute affordance state, if attached
    #[must_use]
    pub fn execute_state(&self, id: BlockId) -> Option<ExecuteState> {
        self.shared.state.lock().blocks.get(&id).and_then(|e| e.execute)
    }

    /// Move an idle execute affordance to Busy
    ///
    /// Returns `false` (and changes nothing) when there is no execute
    /// affordance or it is already busy.
    pub fn try_begin_execute(&self, id: BlockId) -> bool {
        let mut state = self.shared.state.lock();
        match state.blocks.get_mut(&id).and_then(|e| e.execute.as_mut()) {
            Some(execute) if *execute == ExecuteState::Idle => {
                *execute = ExecuteState::Busy;
                true
            }
            _ => false,
        }
    }

    /// Return an execute affordance to Idle
    pub fn finish_execute(&self, id: BlockId) {
        let mut state = self.shared.state.lock();
        if let Some(execute) = state.blocks.get_mut(&id).and_then(|e| e.execute.as_mut()) {
            *execute = ExecuteState::Idle;
        }
    }

    // ------------------------------------------------------------------------
    // Scrolling
    // ------------------------------------------------------------------------

    /// Report a user scroll (called by the UI shell)
    pub fn report_scroll(&self, distance_from_bottom: u32) {
        // No subscribers simply means nobody is animating
        let _ = self.shared.scroll_tx.send(ScrollEvent {
            distance_from_bottom,
        });
    }

    /// Number of live scroll subscriptions
    ///
    /// Drops back to zero once every reveal on the surface has finished or
    /// been cancelled.
    #[must_use]
    pub fn scroll_subscribers(&self) -> usize {
        self.shared.scroll_tx.receiver_count()
    }

    /// Subscribe to user scroll reports
    #[must_use]
    pub fn subscribe_scroll(&self) -> broadcast::Receiver<ScrollEvent> {
        self.shared.scroll_tx.subscribe()
    }

    /// Ask the UI shell to keep the bottom of the surface in view
    pub fn request_scroll_to_bottom(&self) {
        self.shared.state.lock().scroll_requests += 1;
    }

    /// Number of auto-scroll requests so far
    #[must_use]
    pub fn scroll_requests(&self) -> u64 {
        self.shared.state.lock().scroll_requests
    }

    // ------------------------------------------------------------------------
    // Animation slot
    // ------------------------------------------------------------------------

    /// Install a new live animation, cancelling the previous one
    pub fn replace_animation(&self, handle: AnimationHandle) {
        let previous = self.shared.animation.lock().replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Cancel the live animation, if any
    pub fn cancel_animation(&self) {
        let previous = self.shared.animation.lock().take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// The live animation, if any
    #[must_use]
    pub fn animation(&self) -> Option<AnimationHandle> {
        self.shared.animation.lock().clone()
    }
}

fn describe(id: BlockId, block: &FencedBlock) -> BlockDescriptor {
    BlockDescriptor {
        id,
        ordinal: block.ordinal,
        info: block.info.clone(),
        class: block.class.clone(),
        source: block.source.clone(),
        closed: block.closed,
    }
}

// ============================================================================
// Serialization
// ============================================================================

fn render_block(html: &mut String, id: BlockId, entry: &BlockEntry, processed: bool) {
    if !processed && entry.view == BlockView::Plain && entry.copy.is_none() {
        html.push_str(&entry.block.to_html());
        return;
    }

    html.push_str(&format!(
        "<div class=\"code-block-wrapper\" data-block-id=\"{id}\">\n"
    ));
    render_actions(html, entry);

    match &entry.view {
        BlockView::Plain => html.push_str(&entry.block.to_html()),
        BlockView::Highlighted(inner) => {
            html.push_str(&pre_open(&entry.block, false));
            html.push_str(inner);
            html.push_str("</code></pre>\n");
        }
        BlockView::Diagram(diagram) => render_diagram(html, entry, diagram),
    }

    html.push_str("</div>\n");
}

fn render_actions(html: &mut String, entry: &BlockEntry) {
    if entry.copy.is_none() && entry.execute.is_none() {
        return;
    }
    html.push_str("<div class=\"code-actions\">");
    if let Some(copy) = entry.copy {
        let (state, label) = match copy {
            CopyState::Idle => ("idle", "Copy"),
            CopyState::Copied => ("copied", "Copied"),
        };
        html.push_str(&format!(
            "<button class=\"copy-btn\" data-state=\"{state}\">{label}</button>"
        ));
    }
    if let Some(execute) = entry.execute {
        let button = match execute {
            ExecuteState::Idle => "<button class=\"execute-btn\" data-state=\"idle\">Execute</button>",
            ExecuteState::Busy => {
                "<button class=\"execute-btn\" data-state=\"busy\" disabled>Running...</button>"
            }
        };
        html.push_str(button);
    }
    html.push_str("</div>\n");
}

fn render_diagram(html: &mut String, entry: &BlockEntry, diagram: &DiagramState) {
    match (&diagram.svg, &diagram.error) {
        (Some(svg), _) => {
            let rendered = diagram.view == DiagramView::Rendered;
            html.push_str(&format!(
                "<div class=\"diagram\" data-view=\"rendered\"{}>",
                if rendered { "" } else { " hidden" }
            ));
            html.push_str(svg);
            html.push_str("</div>\n");
            html.push_str(&pre_open(&entry.block, rendered));
        }
        (None, Some(error)) => {
            html.push_str(&format!(
                "<div class=\"diagram-error\">{}</div>\n",
                escape_html(error)
            ));
            html.push_str(&pre_open(&entry.block, false));
        }
        (None, None) => html.push_str(&pre_open(&entry.block, false)),
    }
    html.push_str(&escape_html(&entry.block.source));
    html.push_str("</code></pre>\n");
}

fn pre_open(block: &FencedBlock, hidden: bool) -> String {
    format!(
        "<pre class=\"code-block\" data-block=\"{}\"{}{}>{}",
        block.ordinal,
        block_attributes(&block.class),
        if hidden { " hidden" } else { "" },
        code_open_tag(&block.class)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_markup;

    fn markup(text: &str) -> Markup {
        parse_markup(text, 1 << 20).unwrap()
    }

    #[test]
    fn test_unchanged_blocks_keep_identity() {
        let surface = SurfaceHandle::new();
        surface.set_markup(&markup("Hi\n\n```sql\nSELECT 1;\n```\n"));
        let first = surface.blocks()[0].id;
        assert!(surface.mark_processed(first));

        surface.set_markup(&markup("Hi there\n\n```sql\nSELECT 1;\n```\n\nMore"));
        let blocks = surface.blocks();
        assert_eq!(blocks[0].id, first);
        assert!(surface.is_processed(first));
        assert!(surface.pending_blocks().is_empty());
    }

    #[test]
    fn test_changed_block_gets_new_identity() {
        let surface = SurfaceHandle::new();
        surface.set_markup(&markup("```sql\nSELECT"));
        let streaming = surface.blocks()[0].id;
        assert!(!surface.blocks()[0].closed);
        surface.mark_processed(streaming);

        surface.set_markup(&markup("```sql\nSELECT 1;\n```\n"));
        let closed = surface.blocks()[0].id;
        assert_ne!(streaming, closed);
        assert!(!surface.is_processed(closed));
        assert_eq!(surface.processed_count(), 0);
        assert!(surface.block(streaming).is_none());
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let surface = SurfaceHandle::new();
        surface.set_markup(&markup("```\nplain\n```\n"));
        let id = surface.blocks()[0].id;
        assert!(surface.mark_processed(id));
        assert!(!surface.mark_processed(id));
        assert_eq!(surface.processed_count(), 1);
    }

    #[test]
    fn test_execute_state_machine() {
        let surface = SurfaceHandle::new();
        surface.set_markup(&markup("```sql\nSELECT 1;\n```\n"));
        let id = surface.blocks()[0].id;

        assert!(!surface.try_begin_execute(id));
        surface.attach_affordances(id, true);
        assert_eq!(surface.execute_state(id), Some(ExecuteState::Idle));
        assert!(surface.try_begin_execute(id));
        assert!(!surface.try_begin_execute(id));
        assert!(surface.to_html().contains("data-state=\"busy\" disabled"));
        surface.finish_execute(id);
        assert_eq!(surface.execute_state(id), Some(ExecuteState::Idle));
    }

    #[test]
    fn test_plain_blocks_serialize_like_markup() {
        let text = "Intro\n\n```json\n{\"a\": 1}\n```\n";
        let surface = SurfaceHandle::new();
        let parsed = markup(text);
        surface.set_markup(&parsed);
        assert_eq!(surface.to_html(), parsed.to_html());
    }

    #[test]
    fn test_enhanced_block_has_toolbar() {
        let surface = SurfaceHandle::new();
        surface.set_markup(&markup("```python\nprint(1)\n```\n"));
        let id = surface.blocks()[0].id;
        surface.attach_affordances(id, false);
        surface.mark_processed(id);

        let html = surface.to_html();
        assert!(html.contains(&format!("data-block-id=\"{id}\"")));
        assert!(html.contains("class=\"copy-btn\" data-state=\"idle\">Copy<"));
        assert!(!html.contains("execute-btn"));
    }

    #[tokio::test]
    async fn test_scroll_reports_reach_subscribers() {
        let surface = SurfaceHandle::new();
        let mut rx = surface.subscribe_scroll();
        surface.report_scroll(250);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.distance_from_bottom, 250);
    }

    #[test]
    fn test_surface_ids_are_unique() {
        assert_ne!(SurfaceHandle::new().id(), SurfaceHandle::new().id());
        let surface = SurfaceHandle::new();
        assert_eq!(surface.clone(), surface);
    }
}
