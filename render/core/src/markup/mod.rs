//! Markup Service - Parse, Sanitize, Classify, Cache
//!
//! Turns assistant text into sanitized, semantically tagged markup. The
//! service is an explicitly constructed object shared by `Arc`; it owns two
//! independent bounded caches:
//!
//! - **full**: complete texts (finished replies, final animation frame)
//! - **partial**: in-progress prefixes, which are almost always unique per
//!   call and would otherwise thrash the full cache
//!
//! # Pipeline
//!
//! ```text
//! text ──► bare-SQL promotion ──► pulldown-cmark ──► sanitize_event ──► Markup
//!                                     │                                  │
//!                         fenced blocks split out              Html nodes + FencedBlocks
//!                         and classified                       (tables wrapped)
//! ```
//!
//! Parsing never fails from the caller's point of view: oversize input or a
//! parser panic yields an HTML-escaped fallback paragraph.

mod cache;
pub mod sanitize;

pub use cache::{CacheStats, FifoCache, DEFAULT_CACHE_CAPACITY};

use std::borrow::Cow;
use std::fmt::Write as _;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::classifier::{classify_block, is_sql_content, BlockClass};
use crate::error::ParseError;
use sanitize::{escape_html, sanitize_event};

/// Opening wrapper placed around every table
pub const TABLE_WRAP_OPEN: &str = "<div class=\"table-scroll\">\n";
/// Closing wrapper placed around every table
pub const TABLE_WRAP_CLOSE: &str = "</div>\n";

// ============================================================================
// Configuration
// ============================================================================

/// Markup service configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupConfig {
    /// Maximum entries per cache (full and partial each)
    pub cache_capacity: usize,
    /// Texts shorter than this (bytes) skip the partial cache
    pub partial_threshold: usize,
    /// Texts longer than this (bytes) are not parsed
    pub max_source_bytes: usize,
    /// How often the full cache is swept
    pub sweep_interval: Duration,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            partial_threshold: 100,
            max_source_bytes: 1024 * 1024,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

// ============================================================================
// Markup Model
// ============================================================================

/// One fenced (or indented) code region
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FencedBlock {
    /// Position among the blocks of its document (0-based)
    pub ordinal: usize,
    /// First word of the fence info string, as written
    pub info: Option<String>,
    /// Raw code, without fences
    pub source: String,
    /// Resolved language/SQL/diagram flags
    pub class: BlockClass,
    /// Whether the closing fence has arrived
    pub closed: bool,
}

impl FencedBlock {
    /// Plain (not yet enhanced) HTML for this block
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut html = String::with_capacity(self.source.len() + 128);
        let _ = write!(
            html,
            "<pre class=\"code-block\" data-block=\"{}\"{}>",
            self.ordinal,
            block_attributes(&self.class)
        );
        html.push_str(&code_open_tag(&self.class));
        html.push_str(&escape_html(&self.source));
        html.push_str("</code></pre>\n");
        html
    }
}

/// `data-*` attributes describing a block's classification
#[must_use]
pub fn block_attributes(class: &BlockClass) -> String {
    format!(
        " data-lang=\"{}\" data-sql=\"{}\" data-diagram=\"{}\"",
        escape_html(class.language.as_deref().unwrap_or("")),
        class.sql,
        class.diagram
    )
}

/// `<code>` opening tag, with a language class when known
#[must_use]
pub fn code_open_tag(class: &BlockClass) -> String {
    match class.language.as_deref() {
        Some(lang) => format!("<code class=\"language-{}\">", escape_html(lang)),
        None => "<code>".to_string(),
    }
}

/// A node of rendered markup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkupNode {
    /// Sanitized HTML fragment
    Html(String),
    /// A code block, kept structured for the enhancer
    Block(FencedBlock),
}

/// Sanitized, tagged markup for one source text
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Markup {
    nodes: Vec<MarkupNode>,
    fallback: bool,
}

impl Markup {
    /// HTML-escaped fallback used when parsing fails
    #[must_use]
    pub fn escaped(text: &str) -> Self {
        let escaped = escape_html(text).replace('\n', "<br>\n");
        Self {
            nodes: vec![MarkupNode::Html(format!(
                "<p class=\"render-fallback\">{escaped}</p>\n"
            ))],
            fallback: true,
        }
    }

    /// All nodes in document order
    #[must_use]
    pub fn nodes(&self) -> &[MarkupNode] {
        &self.nodes
    }

    /// The code blocks, in document order
    pub fn blocks(&self) -> impl Iterator<Item = &FencedBlock> {
        self.nodes.iter().filter_map(|node| match node {
            MarkupNode::Block(block) => Some(block),
            MarkupNode::Html(_) => None,
        })
    }

    /// Whether this is the escaped-text fallback
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Serialize to a single HTML string
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for node in &self.nodes {
            match node {
                MarkupNode::Html(fragment) => html.push_str(fragment),
                MarkupNode::Block(block) => html.push_str(&block.to_html()),
            }
        }
        html
    }
}

// ============================================================================
// Markup Service
// ============================================================================

/// Counters for both caches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkupCacheStats {
    /// Full-render cache
    pub full: CacheStats,
    /// Partial-render cache
    pub partial: CacheStats,
}

/// Parses assistant text into sanitized markup, with memoization
#[derive(Debug)]
pub struct MarkupService {
    config: MarkupConfig,
    full: Mutex<FifoCache<String, Arc<Markup>>>,
    partial: Mutex<FifoCache<String, Arc<Markup>>>,
}

impl Default for MarkupService {
    fn default() -> Self {
        Self::new(MarkupConfig::default())
    }
}

impl MarkupService {
    /// Create a service with empty caches
    #[must_use]
    pub fn new(config: MarkupConfig) -> Self {
        Self {
            full: Mutex::new(FifoCache::new(config.cache_capacity)),
            partial: Mutex::new(FifoCache::new(config.cache_capacity)),
            config,
        }
    }

    /// Service configuration
    #[must_use]
    pub fn config(&self) -> &MarkupConfig {
        &self.config
    }

    /// Render complete text
    ///
    /// Identical input returns the same `Arc` while it stays cached.
    pub fn render_full(&self, text: &str) -> Arc<Markup> {
        if let Some(hit) = self.full.lock().get(&text.to_string()) {
            return hit;
        }

        let markup = Arc::new(self.parse_or_escape(text));
        self.full.lock().insert(text.to_string(), Arc::clone(&markup));
        markup
    }

    /// Render in-progress text
    ///
    /// Short texts go through [`Self::render_full`]; longer ones use the
    /// separate partial cache.
    pub fn render_partial(&self, text: &str) -> Arc<Markup> {
        if text.len() < self.config.partial_threshold {
            return self.render_full(text);
        }

        if let Some(hit) = self.partial.lock().get(&text.to_string()) {
            return hit;
        }

        let markup = Arc::new(self.parse_or_escape(text));
        self.partial
            .lock()
            .insert(text.to_string(), Arc::clone(&markup));
        markup
    }

    /// Drop every full-render entry
    pub fn clear_full_cache(&self) {
        let mut cache = self.full.lock();
        tracing::debug!(entries = cache.len(), "Clearing full markup cache");
        cache.clear();
    }

    /// Drop every partial-render entry
    ///
    /// Call once a message finishes streaming; its prefixes are never
    /// looked up again.
    pub fn clear_partial_cache(&self) {
        let mut cache = self.partial.lock();
        tracing::debug!(entries = cache.len(), "Clearing partial markup cache");
        cache.clear();
    }

    /// Snapshot of both caches' counters
    #[must_use]
    pub fn cache_stats(&self) -> MarkupCacheStats {
        MarkupCacheStats {
            full: self.full.lock().stats(),
            partial: self.partial.lock().stats(),
        }
    }

    /// Start clearing the full cache every `period`
    ///
    /// The sweeper holds only a weak reference, so it stops on its own once
    /// the service is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let service: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match service.upgrade() {
                    Some(service) => service.clear_full_cache(),
                    None => break,
                }
            }
        });
        SweeperHandle { task: Some(task) }
    }

    fn parse_or_escape(&self, text: &str) -> Markup {
        match parse_markup(text, self.config.max_source_bytes) {
            Ok(markup) => markup,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "Markup parse failed, using escaped text");
                Markup::escaped(text)
            }
        }
    }
}

/// Handle to the periodic full-cache sweeper
///
/// Cancelling is idempotent; dropping the handle cancels too.
#[derive(Debug)]
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the sweeper is still scheduled
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse `text` into markup
///
/// # Errors
///
/// Returns `ParseError::TooLarge` when `text` exceeds `max_bytes`, and
/// `ParseError::Panicked` if the markdown parser panics.
pub fn parse_markup(text: &str, max_bytes: usize) -> Result<Markup, ParseError> {
    if text.len() > max_bytes {
        return Err(ParseError::TooLarge {
            len: text.len(),
            max: max_bytes,
        });
    }

    let source = promote_bare_sql(text);
    catch_unwind(AssertUnwindSafe(|| build_markup(&source))).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ParseError::Panicked(message)
    })
}

/// Wrap an unfenced reply that is a single SQL statement in a `sql` fence
///
/// Applies when the text has no fence markers, its first non-blank line is
/// SQL, and it ends with `;`.
#[must_use]
pub fn promote_bare_sql(text: &str) -> Cow<'_, str> {
    if text.contains("```") || text.contains("~~~") {
        return Cow::Borrowed(text);
    }

    let trimmed = text.trim();
    let first_line = trimmed.lines().find(|l| !l.trim().is_empty());
    match first_line {
        Some(line) if trimmed.ends_with(';') && is_sql_content(line, None) => {
            Cow::Owned(format!("```sql\n{trimmed}\n```\n"))
        }
        _ => Cow::Borrowed(text),
    }
}

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn build_markup(text: &str) -> Markup {
    let mut builder = MarkupBuilder::new(text);
    for (event, range) in Parser::new_ext(text, parser_options()).into_offset_iter() {
        builder.push(event, range);
    }
    builder.finish()
}

struct OpenBlock {
    info: Option<String>,
    fenced: bool,
    source: String,
    range: Range<usize>,
}

struct MarkupBuilder<'a> {
    text: &'a str,
    nodes: Vec<MarkupNode>,
    pending: Vec<Event<'a>>,
    open: Option<OpenBlock>,
    ordinal: usize,
}

impl<'a> MarkupBuilder<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            nodes: Vec::new(),
            pending: Vec::new(),
            open: None,
            ordinal: 0,
        }
    }

    fn push(&mut self, event: Event<'a>, range: Range<usize>) {
        if let Some(open) = self.open.as_mut() {
            match event {
                Event::Text(text) => open.source.push_str(&text),
                Event::End(TagEnd::CodeBlock) => self.close_block(),
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                self.flush();
                let (info, fenced) = match kind {
                    CodeBlockKind::Fenced(info) => (
                        info.split_whitespace().next().map(str::to_string),
                        true,
                    ),
                    CodeBlockKind::Indented => (None, false),
                };
                self.open = Some(OpenBlock {
                    info,
                    fenced,
                    source: String::new(),
                    range,
                });
            }
            Event::Start(Tag::Table(alignments)) => {
                self.pending.push(Event::Html(TABLE_WRAP_OPEN.into()));
                self.pending.push(Event::Start(Tag::Table(alignments)));
            }
            Event::End(TagEnd::Table) => {
                self.pending.push(Event::End(TagEnd::Table));
                self.pending.push(Event::Html(TABLE_WRAP_CLOSE.into()));
            }
            Event::SoftBreak => self.pending.push(Event::HardBreak),
            other => self.pending.push(sanitize_event(other)),
        }
    }

    fn close_block(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };
        let raw = self.text.get(open.range.clone()).unwrap_or("");
        let closed = !open.fenced || fence_is_closed(raw);
        let class = classify_block(open.info.as_deref(), &open.source);
        self.nodes.push(MarkupNode::Block(FencedBlock {
            ordinal: self.ordinal,
            info: open.info,
            source: open.source,
            class,
            closed,
        }));
        self.ordinal += 1;
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut html = String::new();
        pulldown_cmark::html::push_html(&mut html, self.pending.drain(..));
        self.nodes.push(MarkupNode::Html(html));
    }

    fn finish(mut self) -> Markup {
        // An unterminated block still gets its End event from the parser,
        // but guard against losing buffered code regardless.
        self.close_block();
        self.flush();
        Markup {
            nodes: self.nodes,
            fallback: false,
        }
    }
}

/// Whether a fenced block's raw text ends with a matching closing fence
///
/// Lines inside a blockquote or list keep their container prefix (`> `,
/// indentation) in the raw text, so it is stripped before comparing.
fn fence_is_closed(raw: &str) -> bool {
    let lines: Vec<&str> = raw.trim_end_matches(['\n', '\r']).lines().collect();
    if lines.len() < 2 {
        return false;
    }

    let opener = strip_container_prefix(lines[0]);
    let Some(fence_char) = opener.chars().next().filter(|c| *c == '`' || *c == '~') else {
        return false;
    };
    let fence_len = opener.chars().take_while(|c| *c == fence_char).count();

    let last = strip_container_prefix(lines[lines.len() - 1]).trim_end();
    last.len() >= fence_len && last.chars().all(|c| c == fence_char)
}

fn strip_container_prefix(line: &str) -> &str {
    line.trim_start_matches(|c: char| c == '>' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service() -> MarkupService {
        MarkupService::new(MarkupConfig {
            cache_capacity: 4,
            partial_threshold: 10,
            ..Default::default()
        })
    }

    #[test]
    fn test_render_full_is_memoized() {
        let service = service();
        let first = service.render_full("# Title\n\nSome *text*");
        let second = service.render_full("# Title\n\nSome *text*");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.to_html(), second.to_html());
        assert_eq!(service.cache_stats().full.hits, 1);
    }

    #[test]
    fn test_partial_uses_separate_cache() {
        let service = service();
        let text = "A paragraph that is long enough";
        let _ = service.render_partial(text);
        let stats = service.cache_stats();
        assert_eq!(stats.partial.entries, 1);
        assert_eq!(stats.full.entries, 0);

        // Short text delegates to the full path
        let _ = service.render_partial("short");
        assert_eq!(service.cache_stats().full.entries, 1);

        service.clear_partial_cache();
        assert_eq!(service.cache_stats().partial.entries, 0);
        assert_eq!(service.cache_stats().full.entries, 1);
    }

    #[test]
    fn test_fenced_block_is_tagged() {
        let markup = parse_markup("Intro\n\n```sql\nSELECT 1;\n```\n\nOutro", 1024).unwrap();
        let blocks: Vec<_> = markup.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source, "SELECT 1;\n");
        assert!(blocks[0].class.sql);
        assert!(blocks[0].closed);

        let html = markup.to_html();
        assert!(html.contains("data-lang=\"sql\" data-sql=\"true\" data-diagram=\"false\""));
        assert!(html.contains("<code class=\"language-sql\">SELECT 1;"));
        assert!(html.starts_with("<p>Intro</p>"));
        assert!(html.trim_end().ends_with("<p>Outro</p>"));
    }

    #[test]
    fn test_unclosed_fence_is_flagged() {
        let markup = parse_markup("```mermaid\ngraph TD\nA-->", 1024).unwrap();
        let block = markup.blocks().next().unwrap();
        assert!(!block.closed);
        assert!(block.class.diagram);
    }

    #[test]
    fn test_fence_in_blockquote_is_closed() {
        let markup = parse_markup("> ```mermaid\n> graph TD\n> A-->B\n> ```\n", 1024).unwrap();
        let block = markup.blocks().next().unwrap();
        assert!(block.class.diagram);
        assert!(block.closed);

        let open = parse_markup("> ```mermaid\n> graph TD\n> A-->B\n", 1024).unwrap();
        assert!(!open.blocks().next().unwrap().closed);
    }

    #[test]
    fn test_fence_in_list_item_is_closed() {
        let markup = parse_markup("1. Run this:\n\n   ```sql\n   SELECT 1;\n   ```\n", 1024).unwrap();
        assert!(markup.blocks().next().unwrap().closed);
    }

    #[test]
    fn test_tables_are_wrapped() {
        let markup = parse_markup("| a | b |\n|---|---|\n| 1 | 2 |\n", 1024).unwrap();
        let html = markup.to_html();
        assert!(html.starts_with(TABLE_WRAP_OPEN));
        assert!(html.contains("<table>"));
        assert!(html.trim_end().ends_with("</div>"));
    }

    #[test]
    fn test_unsafe_content_is_removed() {
        let markup = parse_markup(
            "<script>alert(1)</script>\n\n[click](javascript:alert(1)) <img src=x onerror=y>",
            4096,
        )
        .unwrap();
        let html = markup.to_html();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("javascript:"));
        assert!(html.contains("href=\"#\""));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn test_soft_breaks_become_hard_breaks() {
        let markup = parse_markup("line one\nline two", 1024).unwrap();
        assert!(markup.to_html().contains("<br />"));
    }

    #[test]
    fn test_bare_sql_is_promoted() {
        assert_eq!(
            promote_bare_sql("SELECT * FROM users;"),
            "```sql\nSELECT * FROM users;\n```\n"
        );
        assert!(matches!(promote_bare_sql("SELECT * FROM users"), Cow::Borrowed(_)));
        assert!(matches!(promote_bare_sql("Hello there;"), Cow::Borrowed(_)));
        assert!(matches!(
            promote_bare_sql("```sql\nSELECT 1;\n```"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_oversize_input_falls_back_to_escaped_text() {
        let service = MarkupService::new(MarkupConfig {
            max_source_bytes: 8,
            ..Default::default()
        });
        let markup = service.render_full("<b>too long</b>");
        assert!(markup.is_fallback());
        assert_eq!(
            markup.to_html(),
            "<p class=\"render-fallback\">&lt;b&gt;too long&lt;/b&gt;</p>\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_clears_full_cache() {
        let service = Arc::new(service());
        let _ = service.render_full("cached");
        let mut sweeper = service.spawn_sweeper(Duration::from_secs(60));
        assert!(sweeper.is_active());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(service.cache_stats().full.entries, 0);

        sweeper.cancel();
        sweeper.cancel();
        tokio::task::yield_now().await;
        assert!(!sweeper.is_active());
    }
}
