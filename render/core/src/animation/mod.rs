//! Reveal Animator - Paced Disclosure of a Finished Reply
//!
//! Reveals text into a surface a fixed amount per tick, so a one-line reply
//! and a five-thousand-character reply advance at the same visible rate.
//!
//! # Design Philosophy
//!
//! - **Rate, not duration**: each tick reveals `per_tick` characters or
//!   words; total time grows with length
//! - **Bounded parsing**: the markup service is re-invoked only after
//!   `rerender_min_chars` new characters, never per tick
//! - **Exact ending**: the last tick always renders the full text through
//!   `render_full`, so an unterminated fence in a prefix never survives
//! - **One run per surface**: starting a run cancels the surface's live
//!   handle first
//!
//! # States
//!
//! ```text
//! Idle ──start──► Running ──last tick──► Completed (on_done fires once)
//!                    │
//!                    └──cancel──► Cancelled (on_done never fires)
//! ```

mod scroll;

pub use scroll::ScrollTracker;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::markup::MarkupService;
use crate::surface::SurfaceHandle;

// ============================================================================
// Configuration
// ============================================================================

/// What one tick reveals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealUnit {
    /// Unicode scalar values
    #[default]
    Chars,
    /// Whitespace-separated words
    Words,
}

/// Reveal pacing configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealConfig {
    /// Time between ticks
    pub tick: Duration,
    /// Unit revealed per tick
    pub unit: RevealUnit,
    /// Units revealed per tick
    pub per_tick: usize,
    /// New characters required before re-rendering
    pub rerender_min_chars: usize,
    /// Distance from bottom (px) that still counts as "at the bottom"
    pub scroll_resume_threshold: u32,
    /// Scroll silence required before auto-scroll resumes
    pub scroll_quiet_period: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
            unit: RevealUnit::Chars,
            per_tick: 3,
            rerender_min_chars: 24,
            scroll_resume_threshold: 40,
            scroll_quiet_period: Duration::from_millis(800),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Lifecycle of one reveal run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationState {
    /// Created, not yet ticking
    Idle,
    /// Ticking
    Running,
    /// Finished; `on_done` has fired
    Completed,
    /// Stopped early
    Cancelled,
}

#[derive(Debug)]
struct HandleInner {
    state: Mutex<AnimationState>,
    task: Mutex<Option<AbortHandle>>,
}

/// Opaque handle to one reveal run
#[derive(Clone, Debug)]
pub struct AnimationHandle {
    inner: Arc<HandleInner>,
}

impl AnimationHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(AnimationState::Idle),
                task: Mutex::new(None),
            }),
        }
    }

    /// Stop the run
    ///
    /// Idempotent; a no-op after completion.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == AnimationState::Completed {
                return;
            }
            *state = AnimationState::Cancelled;
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AnimationState {
        *self.inner.state.lock()
    }

    /// Whether the run is still going
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), AnimationState::Idle | AnimationState::Running)
    }

    fn begin(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != AnimationState::Idle {
            return false;
        }
        *state = AnimationState::Running;
        true
    }

    fn attach(&self, task: AbortHandle) {
        if self.state() == AnimationState::Cancelled {
            task.abort();
            return;
        }
        *self.inner.task.lock() = Some(task);
    }

    /// Running → Completed; false if the run was cancelled meanwhile
    fn complete(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != AnimationState::Running {
            return false;
        }
        *state = AnimationState::Completed;
        self.inner.task.lock().take();
        true
    }
}

// ============================================================================
// Animator
// ============================================================================

/// Reveals text into surfaces at a fixed rate
#[derive(Debug, Clone)]
pub struct RevealAnimator {
    markup: Arc<MarkupService>,
    config: RevealConfig,
}

impl RevealAnimator {
    /// Create an animator that renders through `markup`
    #[must_use]
    pub fn new(markup: Arc<MarkupService>, config: RevealConfig) -> Self {
        Self { markup, config }
    }

    /// Animator configuration
    #[must_use]
    pub fn config(&self) -> &RevealConfig {
        &self.config
    }

    /// Start revealing `text` into `surface`
    ///
    /// Any run already live on `surface` is cancelled first. `on_done` runs
    /// once, after the final full render, unless the run is cancelled.
    pub fn start<F>(&self, text: impl Into<String>, surface: &SurfaceHandle, on_done: F) -> AnimationHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let text = text.into();
        let handle = AnimationHandle::new();
        surface.replace_animation(handle.clone());
        handle.begin();

        tracing::debug!(
            surface = %surface.id(),
            chars = text.chars().count(),
            unit = ?self.config.unit,
            "Starting reveal"
        );

        let task = tokio::spawn(run_reveal(
            Arc::clone(&self.markup),
            self.config.clone(),
            text,
            surface.clone(),
            handle.clone(),
            on_done,
        ));
        handle.attach(task.abort_handle());
        handle
    }
}

async fn run_reveal<F>(
    markup: Arc<MarkupService>,
    config: RevealConfig,
    text: String,
    surface: SurfaceHandle,
    handle: AnimationHandle,
    on_done: F,
) where
    F: FnOnce() + Send + 'static,
{
    let stops = reveal_stops(&text, config.unit, config.per_tick);
    let mut scroll_rx = surface.subscribe_scroll();
    let mut scroll = ScrollTracker::new(config.scroll_resume_threshold, config.scroll_quiet_period);

    let mut interval = tokio::time::interval(config.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let last = stops.len().saturating_sub(1);
    let mut rendered_chars = 0;
    for (index, stop) in stops.iter().enumerate() {
        interval.tick().await;

        if index == last {
            surface.set_markup(&markup.render_full(&text));
        } else if stop.chars - rendered_chars >= config.rerender_min_chars {
            surface.set_markup(&markup.render_partial(&text[..stop.byte]));
            rendered_chars = stop.chars;
        }

        let now = Instant::now();
        scroll.drain(&mut scroll_rx, now);
        if scroll.should_follow(now) {
            surface.request_scroll_to_bottom();
        }
    }

    if handle.complete() {
        tracing::debug!(surface = %surface.id(), "Reveal completed");
        on_done();
    }
}

/// One reveal position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stop {
    /// Byte offset (a char boundary)
    byte: usize,
    /// Characters revealed at this stop
    chars: usize,
}

/// Reveal positions, one per tick; the last is always the full text
fn reveal_stops(text: &str, unit: RevealUnit, per_tick: usize) -> Vec<Stop> {
    let per_tick = per_tick.max(1);
    let mut stops = Vec::new();

    match unit {
        RevealUnit::Chars => {
            for (count, (byte, c)) in text.char_indices().enumerate() {
                let chars = count + 1;
                if chars % per_tick == 0 {
                    stops.push(Stop {
                        byte: byte + c.len_utf8(),
                        chars,
                    });
                }
            }
        }
        RevealUnit::Words => {
            let mut words = 0;
            let mut chars = 0;
            let mut in_word = false;
            for (byte, c) in text.char_indices() {
                if c.is_whitespace() && in_word {
                    words += 1;
                    if words % per_tick == 0 {
                        stops.push(Stop { byte, chars });
                    }
                }
                in_word = !c.is_whitespace();
                chars += 1;
            }
        }
    }

    let total = Stop {
        byte: text.len(),
        chars: text.chars().count(),
    };
    if stops.last() != Some(&total) {
        stops.push(total);
    }
    stops
}
