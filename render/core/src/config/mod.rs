//! TOML Configuration File Support
//!
//! Centralized configuration loading for the renderer, from a TOML file at
//! `~/.config/db-genie/render.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`GENIE_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [markup]
//! cache_capacity = 100
//! partial_threshold = 100
//! sweep_interval_secs = 300
//!
//! [reveal]
//! tick_ms = 16
//! unit = "words"
//! per_tick = 2
//!
//! [enhance]
//! copied_feedback_ms = 2000
//! highlight = true
//!
//! [stream]
//! endpoint = "http://127.0.0.1:5000/pass_userinput_to_gemini"
//! query_endpoint = "http://127.0.0.1:5000/run_sql_query"
//! mode = "animated"
//! request_timeout_secs = 120
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::animation::{RevealConfig, RevealUnit};
use crate::enhance::EnhanceConfig;
use crate::markup::MarkupConfig;
use crate::streaming::{RenderMode, StreamConfig};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the winning configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[markup]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupToml {
    /// Entries per markup cache
    pub cache_capacity: Option<usize>,
    /// Shortest text rendered through the partial cache
    pub partial_threshold: Option<usize>,
    /// Largest source the parser accepts, in bytes
    pub max_source_bytes: Option<usize>,
    /// Full-cache sweep period in seconds
    pub sweep_interval_secs: Option<u64>,
}

/// `[reveal]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealToml {
    /// Tick period in milliseconds
    pub tick_ms: Option<u64>,
    /// "chars" or "words"
    pub unit: Option<RevealUnit>,
    /// Units per tick
    pub per_tick: Option<usize>,
    /// New characters required before re-rendering
    pub rerender_min_chars: Option<usize>,
    /// Distance from bottom still treated as "at the bottom"
    pub scroll_resume_threshold: Option<u32>,
    /// Scroll silence before auto-scroll resumes, in milliseconds
    pub scroll_quiet_period_ms: Option<u64>,
}

/// `[enhance]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceToml {
    /// "Copied" feedback duration in milliseconds
    pub copied_feedback_ms: Option<u64>,
    /// Whether to syntax-highlight code blocks
    pub highlight: Option<bool>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Chat endpoint URL
    pub endpoint: Option<String>,
    /// SQL execution endpoint URL
    pub query_endpoint: Option<String>,
    /// "direct" or "animated"
    pub mode: Option<RenderMode>,
    /// Chunk channel capacity
    pub channel_capacity: Option<usize>,
    /// Request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Root of `render.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderToml {
    /// Markup service settings
    pub markup: MarkupToml,
    /// Reveal animator settings
    pub reveal: RevealToml,
    /// Block enhancer settings
    pub enhance: EnhanceToml,
    /// Response stream settings
    pub stream: StreamToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved renderer configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    /// Markup service
    pub markup: MarkupConfig,
    /// Reveal animator
    pub reveal: RevealConfig,
    /// Block enhancer
    pub enhance: EnhanceConfig,
    /// Response streaming
    pub stream: StreamConfig,
    /// File the configuration was read from, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            markup: MarkupConfig::default(),
            reveal: RevealConfig::default(),
            enhance: EnhanceConfig::default(),
            stream: StreamConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RenderConfig {
    /// Defaults only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Record the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the renderer cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.markup.cache_capacity == 0 {
            return invalid("markup.cache_capacity must be at least 1");
        }
        if self.markup.max_source_bytes == 0 {
            return invalid("markup.max_source_bytes must be at least 1");
        }
        if self.markup.sweep_interval.is_zero() {
            return invalid("markup.sweep_interval_secs must be at least 1");
        }
        if self.reveal.tick.is_zero() {
            return invalid("reveal.tick_ms must be at least 1");
        }
        if self.reveal.per_tick == 0 {
            return invalid("reveal.per_tick must be at least 1");
        }
        if self.stream.channel_capacity == 0 {
            return invalid("stream.channel_capacity must be at least 1");
        }
        if self.stream.endpoint.trim().is_empty() {
            return invalid("stream.endpoint must not be empty");
        }
        if self.stream.query_endpoint.trim().is_empty() {
            return invalid("stream.query_endpoint must not be empty");
        }
        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/db-genie/render.toml` or
/// `~/.config/db-genie/render.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("db-genie").join("render.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged values fail validation. A missing file is not an error.
pub fn load_config() -> Result<RenderConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RenderConfig, ConfigError> {
    let mut config = RenderConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RenderToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RenderConfig, toml: &RenderToml) {
    // Markup
    if let Some(capacity) = toml.markup.cache_capacity {
        config.markup.cache_capacity = capacity;
    }
    if let Some(threshold) = toml.markup.partial_threshold {
        config.markup.partial_threshold = threshold;
    }
    if let Some(max) = toml.markup.max_source_bytes {
        config.markup.max_source_bytes = max;
    }
    if let Some(secs) = toml.markup.sweep_interval_secs {
        config.markup.sweep_interval = Duration::from_secs(secs);
    }

    // Reveal
    if let Some(ms) = toml.reveal.tick_ms {
        config.reveal.tick = Duration::from_millis(ms);
    }
    if let Some(unit) = toml.reveal.unit {
        config.reveal.unit = unit;
    }
    if let Some(per_tick) = toml.reveal.per_tick {
        config.reveal.per_tick = per_tick;
    }
    if let Some(chars) = toml.reveal.rerender_min_chars {
        config.reveal.rerender_min_chars = chars;
    }
    if let Some(threshold) = toml.reveal.scroll_resume_threshold {
        config.reveal.scroll_resume_threshold = threshold;
    }
    if let Some(ms) = toml.reveal.scroll_quiet_period_ms {
        config.reveal.scroll_quiet_period = Duration::from_millis(ms);
    }

    // Enhance
    if let Some(ms) = toml.enhance.copied_feedback_ms {
        config.enhance.copied_feedback = Duration::from_millis(ms);
    }
    if let Some(highlight) = toml.enhance.highlight {
        config.enhance.highlight = highlight;
    }

    // Stream
    if let Some(ref endpoint) = toml.stream.endpoint {
        config.stream.endpoint = endpoint.clone();
    }
    if let Some(ref endpoint) = toml.stream.query_endpoint {
        config.stream.query_endpoint = endpoint.clone();
    }
    if let Some(mode) = toml.stream.mode {
        config.stream.mode = mode;
    }
    if let Some(capacity) = toml.stream.channel_capacity {
        config.stream.channel_capacity = capacity;
    }
    if let Some(secs) = toml.stream.request_timeout_secs {
        config.stream.request_timeout = Duration::from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut RenderConfig) {
    apply_env_overrides(config, |key| std::env::var(key).ok());
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply `GENIE_*` overrides read through `lookup`
///
/// Unparseable values are logged and ignored. The config only reports
/// [`ConfigSource::Env`] when at least one value was applied.
fn apply_env_overrides<F>(config: &mut RenderConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = 0usize;

    if let Some(endpoint) = lookup("GENIE_CHAT_ENDPOINT") {
        config.stream.endpoint = endpoint;
        applied += 1;
    }
    if let Some(endpoint) = lookup("GENIE_QUERY_ENDPOINT") {
        config.stream.query_endpoint = endpoint;
        applied += 1;
    }
    if let Some(mode) = lookup("GENIE_RENDER_MODE") {
        match mode.parse::<RenderMode>() {
            Ok(mode) => {
                config.stream.mode = mode;
                applied += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring GENIE_RENDER_MODE"),
        }
    }
    if let Some(secs) = lookup("GENIE_REQUEST_TIMEOUT_SECS") {
        match secs.parse::<u64>() {
            Ok(secs) => {
                config.stream.request_timeout = Duration::from_secs(secs);
                applied += 1;
            }
            Err(_) => tracing::warn!(value = %secs, "Ignoring GENIE_REQUEST_TIMEOUT_SECS"),
        }
    }
    if let Some(capacity) = lookup("GENIE_CACHE_CAPACITY") {
        match capacity.parse::<usize>() {
            Ok(capacity) => {
                config.markup.cache_capacity = capacity;
                applied += 1;
            }
            Err(_) => tracing::warn!(value = %capacity, "Ignoring GENIE_CACHE_CAPACITY"),
        }
    }
    if let Some(threshold) = lookup("GENIE_PARTIAL_THRESHOLD") {
        match threshold.parse::<usize>() {
            Ok(threshold) => {
                config.markup.partial_threshold = threshold;
                applied += 1;
            }
            Err(_) => tracing::warn!(value = %threshold, "Ignoring GENIE_PARTIAL_THRESHOLD"),
        }
    }
    if let Some(ms) = lookup("GENIE_REVEAL_TICK_MS") {
        match ms.parse::<u64>() {
            Ok(ms) => {
                config.reveal.tick = Duration::from_millis(ms);
                applied += 1;
            }
            Err(_) => tracing::warn!(value = %ms, "Ignoring GENIE_REVEAL_TICK_MS"),
        }
    }
    if let Some(per_tick) = lookup("GENIE_REVEAL_PER_TICK") {
        match per_tick.parse::<usize>() {
            Ok(per_tick) => {
                config.reveal.per_tick = per_tick;
                applied += 1;
            }
            Err(_) => tracing::warn!(value = %per_tick, "Ignoring GENIE_REVEAL_PER_TICK"),
        }
    }
    if let Some(unit) = lookup("GENIE_REVEAL_UNIT") {
        match unit.trim().to_ascii_lowercase().as_str() {
            "chars" => {
                config.reveal.unit = RevealUnit::Chars;
                applied += 1;
            }
            "words" => {
                config.reveal.unit = RevealUnit::Words;
                applied += 1;
            }
            _ => tracing::warn!(value = %unit, "Ignoring GENIE_REVEAL_UNIT"),
        }
    }
    if let Some(highlight) = lookup("GENIE_HIGHLIGHT") {
        match parse_bool(&highlight) {
            Some(highlight) => {
                config.enhance.highlight = highlight;
                applied += 1;
            }
            None => tracing::warn!(value = %highlight, "Ignoring GENIE_HIGHLIGHT"),
        }
    }

    if applied > 0 {
        tracing::debug!(applied, "Applied environment overrides");
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    endpoint: Option<String>,
    mode: Option<RenderMode>,
    reveal_tick: Option<Duration>,
    highlight: Option<bool>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the chat endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Override the render mode
    #[must_use]
    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Override the reveal tick
    #[must_use]
    pub fn with_reveal_tick(mut self, tick: Duration) -> Self {
        self.reveal_tick = Some(tick);
        self
    }

    /// Override syntax highlighting
    #[must_use]
    pub fn with_highlight(mut self, highlight: bool) -> Self {
        self.highlight = Some(highlight);
        self
    }

    /// Apply to `config`, marking it CLI-sourced if anything changed
    pub fn apply(&self, config: &mut RenderConfig) {
        let mut applied = false;
        if let Some(ref endpoint) = self.endpoint {
            config.stream.endpoint = endpoint.clone();
            applied = true;
        }
        if let Some(mode) = self.mode {
            config.stream.mode = mode;
            applied = true;
        }
        if let Some(tick) = self.reveal_tick {
            config.reveal.tick = tick;
            applied = true;
        }
        if let Some(highlight) = self.highlight {
            config.enhance.highlight = highlight;
            applied = true;
        }
        if applied {
            config.source = ConfigSource::Cli;
        }
    }
}
