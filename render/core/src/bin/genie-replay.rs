//! Genie Replay
//!
//! Streams a saved assistant reply through the renderer headlessly and
//! prints the final surface HTML. Useful for checking how a transcript will
//! render without running the chat backend.
//!
//! # Usage
//!
//! ```bash
//! # Replay a file in 40-character chunks
//! genie-replay reply.md --chunk 40
//!
//! # Read from stdin and reveal with the typing animation
//! cat reply.md | genie-replay --animated
//!
//! # With verbose logging
//! RUST_LOG=debug genie-replay reply.md
//! ```
//!
//! # Environment Variables
//!
//! - `GENIE_RENDER_CONFIG`: Configuration file path (same as `--config`)
//! - `GENIE_*`: Renderer overrides (see `genie_render_core::config`)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use genie_render_core::{
    default_config_path, load_config_from_path, ChatUpdate, ConfigOverrides, HostCapabilities,
    MemoryClipboard, RenderMode, ScriptedSource, StreamCoordinator, StreamOutcome,
};

/// Genie Replay - render a saved assistant reply without the chat backend
#[derive(Parser, Debug)]
#[command(name = "genie-replay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reply transcript to replay (reads stdin when omitted)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Characters per streamed chunk
    #[arg(
        long,
        value_name = "N",
        default_value_t = 24,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    chunk: usize,

    /// Reveal the reply with the typing animation
    #[arg(long)]
    animated: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "GENIE_RENDER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

async fn read_transcript(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("genie_replay=info".parse()?)
                .add_directive("genie_render_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = load_config_from_path(args.config.clone().or_else(default_config_path))?;
    let mut overrides = ConfigOverrides::new();
    if args.animated {
        overrides = overrides.with_mode(RenderMode::Animated);
    }
    overrides.apply(&mut config);
    info!(source = %config.source(), mode = ?config.stream.mode, "Configuration loaded");

    let transcript = read_transcript(args.file.as_ref()).await?;
    let chunk = args.chunk;
    let source = Arc::new(ScriptedSource::from_text(&transcript, chunk));

    let host = HostCapabilities {
        clipboard: Arc::new(MemoryClipboard::default()),
        ..HostCapabilities::default()
    };
    let (tx, rx) = mpsc::channel::<ChatUpdate>(100);
    let coordinator = StreamCoordinator::new(&config, source, host, tx);
    coordinator.start();

    // Log updates the way a UI shell would consume them
    let updates = tokio::spawn(async move {
        let mut stream = ReceiverStream::new(rx);
        let mut count = 0usize;
        while let Some(update) = stream.next().await {
            count += 1;
            tracing::debug!(?update, "Chat update");
        }
        count
    });

    let ticket = coordinator.send_message("replay").await?;
    let outcome = ticket.wait().await;
    match &outcome {
        StreamOutcome::Completed => info!(chars = transcript.chars().count(), chunk, "Replay complete"),
        StreamOutcome::Failed(error) => warn!(error = %error, "Replay failed"),
        StreamOutcome::Superseded => warn!("Replay was superseded"),
    }

    let html = coordinator
        .messages()
        .last()
        .and_then(|m| m.surface.as_ref().map(genie_render_core::SurfaceHandle::to_html))
        .unwrap_or_default();
    println!("{html}");

    coordinator.shutdown();
    drop(coordinator);
    let count = updates.await.unwrap_or_default();
    info!(updates = count, "Published updates");

    match outcome {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Failed(error) => Err(error.into()),
        StreamOutcome::Superseded => anyhow::bail!("replay did not complete"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("genie-replay").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_all_options() {
        let parsed = args(&["reply.md", "--chunk", "8", "--animated"]).unwrap();
        assert_eq!(parsed.file, Some(PathBuf::from("reply.md")));
        assert_eq!(parsed.chunk, 8);
        assert!(parsed.animated);
    }

    #[test]
    fn test_parse_defaults_to_stdin() {
        let parsed = args(&[]).unwrap();
        assert!(parsed.file.is_none());
        assert_eq!(parsed.chunk, 24);
        assert!(!parsed.animated);
    }

    #[test]
    fn test_parse_rejects_bad_chunk() {
        assert!(args(&["--chunk", "0"]).is_err());
        assert!(args(&["--chunk", "lots"]).is_err());
        assert!(args(&["--chunk"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["a.md", "b.md"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
