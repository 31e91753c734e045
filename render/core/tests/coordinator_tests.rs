//! Stream Coordinator Integration Tests
//!
//! Drive whole replies through scripted response sources and check the
//! transcript, the surfaces and the published updates.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use genie_render_core::{
    AnimationState, ChatUpdate, ContentType, HostCapabilities, MessageRole, NotifyLevel,
    RecordingNotifier, RenderConfig, RenderMode, ScriptedSource, SendError, StreamCoordinator,
    StreamError, StreamOutcome,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Fixture {
    coordinator: StreamCoordinator,
    updates: mpsc::Receiver<ChatUpdate>,
    notifier: Arc<RecordingNotifier>,
    source: ScriptedSource,
}

fn fixture(source: ScriptedSource, mode: RenderMode) -> Fixture {
    let mut config = RenderConfig::default();
    config.stream.mode = mode;
    config.reveal.tick = Duration::from_millis(10);
    config.reveal.per_tick = 1;

    let notifier = Arc::new(RecordingNotifier::default());
    let host = HostCapabilities {
        notifier: notifier.clone(),
        ..HostCapabilities::default()
    };
    let (tx, updates) = mpsc::channel(1024);
    let coordinator = StreamCoordinator::new(&config, Arc::new(source.clone()), host, tx);
    Fixture {
        coordinator,
        updates,
        notifier,
        source,
    }
}

fn drain(rx: &mut mpsc::Receiver<ChatUpdate>) -> Vec<ChatUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn bare_sql_reply_ends_with_execute_affordance() {
    let mut f = fixture(ScriptedSource::new(["SEL", "ECT * FROM users;"]), RenderMode::Direct);

    let ticket = assert_ok!(f.coordinator.send_message("list users").await);
    let surface = ticket.surface().clone();
    let message_id = ticket.message_id().clone();
    assert_eq!(ticket.wait().await, StreamOutcome::Completed);

    let blocks = surface.blocks();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].class.sql);
    let html = surface.to_html();
    assert_eq!(html.matches("class=\"execute-btn\"").count(), 1);

    let updates = drain(&mut f.updates);
    assert!(matches!(
        &updates[0],
        ChatUpdate::MessageAdded { role: MessageRole::User, .. }
    ));
    assert_eq!(
        updates.last(),
        Some(&ChatUpdate::StreamEnded { message_id })
    );
    assert_eq!(f.coordinator.markup().cache_stats().partial.entries, 0);
}

#[tokio::test]
async fn prompt_is_posted_with_conversation_id() {
    let f = fixture(ScriptedSource::new(["ok"]), RenderMode::Direct);
    f.coordinator.send_message("  hello  ").await.unwrap().wait().await;

    let requests = f.source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "hello");
    assert_eq!(requests[0].conversation_id, f.coordinator.conversation_id());
}

#[tokio::test]
async fn reply_ending_inside_diagram_fence_is_enhanced() {
    let f = fixture(
        ScriptedSource::new(["Here:\n\n```mer", "maid\ngraph TD\nA-->B"]),
        RenderMode::Direct,
    );

    let ticket = f.coordinator.send_message("draw it").await.unwrap();
    let surface = ticket.surface().clone();
    assert_eq!(ticket.wait().await, StreamOutcome::Completed);

    let blocks = surface.blocks();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].class.diagram);
    assert_eq!(surface.processed_count(), 1);
    let html = surface.to_html();
    assert!(html.contains("<svg"));
    assert_eq!(html.matches("class=\"copy-btn\"").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn animated_reply_is_revealed_then_enhanced() {
    let reply = "Try this:\n\n```sql\nSELECT 1;\n```\n";
    let f = fixture(ScriptedSource::new([reply]), RenderMode::Animated);

    let ticket = f.coordinator.send_message("q").await.unwrap();
    let surface = ticket.surface().clone();
    assert_eq!(ticket.wait().await, StreamOutcome::Completed);

    assert_eq!(surface.animation().map(|h| h.state()), Some(AnimationState::Completed));
    assert_eq!(surface.processed_count(), 1);
    assert!(surface.to_html().contains("class=\"execute-btn\""));
}

// =============================================================================
// Failures (Scenario C)
// =============================================================================

#[tokio::test]
async fn mid_stream_error_leaves_one_friendly_message() {
    let source = ScriptedSource::new(["Partial answer with ```sql\nSELECT"])
        .with_failure(StreamError::Read("connection reset".to_string()));
    let mut f = fixture(source, RenderMode::Direct);

    let ticket = f.coordinator.send_message("q").await.unwrap();
    let partial_surface = ticket.surface().clone();
    let outcome = ticket.wait().await;
    assert!(matches!(outcome, StreamOutcome::Failed(StreamError::Read(_))));

    let messages = f.coordinator.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    let error = &messages[1];
    assert_eq!(error.role, MessageRole::Assistant);
    assert_eq!(error.content_type, ContentType::Error);
    assert!(!error.content.contains("connection reset"));

    // Nothing from the partial reply is left visible
    assert_eq!(partial_surface.to_html(), "");
    let error_html = error.surface.as_ref().unwrap().to_html();
    assert!(error_html.contains("interrupted"));
    assert!(!error_html.contains("SELECT"));

    assert_eq!(f.notifier.at_level(NotifyLevel::Error).len(), 1);
    let errors_added = drain(&mut f.updates)
        .into_iter()
        .filter(|u| {
            matches!(
                u,
                ChatUpdate::MessageAdded {
                    content_type: ContentType::Error,
                    ..
                }
            )
        })
        .count();
    assert_eq!(errors_added, 1);
}

#[tokio::test]
async fn closed_channel_counts_as_disconnect() {
    let f = fixture(ScriptedSource::new(["half"]).without_end(), RenderMode::Direct);
    let outcome = f.coordinator.send_message("q").await.unwrap().wait().await;
    assert_eq!(outcome, StreamOutcome::Failed(StreamError::Disconnected));
}

#[tokio::test]
async fn failure_does_not_block_next_message() {
    let f = fixture(
        ScriptedSource::new(["x"]).with_failure(StreamError::Rejected("quota".to_string())),
        RenderMode::Direct,
    );
    f.coordinator.send_message("one").await.unwrap().wait().await;
    assert!(!f.coordinator.is_streaming());
    assert_ok!(f.coordinator.send_message("two").await);
}

// =============================================================================
// Concurrency Rules
// =============================================================================

#[tokio::test]
async fn send_while_streaming_is_rejected() {
    let f = fixture(ScriptedSource::new(["still going"]).hold_open(), RenderMode::Direct);

    let _first = f.coordinator.send_message("first").await.unwrap();
    assert!(f.coordinator.is_streaming());
    let second = assert_err!(f.coordinator.send_message("second").await);
    assert_eq!(second, SendError::StreamActive);

    // Only the first exchange is in the transcript
    assert_eq!(f.coordinator.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn new_conversation_cancels_live_reveal() {
    let long_reply = "word ".repeat(400);
    let f = fixture(ScriptedSource::new([long_reply]), RenderMode::Animated);
    let before = f.coordinator.conversation_id();

    let ticket = f.coordinator.send_message("q").await.unwrap();
    let surface = ticket.surface().clone();
    while surface.animation().is_none() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let animation = surface.animation().unwrap();
    assert!(animation.is_running());

    let after = f.coordinator.new_conversation().await;
    assert_ne!(after, before);
    assert_eq!(animation.state(), AnimationState::Cancelled);
    assert_eq!(ticket.wait().await, StreamOutcome::Superseded);
    assert!(f.coordinator.messages().is_empty());
    assert!(!f.coordinator.is_streaming());

    // The next prompt is accepted straight away
    assert_ok!(f.coordinator.send_message("again").await);
}

#[tokio::test]
async fn clear_chat_aborts_held_stream() {
    let f = fixture(ScriptedSource::new(["..."]).hold_open(), RenderMode::Direct);
    let ticket = f.coordinator.send_message("q").await.unwrap();

    f.coordinator.clear_chat().await;
    assert_eq!(ticket.wait().await, StreamOutcome::Superseded);
    assert!(f.coordinator.messages().is_empty());
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let f = fixture(ScriptedSource::new(["x"]), RenderMode::Direct);
    let err = assert_err!(f.coordinator.send_message("\n\t ").await);
    assert_eq!(err, SendError::EmptyPrompt);
    assert!(f.source.requests().is_empty());
}
