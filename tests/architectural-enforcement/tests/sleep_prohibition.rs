//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Renderer code MUST NOT block a thread to wait. Pacing uses
//! `tokio::time::interval`; delays use `tokio::time::sleep` inside tasks.

use architectural_enforcement::{render_core_src, report, scan};

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains("thread::sleep") || code.contains("std::thread::park")
    });
    report("Thread sleep", &violations);
}

#[test]
fn test_no_blocking_on_runtime() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains("block_on(") || code.contains("Runtime::new(")
    });
    report("Blocking on an async runtime", &violations);
}
