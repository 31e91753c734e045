//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Renderer code runs on the tokio runtime and MUST NOT use
//! blocking file or network I/O.
//! **Exception**: `config/mod.rs`, which loads once before streaming starts.

use architectural_enforcement::{render_core_src, report, scan};

const CONFIG_LOADER: &str = "config/mod.rs";

#[test]
fn test_no_blocking_file_io() {
    let violations = scan(&render_core_src(), &[CONFIG_LOADER], |code| {
        code.contains("std::fs::") || code.contains("use std::fs")
    });
    report("Blocking file I/O", &violations);
}

#[test]
fn test_no_blocking_network_io() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains("std::net::")
            || code.contains("use std::net")
            || code.contains("reqwest::blocking")
    });
    report("Blocking network I/O", &violations);
}

#[test]
fn test_no_blocking_processes() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains("std::process::Command")
    });
    report("Blocking process spawn", &violations);
}
