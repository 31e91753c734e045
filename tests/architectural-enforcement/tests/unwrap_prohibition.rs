//! Integration Test: Panic-free Production Code
//!
//! **Policy**: Failures are recovered (escaped fallback, raw diagram view,
//! error message in the chat) or returned as `Result`. Production code MUST
//! NOT `.unwrap()` or `.expect(..)`.

use architectural_enforcement::{render_core_src, report, scan};

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains(".unwrap()") || code.contains(".expect(")
    });
    report("unwrap/expect", &violations);
}

#[test]
fn test_no_panicking_macros_in_production_code() {
    let violations = scan(&render_core_src(), &[], |code| {
        code.contains("unimplemented!(") || code.contains("todo!(")
    });
    report("unimplemented/todo", &violations);
}
