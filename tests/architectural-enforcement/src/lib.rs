//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`. They walk
//! `render/core/src` and flag patterns the renderer must not contain:
//! - Thread sleeps (the renderer waits on timers and channels only)
//! - Blocking file or network I/O outside configuration loading
//! - `.unwrap()` / `.expect(` in production code
//!
//! Test modules (everything from the first `#[cfg(test)]` in a file) and
//! comments are ignored.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// `render/core/src` of this workspace
#[must_use]
pub fn render_core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../render/core/src")
}

/// Every `.rs` file under `root`
#[must_use]
pub fn rust_files(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Code portion of each production line: `(line_number, code)`
///
/// Stops at the first `#[cfg(test)]`; strips `//` comments.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code));
        }
    }
    lines
}

/// Scan `root`, skipping files whose path ends with any of `exempt`
pub fn scan<F>(root: &Path, exempt: &[&str], is_violation: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_files(root) {
        if exempt.iter().any(|suffix| path.ends_with(suffix)) {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if is_violation(code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Panic with a readable report if `violations` is not empty
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\n{rule}: {} violation(s) in production code", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n// x.unwrap()\nlet y = z; // note\n#[cfg(test)]\nmod tests { fn b() { c.unwrap(); } }\n";
        let lines = production_lines(src);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "let y = z; ")]);
    }

    #[test]
    fn test_source_root_exists() {
        assert!(render_core_src().join("lib.rs").exists());
        assert!(!rust_files(&render_core_src()).is_empty());
    }
}
