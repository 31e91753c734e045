//! Class-based syntax highlighting
//!
//! Emits `<span class="...">` markup (syntect `ClassStyle::Spaced`), so the
//! host stylesheet owns the colors. The syntax set is loaded once per
//! process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

fn syntax_set() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn find_syntax<'a>(set: &'a SyntaxSet, language: &str, sql: bool) -> Option<&'a SyntaxReference> {
    // SQL dialect tags (mysql, postgres, ...) share the one SQL grammar
    let token = if sql { "sql" } else { language };
    set.find_syntax_by_token(token)
        .or_else(|| set.find_syntax_by_extension(token))
}

/// Highlight `code` as `language`
///
/// Returns the inner HTML for a `<code>` element, or `None` when no grammar
/// matches or highlighting fails; callers then show escaped text.
#[must_use]
pub fn highlight(code: &str, language: Option<&str>, sql: bool) -> Option<String> {
    let language = language?;
    let set = syntax_set();
    let syntax = find_syntax(set, language, sql)?;

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, set, ClassStyle::Spaced);
        for line in LinesWithEndings::from(code) {
            generator
                .parse_html_for_line_which_includes_newline(line)
                .ok()?;
        }
        Some(generator.finalize())
    }));

    match result {
        Ok(html) => html,
        Err(_) => {
            tracing::warn!(language, "Syntax highlighter panicked, using plain text");
            None
        }
    }
}
