//! Content Classifier
//!
//! Pure heuristics that label a piece of text as SQL, diagram source, or a
//! programming language. Nothing here touches a surface or allocates state;
//! every function is safe to call from anywhere, on any input.
//!
//! Unrecognized content yields `None` / `false`. Callers treat that as
//! "no special handling", never as an error.

use serde::{Deserialize, Serialize};

/// Statement keywords that mark a line as SQL
pub const SQL_KEYWORDS: [&str; 12] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "SHOW", "USE", "DESCRIBE",
    "DESC", "EXPLAIN",
];

/// Header keywords that mark a line as diagram source (lower-case)
pub const DIAGRAM_KEYWORDS: [&str; 13] = [
    "graph",
    "sequencediagram",
    "classdiagram",
    "statediagram",
    "erdiagram",
    "pie",
    "gantt",
    "journey",
    "flowchart",
    "gitgraph",
    "mindmap",
    "timeline",
    "quadrantchart",
];

/// Fence tags that name a SQL dialect
const SQL_TAGS: [&str; 7] = ["sql", "mysql", "postgresql", "postgres", "sqlite", "plsql", "tsql"];

/// Fence tags that carry no language information
const GENERIC_TAGS: [&str; 4] = ["text", "plaintext", "plain", "txt"];

/// Language tag the classifier can infer from content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    /// SQL statements
    Sql,
    /// Mermaid-style diagram source
    Mermaid,
    /// A JSON value
    Json,
    /// Python source
    Python,
    /// JavaScript source
    JavaScript,
}

impl Language {
    /// The fence tag used for this language
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Mermaid => "mermaid",
            Self::Json => "json",
            Self::Python => "python",
            Self::JavaScript => "javascript",
        }
    }
}

/// Resolved classification of one fenced block
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockClass {
    /// Language tag (explicit fence tag or sniffed), lower-case
    pub language: Option<String>,
    /// Whether the block gets an execute affordance
    pub sql: bool,
    /// Whether the block is handed to the diagram renderer
    pub diagram: bool,
}

/// Whether `text` is SQL
///
/// True when `hinted_tag` names a SQL dialect, or when any trimmed line starts
/// with a statement keyword followed by whitespace (or is exactly a keyword).
#[must_use]
pub fn is_sql_content(text: &str, hinted_tag: Option<&str>) -> bool {
    if hinted_tag.is_some_and(is_sql_tag) {
        return true;
    }

    text.lines().any(|line| {
        let upper = line.trim().to_ascii_uppercase();
        SQL_KEYWORDS
            .iter()
            .any(|kw| starts_with_keyword(&upper, kw, |c| c.is_whitespace()))
    })
}

/// Whether `text` contains a diagram header line
#[must_use]
pub fn is_diagram_content(text: &str) -> bool {
    text.lines().any(|line| {
        let lower = line.trim().to_lowercase();
        DIAGRAM_KEYWORDS
            .iter()
            .any(|kw| starts_with_keyword(&lower, kw, |c| c == ' ' || c == ':'))
    })
}

/// Sniff the language of a code snippet
///
/// Precedence: SQL, diagram, JSON, Python, JavaScript.
#[must_use]
pub fn detect_language(code: &str) -> Option<Language> {
    if is_sql_content(code, None) {
        return Some(Language::Sql);
    }
    if is_diagram_content(code) {
        return Some(Language::Mermaid);
    }
    if is_json(code) {
        return Some(Language::Json);
    }
    if looks_like_python(code) {
        return Some(Language::Python);
    }
    if looks_like_javascript(code) {
        return Some(Language::JavaScript);
    }
    None
}

/// Resolve the full classification for a fenced block
///
/// An explicit, non-generic fence tag always wins for the language. Content
/// sniffing only decides the SQL and diagram flags when the tag is missing
/// or generic, so a `python` block that mentions `SELECT` in a string stays
/// Python.
#[must_use]
pub fn classify_block(hinted_tag: Option<&str>, code: &str) -> BlockClass {
    let tag = hinted_tag
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());
    let explicit = tag
        .as_deref()
        .filter(|t| !GENERIC_TAGS.contains(t))
        .map(str::to_string);

    match explicit {
        Some(language) => BlockClass {
            sql: is_sql_tag(&language),
            diagram: language == "mermaid",
            language: Some(language),
        },
        None => {
            let sniffed = detect_language(code);
            BlockClass {
                language: sniffed.map(|l| l.tag().to_string()),
                sql: sniffed == Some(Language::Sql),
                diagram: sniffed == Some(Language::Mermaid),
            }
        }
    }
}

fn is_sql_tag(tag: &str) -> bool {
    let tag = tag.trim();
    SQL_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

fn starts_with_keyword(line: &str, keyword: &str, is_separator: impl Fn(char) -> bool) -> bool {
    match line.strip_prefix(keyword) {
        Some("") => true,
        Some(rest) => rest.chars().next().is_some_and(is_separator),
        None => false,
    }
}

fn is_json(code: &str) -> bool {
    let trimmed = code.trim();
    !trimmed.is_empty() && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
}

fn looks_like_python(code: &str) -> bool {
    code.lines().map(str::trim).any(|line| {
        line.starts_with("def ")
            || line.starts_with("import ")
            || (line.starts_with("from ") && line.contains(" import "))
            || (line.starts_with("class ") && line.ends_with(':'))
            || line.starts_with("print(")
            || line.starts_with("if __name__")
    })
}

fn looks_like_javascript(code: &str) -> bool {
    code.lines().map(str::trim).any(|line| {
        line.starts_with("function ")
            || line.starts_with("async function ")
            || line.starts_with("const ")
            || line.starts_with("let ")
            || line.starts_with("var ")
            || line.starts_with("export ")
            || line.contains("=>")
            || line.contains("console.log(")
    })
}
