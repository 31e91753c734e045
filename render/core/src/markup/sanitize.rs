//! Sanitization of assistant-produced markup
//!
//! Assistant text is untrusted. Anything that could execute in the host view
//! is treated as data:
//!
//! - Raw HTML (block or inline) is turned into literal text, so `<script>`
//!   shows up as the characters `<script>`.
//! - Link and image destinations are limited to `http`, `https`, `mailto`,
//!   relative paths and fragments. Anything else (`javascript:`, `data:`,
//!   `vbscript:`, ...) is replaced with `#`.
//!
//! The only raw HTML that reaches a surface is generated by this crate.

use std::borrow::Cow;

use pulldown_cmark::{CowStr, Event, Tag};

/// Replacement for unsafe link destinations
pub const NEUTRALIZED_URL: &str = "#";

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Escape text for use inside HTML element content or attributes
#[must_use]
pub fn escape_html(input: &str) -> Cow<'_, str> {
    if !input
        .bytes()
        .any(|b| matches!(b, b'&' | b'<' | b'>' | b'"' | b'\''))
    {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Whether a link/image destination is safe to emit
#[must_use]
pub fn is_safe_url(url: &str) -> bool {
    // Strip whitespace and control characters browsers ignore inside schemes
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    let Some(colon) = compact.find(':') else {
        return true;
    };

    // A colon after the first '/', '?' or '#' belongs to the path, not a scheme
    if compact[..colon].contains(['/', '?', '#']) {
        return true;
    }

    let scheme = compact[..colon].to_ascii_lowercase();
    ALLOWED_SCHEMES.contains(&scheme.as_str())
}

/// Sanitize a single parser event
///
/// Returns the event unchanged when it is already safe.
#[must_use]
pub fn sanitize_event(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(html) | Event::InlineHtml(html) => Event::Text(html),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        other => other,
    }
}

fn neutralize(url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&url) {
        url
    } else {
        tracing::debug!(url = %url, "Neutralized unsafe link destination");
        CowStr::Borrowed(NEUTRALIZED_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert!(matches!(escape_html("plain text"), Cow::Borrowed(_)));
        assert_eq!(
            escape_html("<b class=\"x\">&'</b>"),
            "&lt;b class=&quot;x&quot;&gt;&amp;&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_safe_urls() {
        assert!(is_safe_url("https://example.com/a?b=c"));
        assert!(is_safe_url("http://example.com"));
        assert!(is_safe_url("mailto:dba@example.com"));
        assert!(is_safe_url("/docs/page"));
        assert!(is_safe_url("#section"));
        assert!(is_safe_url("relative/path:with-colon"));
    }

    #[test]
    fn test_unsafe_urls() {
        assert!(!is_safe_url("javascript:alert(1)"));
        assert!(!is_safe_url("JavaScript:alert(1)"));
        assert!(!is_safe_url(" java\tscript:alert(1)"));
        assert!(!is_safe_url("data:text/html;base64,AAAA"));
        assert!(!is_safe_url("vbscript:msgbox"));
    }

    #[test]
    fn test_raw_html_becomes_text() {
        let event = sanitize_event(Event::Html("<script>x()</script>".into()));
        assert!(matches!(event, Event::Text(ref t) if &**t == "<script>x()</script>"));
    }
}
