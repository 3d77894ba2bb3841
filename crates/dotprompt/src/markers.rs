//! Marker protocol
//!
//! Template helpers emit sentinel strings into rendered text; the message
//! assembler splits on them to recover roles, history insertion points, media
//! references and named sections:
//!
//! - `<<<dotprompt:role:ROLE>>>`
//! - `<<<dotprompt:history>>>`
//! - `<<<dotprompt:media:url URL [CONTENT_TYPE]>>>`
//! - `<<<dotprompt:section NAME>>>`
//!
//! A template that emits these strings verbatim is interpreted the same way;
//! there is no escaping.

use std::sync::LazyLock;

use regex::Regex;

pub const ROLE_MARKER_PREFIX: &str = "<<<dotprompt:role:";
pub const HISTORY_MARKER_PREFIX: &str = "<<<dotprompt:history";
pub const MEDIA_MARKER_PREFIX: &str = "<<<dotprompt:media:";
pub const SECTION_MARKER_PREFIX: &str = "<<<dotprompt:section";

const MARKER_SUFFIX: &str = ">>>";

/// Role names are lowercase ASCII letters only.
static ROLE_AND_HISTORY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<<<dotprompt:(?:role:[a-z]+|history))>>>").expect("valid marker regex")
});

static MEDIA_AND_SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<<<dotprompt:(?:media:url|section).*?)>>>").expect("valid marker regex")
});

pub fn role_marker(role: &str) -> String {
    format!("{ROLE_MARKER_PREFIX}{role}{MARKER_SUFFIX}")
}

pub fn history_marker() -> String {
    format!("{HISTORY_MARKER_PREFIX}{MARKER_SUFFIX}")
}

pub fn section_marker(name: &str) -> String {
    format!("{SECTION_MARKER_PREFIX} {name}{MARKER_SUFFIX}")
}

pub fn media_marker(url: &str, content_type: Option<&str>) -> String {
    match content_type.filter(|ct| !ct.is_empty()) {
        Some(ct) => format!("{MEDIA_MARKER_PREFIX}url {url} {ct}{MARKER_SUFFIX}"),
        None => format!("{MEDIA_MARKER_PREFIX}url {url}{MARKER_SUFFIX}"),
    }
}

/// A piece of rendered text after splitting on markers.
///
/// Marker pieces keep their prefix and arguments but lose the closing `>>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    Marker(&'a str),
    Text(&'a str),
}

/// Split on role and history markers.
pub fn split_by_role_and_history(source: &str) -> Vec<Piece<'_>> {
    split_by_marker(source, &ROLE_AND_HISTORY_MARKER)
}

/// Split on media and section markers.
pub fn split_by_media_and_section(source: &str) -> Vec<Piece<'_>> {
    split_by_marker(source, &MEDIA_AND_SECTION_MARKER)
}

/// Splits `source` into marker and text pieces in original order, dropping
/// whitespace-only text between markers.
fn split_by_marker<'a>(source: &'a str, marker: &Regex) -> Vec<Piece<'a>> {
    let mut pieces = Vec::new();
    let mut last_end = 0;

    for caps in marker.captures_iter(source) {
        let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let before = &source[last_end..whole.start()];
        if !before.trim().is_empty() {
            pieces.push(Piece::Text(before));
        }
        pieces.push(Piece::Marker(group.as_str()));
        last_end = whole.end();
    }

    let rest = &source[last_end..];
    if !rest.trim().is_empty() {
        pieces.push(Piece::Text(rest));
    }

    tracing::trace!(pieces = pieces.len(), "split rendered text on markers");
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_role_markers() {
        let pieces =
            split_by_role_and_history("<<<dotprompt:role:system>>>Be terse.<<<dotprompt:role:user>>>Hi");
        assert_eq!(
            pieces,
            vec![
                Piece::Marker("<<<dotprompt:role:system"),
                Piece::Text("Be terse."),
                Piece::Marker("<<<dotprompt:role:user"),
                Piece::Text("Hi"),
            ]
        );
    }

    #[test]
    fn test_split_drops_whitespace_only_text() {
        let pieces = split_by_role_and_history("  \n<<<dotprompt:history>>>\n  ");
        assert_eq!(pieces, vec![Piece::Marker("<<<dotprompt:history")]);
    }

    #[test]
    fn test_uppercase_role_is_plain_text() {
        let text = "<<<dotprompt:role:USER>>>";
        assert_eq!(split_by_role_and_history(text), vec![Piece::Text(text)]);
    }

    #[test]
    fn test_split_media_and_section() {
        let pieces = split_by_media_and_section(
            "Look: <<<dotprompt:media:url https://x/y.png image/png>>> then <<<dotprompt:section code>>>",
        );
        assert_eq!(
            pieces,
            vec![
                Piece::Text("Look: "),
                Piece::Marker("<<<dotprompt:media:url https://x/y.png image/png"),
                Piece::Text(" then "),
                Piece::Marker("<<<dotprompt:section code"),
            ]
        );
    }

    #[test]
    fn test_marker_formatting() {
        assert_eq!(role_marker("model"), "<<<dotprompt:role:model>>>");
        assert_eq!(history_marker(), "<<<dotprompt:history>>>");
        assert_eq!(section_marker("code"), "<<<dotprompt:section code>>>");
        assert_eq!(
            media_marker("https://x/y.png", Some("image/png")),
            "<<<dotprompt:media:url https://x/y.png image/png>>>"
        );
        assert_eq!(media_marker("u", Some("")), "<<<dotprompt:media:url u>>>");
    }
}
