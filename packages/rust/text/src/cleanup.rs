//! Whitespace cleanup applied to every extracted text run.

use std::sync::LazyLock;

use regex::Regex;

/// Collapse any whitespace run (including non-breaking spaces) into a single
/// space and trim both ends.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\s\u{00A0}\u{200B}]+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_mixed_whitespace() {
        assert_eq!(normalize_whitespace("a \t\n b\u{00A0}\u{00A0}c"), "a b c");
    }

    #[test]
    fn trims_edges() {
        assert_eq!(normalize_whitespace("\n  padded  \n"), "padded");
    }
}
