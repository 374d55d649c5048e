//! HTML-to-plain-text normalization.
//!
//! Knowledge-base articles and ticket descriptions arrive as HTML fragments.
//! [`clean_html`] strips the markup and returns the visible text with one
//! space between text runs, the shape mirrored documents are written in.

mod cleanup;

use scraper::{Html, Node};
use tracing::trace;

/// Elements whose text content is never visible.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Strip markup from `html`, keeping visible text only.
///
/// Every text node is trimmed, empty nodes are dropped, and the survivors
/// are joined with a single space. Entities are decoded. Plain text without
/// any markup passes through with its whitespace normalized.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(html);
    let mut parts: Vec<String> = Vec::new();

    for node in fragment.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(el) => SKIPPED_TAGS.contains(&el.name()),
            _ => false,
        });
        if hidden {
            continue;
        }
        let piece = cleanup::normalize_whitespace(text);
        if !piece.is_empty() {
            parts.push(piece);
        }
    }

    let cleaned = parts.join(" ");
    trace!(raw_len = html.len(), clean_len = cleaned.len(), "html cleaned");
    cleaned
}

/// Like [`clean_html`], treating `None` as empty input.
pub fn clean_optional(html: Option<&str>) -> String {
    html.map(clean_html).unwrap_or_default()
}
