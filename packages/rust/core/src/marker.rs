//! Sentinel scanning over a document's text runs.
//!
//! The scan runs in two passes. The first flattens every element into one
//! string while remembering where each element starts, both as a byte
//! position and as a document offset. The second searches the flat string
//! and maps the hits back to document offsets, so a marker split across
//! runs is still found and the result never depends on how the store
//! chose to cut its runs.

use kbmirror_docstore::Document;

/// The pair of literal sentinels delimiting a system-owned block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Markers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// True when `text` holds either marker. Empty markers never match.
    pub fn occur_in(&self, text: &str) -> bool {
        [&self.start, &self.end]
            .into_iter()
            .any(|marker| !marker.is_empty() && text.contains(marker.as_str()))
    }

    /// `text` with every occurrence of either marker removed, including
    /// occurrences that a removal brings together.
    pub fn strip_from(&self, text: &str) -> String {
        let mut out = text.to_string();
        while self.occur_in(&out) {
            out = out.replace(&self.start, "").replace(&self.end, "");
        }
        out
    }
}

/// Where the block's contents sit, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerScan {
    /// `start` is the offset just after the start marker, `end` the offset
    /// of the first end marker at or after it.
    Found { start: usize, end: usize },
    /// No start marker.
    Absent,
    /// A start marker with no end marker after it.
    Unbalanced,
}

struct Segment {
    byte_start: usize,
    byte_end: usize,
    doc_start: usize,
}

struct FlatText {
    text: String,
    segments: Vec<Segment>,
}

impl FlatText {
    fn new(doc: &Document) -> Self {
        let mut text = String::new();
        let mut segments = Vec::with_capacity(doc.elements.len());
        for element in &doc.elements {
            let byte_start = text.len();
            text.push_str(&element.text);
            segments.push(Segment {
                byte_start,
                byte_end: text.len(),
                doc_start: element.start_index,
            });
        }
        Self { text, segments }
    }

    fn offset_in(&self, segment: &Segment, pos: usize) -> usize {
        segment.doc_start + self.text[segment.byte_start..pos].encode_utf16().count()
    }

    /// Offset of the character starting at byte `pos`.
    fn offset_before(&self, pos: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.byte_start <= pos && pos < s.byte_end)
            .map(|s| self.offset_in(s, pos))
    }

    /// Offset just after the character ending at byte `pos`.
    fn offset_after(&self, pos: usize) -> Option<usize> {
        self.segments
            .iter()
            .find(|s| s.byte_start < pos && pos <= s.byte_end)
            .map(|s| self.offset_in(s, pos))
    }
}

/// Locate the block delimited by `markers` in `doc`.
pub fn scan(doc: &Document, markers: &Markers) -> MarkerScan {
    let flat = FlatText::new(doc);

    let Some(start_at) = flat.text.find(&markers.start) else {
        return MarkerScan::Absent;
    };
    let after_start = start_at + markers.start.len();

    let Some(rel_end) = flat.text[after_start..].find(&markers.end) else {
        return MarkerScan::Unbalanced;
    };
    let end_at = after_start + rel_end;

    match (flat.offset_after(after_start), flat.offset_before(end_at)) {
        (Some(start), Some(end)) => MarkerScan::Found { start, end },
        // Both markers are non-empty, so each hit lies inside some segment.
        _ => MarkerScan::Unbalanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbmirror_docstore::ContentElement;
    use kbmirror_shared::DocumentRef;

    fn markers() -> Markers {
        Markers::new("[S]", "[E]")
    }

    /// Build a document from runs laid end to end from offset 1.
    fn doc_from_runs(runs: &[&str]) -> Document {
        let mut offset = 1;
        let elements = runs
            .iter()
            .map(|run| {
                let len = run.encode_utf16().count();
                let element = ContentElement {
                    start_index: offset,
                    end_index: offset + len,
                    text: (*run).to_string(),
                };
                offset += len;
                element
            })
            .collect();
        Document {
            document_ref: DocumentRef::from("d"),
            title: "d".into(),
            elements,
        }
    }

    #[test]
    fn finds_block_in_single_run() {
        // offsets: "ab" = 1..3, "[S]" = 3..6, "xy" = 6..8, "[E]" = 8..11
        let doc = doc_from_runs(&["ab[S]xy[E]\n"]);
        assert_eq!(scan(&doc, &markers()), MarkerScan::Found { start: 6, end: 8 });
    }

    #[test]
    fn marker_split_across_runs() {
        let doc = doc_from_runs(&["intro [", "S]\nbody\n[E", "]\n"]);
        // "intro " = 1..7, "[S]" = 7..10
        let MarkerScan::Found { start, end } = scan(&doc, &markers()) else {
            panic!("block not found");
        };
        assert_eq!(start, 10);
        assert_eq!(end, 16);
    }

    #[test]
    fn missing_start_is_absent() {
        let doc = doc_from_runs(&["only text [E]\n"]);
        assert_eq!(scan(&doc, &markers()), MarkerScan::Absent);
    }

    #[test]
    fn start_without_end_is_unbalanced() {
        let doc = doc_from_runs(&["[E] then [S] and nothing\n"]);
        assert_eq!(scan(&doc, &markers()), MarkerScan::Unbalanced);
    }

    #[test]
    fn end_before_start_is_ignored() {
        let doc = doc_from_runs(&["[E]x[S]y[E]\n"]);
        // "[E]x" = 1..5, "[S]" = 5..8, "y" = 8
        assert_eq!(scan(&doc, &markers()), MarkerScan::Found { start: 8, end: 9 });
    }

    #[test]
    fn strip_removes_markers_formed_by_removal() {
        let m = markers();
        assert_eq!(m.strip_from("see [E] tag"), "see  tag");
        assert_eq!(m.strip_from("a[[E]S]b"), "ab");
        assert_eq!(m.strip_from("plain"), "plain");
        assert!(!m.occur_in(&m.strip_from("[S[S][E]]E]")));
    }

    #[test]
    fn adjacent_markers_give_empty_range() {
        let doc = doc_from_runs(&["[S][E]\n"]);
        assert_eq!(scan(&doc, &markers()), MarkerScan::Found { start: 4, end: 4 });
    }

    #[test]
    fn offsets_count_utf16_units() {
        let doc = doc_from_runs(&["é😀[S]", "x[E]\n"]);
        // 'é' = 1 unit, '😀' = 2 units, "[S]" = 4..7
        assert_eq!(scan(&doc, &markers()), MarkerScan::Found { start: 7, end: 8 });
    }

    #[test]
    fn gaps_between_runs_follow_element_offsets() {
        let mut doc = doc_from_runs(&["[S]", "body[E]\n"]);
        // An inline object occupies offset 4 between the runs.
        doc.elements[1].start_index += 1;
        doc.elements[1].end_index += 1;
        assert_eq!(scan(&doc, &markers()), MarkerScan::Found { start: 4, end: 9 });
    }
}
