//! Structured document model and edit operations.
//!
//! Offsets follow the remote service's index space: UTF-16 code units, with
//! index 0 taken by the implicit section break so body text starts at 1.
//! The final newline of a document is structural and never addressable by
//! edits, which is why [`Document::terminal_offset`] sits one before the end.

use kbmirror_shared::{DocumentRef, Location};

/// Index of the first body character.
pub const BODY_START: usize = 1;

/// A run of text with its position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentElement {
    pub start_index: usize,
    pub end_index: usize,
    pub text: String,
}

/// Snapshot of a remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub document_ref: DocumentRef,
    pub title: String,
    /// Text runs in document order.
    pub elements: Vec<ContentElement>,
}

impl Document {
    /// First editable offset.
    pub fn body_start(&self) -> usize {
        self.elements
            .first()
            .map_or(BODY_START, |e| e.start_index.max(BODY_START))
    }

    /// Last offset an insert may target (just before the trailing newline).
    pub fn terminal_offset(&self) -> usize {
        self.elements
            .last()
            .map_or(BODY_START, |e| e.end_index.saturating_sub(1))
            .max(self.body_start())
    }

    /// All element text concatenated.
    pub fn text(&self) -> String {
        self.elements.iter().map(|e| e.text.as_str()).collect()
    }
}

/// One edit inside a batch. Ops apply in order, each against the result
/// of the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// Delete `[start, end)`.
    DeleteRange { start: usize, end: usize },
    /// Insert `text` so that it begins at `index`.
    InsertText { index: usize, text: String },
}

/// Ordered edits sent to the store as one atomic request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditBatch {
    ops: Vec<EditOp>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_range(mut self, start: usize, end: usize) -> Self {
        self.ops.push(EditOp::DeleteRange { start, end });
        self
    }

    pub fn insert_text(mut self, index: usize, text: impl Into<String>) -> Self {
        self.ops.push(EditOp::InsertText {
            index,
            text: text.into(),
        });
        self
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Placement metadata for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub parents: Vec<Location>,
    pub trashed: bool,
}

impl DocumentMeta {
    /// In place means not trashed and filed under exactly `location`.
    pub fn is_in(&self, location: &Location) -> bool {
        !self.trashed && self.parents.len() == 1 && self.parents[0] == *location
    }
}

/// Result of looking a document up. Transport failures are an `Err`, not a
/// third variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(DocumentMeta),
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(elements: &[(usize, usize, &str)]) -> Document {
        Document {
            document_ref: DocumentRef::from("d1"),
            title: "t".into(),
            elements: elements
                .iter()
                .map(|(s, e, t)| ContentElement {
                    start_index: *s,
                    end_index: *e,
                    text: (*t).to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn offsets_of_empty_document() {
        let d = doc(&[(1, 2, "\n")]);
        assert_eq!(d.body_start(), 1);
        assert_eq!(d.terminal_offset(), 1);

        let bare = doc(&[]);
        assert_eq!(bare.body_start(), 1);
        assert_eq!(bare.terminal_offset(), 1);
    }

    #[test]
    fn terminal_offset_skips_trailing_newline() {
        let d = doc(&[(1, 7, "hello\n"), (7, 13, "world\n")]);
        assert_eq!(d.terminal_offset(), 12);
        assert_eq!(d.text(), "hello\nworld\n");
    }

    #[test]
    fn batch_keeps_op_order() {
        let batch = EditBatch::new().delete_range(3, 9).insert_text(3, "abc");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops()[0], EditOp::DeleteRange { start: 3, end: 9 });
        assert!(matches!(&batch.ops()[1], EditOp::InsertText { index: 3, text } if text == "abc"));
    }

    #[test]
    fn placement_requires_single_parent() {
        let target = Location::from("folder-a");
        let meta = DocumentMeta {
            parents: vec![target.clone()],
            trashed: false,
        };
        assert!(meta.is_in(&target));

        let shared = DocumentMeta {
            parents: vec![target.clone(), Location::from("folder-b")],
            trashed: false,
        };
        assert!(!shared.is_in(&target));

        let trashed = DocumentMeta {
            parents: vec![target.clone()],
            trashed: true,
        };
        assert!(!trashed.is_in(&target));
    }
}
