//! Builds the delete+insert batch that brings a document to its desired
//! content.
//!
//! Offsets always come from the [`Document`] passed in, which callers fetch
//! immediately before sending the batch.

use kbmirror_docstore::{Document, EditBatch};
use kbmirror_shared::{KbMirrorError, Result};

use crate::marker::{MarkerScan, Markers, scan};

/// How much of the document the desired content replaces.
#[derive(Debug, Clone, Copy)]
pub enum PatchMode<'a> {
    /// Everything between the body start and the trailing newline.
    Full,
    /// Only the block between `markers`, appending one if none exists.
    Partial(&'a Markers),
}

/// Edits turning `doc` into one holding `desired` under `mode`.
pub fn build_patch(doc: &Document, desired: &str, mode: PatchMode<'_>) -> Result<EditBatch> {
    match mode {
        PatchMode::Full => Ok(full_replace(doc, desired)),
        PatchMode::Partial(markers) => partial_replace(doc, desired, markers),
    }
}

fn full_replace(doc: &Document, desired: &str) -> EditBatch {
    let first = doc.body_start();
    let last = doc.terminal_offset();

    let mut batch = EditBatch::new();
    if last > first {
        batch = batch.delete_range(first, last);
    }
    if !desired.is_empty() {
        batch = batch.insert_text(first, desired);
    }
    batch
}

fn partial_replace(doc: &Document, body: &str, markers: &Markers) -> Result<EditBatch> {
    if markers.occur_in(body) {
        return Err(KbMirrorError::MarkerInContent {
            document: doc.document_ref.to_string(),
        });
    }
    match scan(doc, markers) {
        MarkerScan::Found { start, end } => {
            let mut batch = EditBatch::new();
            if end > start {
                batch = batch.delete_range(start, end);
            }
            Ok(batch.insert_text(start, format!("\n{body}\n")))
        }
        MarkerScan::Absent => {
            let block = format!("\n{}\n{body}\n{}\n", markers.start, markers.end);
            Ok(EditBatch::new().insert_text(doc.terminal_offset(), block))
        }
        MarkerScan::Unbalanced => Err(KbMirrorError::UnbalancedMarkers {
            document: doc.document_ref.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbmirror_docstore::{DocumentStore, EditOp, MemoryDocumentStore};
    use kbmirror_shared::Location;

    fn markers() -> Markers {
        Markers::new("[S]", "[E]")
    }

    async fn seeded(body: &str) -> (MemoryDocumentStore, kbmirror_shared::DocumentRef) {
        let store = MemoryDocumentStore::new();
        let doc = store.insert_document("d", body, &Location::from("F")).await;
        (store, doc)
    }

    async fn apply(store: &MemoryDocumentStore, doc: &kbmirror_shared::DocumentRef, desired: &str, mode: PatchMode<'_>) {
        let current = store.get(doc).await.unwrap();
        let batch = build_patch(&current, desired, mode).unwrap();
        store.batch_edit(doc, &batch).await.unwrap();
    }

    #[tokio::test]
    async fn full_replace_swaps_entire_body() {
        let (store, doc) = seeded("old line\nanother").await;
        apply(&store, &doc, "brand new", PatchMode::Full).await;
        assert_eq!(store.body_text(&doc).await.unwrap(), "brand new");
    }

    #[tokio::test]
    async fn full_replace_on_empty_document_only_inserts() {
        let (store, doc) = seeded("").await;
        let current = store.get(&doc).await.unwrap();
        let batch = build_patch(&current, "text", PatchMode::Full).unwrap();
        assert_eq!(batch.ops(), &[EditOp::InsertText { index: 1, text: "text".into() }]);
    }

    #[tokio::test]
    async fn full_replace_is_idempotent() {
        let (store, doc) = seeded("x").await;
        apply(&store, &doc, "same content\nwith lines", PatchMode::Full).await;
        apply(&store, &doc, "same content\nwith lines", PatchMode::Full).await;
        assert_eq!(store.body_text(&doc).await.unwrap(), "same content\nwith lines");
    }

    #[tokio::test]
    async fn partial_appends_block_when_absent() {
        let (store, doc) = seeded("hand written").await;
        let m = markers();
        apply(&store, &doc, "examples", PatchMode::Partial(&m)).await;
        assert_eq!(
            store.body_text(&doc).await.unwrap(),
            "hand written\n[S]\nexamples\n[E]\n"
        );
    }

    #[tokio::test]
    async fn partial_leaves_outside_text_untouched() {
        let (store, doc) = seeded("before 😀\n[S]\nold block\n[E]\nafter é").await;
        let m = markers();
        apply(&store, &doc, "new block", PatchMode::Partial(&m)).await;
        assert_eq!(
            store.body_text(&doc).await.unwrap(),
            "before 😀\n[S]\nnew block\n[E]\nafter é"
        );
    }

    #[tokio::test]
    async fn partial_is_idempotent() {
        let (store, doc) = seeded("intro").await;
        let m = markers();
        apply(&store, &doc, "block", PatchMode::Partial(&m)).await;
        let once = store.body_text(&doc).await.unwrap();
        apply(&store, &doc, "block", PatchMode::Partial(&m)).await;
        let twice = store.body_text(&doc).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.matches("[S]").count(), 1);
    }

    #[tokio::test]
    async fn adjacent_markers_insert_without_delete() {
        let (store, doc) = seeded("a [S][E] b").await;
        let current = store.get(&doc).await.unwrap();
        let batch = build_patch(&current, "x", PatchMode::Partial(&markers())).unwrap();
        assert_eq!(batch.len(), 1);
        store.batch_edit(&doc, &batch).await.unwrap();
        assert_eq!(store.body_text(&doc).await.unwrap(), "a [S]\nx\n[E] b");
    }

    #[tokio::test]
    async fn block_content_holding_a_marker_is_refused() {
        let (store, doc) = seeded("intro").await;
        let current = store.get(&doc).await.unwrap();
        for body in ["- Title: see [E] tag\n  Description: d", "[S] again"] {
            let err = build_patch(&current, body, PatchMode::Partial(&markers())).unwrap_err();
            assert!(matches!(err, KbMirrorError::MarkerInContent { .. }));
        }
        // Full replacement has no markers to protect.
        assert!(build_patch(&current, "see [E] tag", PatchMode::Full).is_ok());
    }

    #[tokio::test]
    async fn stripped_content_stays_idempotent() {
        let (store, doc) = seeded("intro").await;
        let m = markers();
        let body = m.strip_from("- Title: see [E] tag\n  Description: d");
        apply(&store, &doc, &body, PatchMode::Partial(&m)).await;
        let once = store.body_text(&doc).await.unwrap();
        apply(&store, &doc, &body, PatchMode::Partial(&m)).await;
        let twice = store.body_text(&doc).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "intro\n[S]\n- Title: see  tag\n  Description: d\n[E]\n");
    }

    #[tokio::test]
    async fn unbalanced_markers_are_refused() {
        let (store, doc) = seeded("text [S] and no end").await;
        let current = store.get(&doc).await.unwrap();
        let err = build_patch(&current, "x", PatchMode::Partial(&markers())).unwrap_err();
        assert!(matches!(err, KbMirrorError::UnbalancedMarkers { .. }));
    }
}
