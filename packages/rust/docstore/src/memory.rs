//! In-process document store.
//!
//! Documents are plain strings split into one element per paragraph, indexed
//! in UTF-16 code units from [`BODY_START`] exactly like the remote service.
//! Faults can be queued per operation to exercise retry and skip paths.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use kbmirror_shared::{DocumentRef, KbMirrorError, Location, Result};

use crate::DocumentStore;
use crate::document::{BODY_START, ContentElement, Document, DocumentMeta, EditBatch, EditOp, Lookup};

/// Location new documents land in before they are moved.
pub const ROOT_LOCATION: &str = "root";

/// Store operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Get,
    BatchEdit,
    Delete,
    Move,
    Locate,
}

impl StoreOp {
    fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::BatchEdit | Self::Delete | Self::Move)
    }
}

/// Failure injected into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    RateLimited,
    NotFound,
    Transport,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    title: String,
    /// Always ends with the structural trailing newline.
    text: String,
    parents: Vec<Location>,
    trashed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, StoredDocument>,
    next_id: u64,
    faults: HashMap<StoreOp, VecDeque<Fault>>,
    calls: HashMap<StoreOp, usize>,
    mutations: usize,
}

impl Inner {
    /// Count the call and surface a queued fault, if any.
    fn enter(&mut self, op: StoreOp, resource: &str) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        let fault = self.faults.get_mut(&op).and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Fault::RateLimited) => Err(KbMirrorError::rate_limited(format!("{op:?} {resource}"))),
            Some(Fault::NotFound) => Err(KbMirrorError::not_found(resource)),
            Some(Fault::Transport) => Err(KbMirrorError::Network(format!(
                "{op:?} {resource}: connection reset"
            ))),
        }
    }

    fn doc_mut(&mut self, doc: &DocumentRef) -> Result<&mut StoredDocument> {
        self.docs
            .get_mut(doc.as_str())
            .ok_or_else(|| KbMirrorError::not_found(doc.as_str()))
    }

    fn mutated(&mut self, op: StoreOp) {
        if op.is_mutation() {
            self.mutations += 1;
        }
    }
}

/// [`DocumentStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with `body` filed under `location`. Does not count as
    /// a mutation.
    pub async fn insert_document(&self, id: &str, body: &str, location: &Location) -> DocumentRef {
        let mut inner = self.inner.lock().await;
        inner.docs.insert(
            id.to_string(),
            StoredDocument {
                title: id.to_string(),
                text: format!("{body}\n"),
                parents: vec![location.clone()],
                trashed: false,
            },
        );
        DocumentRef::from(id)
    }

    /// Body text without the structural trailing newline.
    pub async fn body_text(&self, doc: &DocumentRef) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.docs.get(doc.as_str()).map(|d| {
            let mut text = d.text.clone();
            text.pop();
            text
        })
    }

    pub async fn title(&self, doc: &DocumentRef) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.docs.get(doc.as_str()).map(|d| d.title.clone())
    }

    pub async fn parents(&self, doc: &DocumentRef) -> Option<Vec<Location>> {
        let inner = self.inner.lock().await;
        inner.docs.get(doc.as_str()).map(|d| d.parents.clone())
    }

    pub async fn contains(&self, doc: &DocumentRef) -> bool {
        self.inner.lock().await.docs.contains_key(doc.as_str())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Simulate a user trashing the document.
    pub async fn trash(&self, doc: &DocumentRef) {
        if let Some(d) = self.inner.lock().await.docs.get_mut(doc.as_str()) {
            d.trashed = true;
        }
    }

    /// Simulate a user re-filing the document.
    pub async fn set_parents(&self, doc: &DocumentRef, parents: Vec<Location>) {
        if let Some(d) = self.inner.lock().await.docs.get_mut(doc.as_str()) {
            d.parents = parents;
        }
    }

    /// Simulate the document disappearing outside our control.
    pub async fn forget(&self, doc: &DocumentRef) {
        self.inner.lock().await.docs.remove(doc.as_str());
    }

    /// Make the next `times` calls of `op` fail with `fault`.
    pub async fn fail_next(&self, op: StoreOp, fault: Fault, times: usize) {
        let mut inner = self.inner.lock().await;
        let queue = inner.faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Calls made to `op`, including failed attempts.
    pub async fn calls(&self, op: StoreOp) -> usize {
        self.inner.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Successful create/edit/delete/move calls.
    pub async fn mutations(&self) -> usize {
        self.inner.lock().await.mutations
    }

    pub async fn reset_counters(&self) {
        let mut inner = self.inner.lock().await;
        inner.calls.clear();
        inner.mutations = 0;
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, title: &str) -> Result<DocumentRef> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::Create, title)?;

        inner.next_id += 1;
        let id = format!("mem-doc-{}", inner.next_id);
        inner.docs.insert(
            id.clone(),
            StoredDocument {
                title: title.to_string(),
                text: "\n".into(),
                parents: vec![Location::from(ROOT_LOCATION)],
                trashed: false,
            },
        );
        inner.mutated(StoreOp::Create);
        Ok(DocumentRef(id))
    }

    async fn get(&self, doc: &DocumentRef) -> Result<Document> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::Get, doc.as_str())?;
        let stored = inner.doc_mut(doc)?;
        Ok(Document {
            document_ref: doc.clone(),
            title: stored.title.clone(),
            elements: paragraph_elements(&stored.text),
        })
    }

    async fn batch_edit(&self, doc: &DocumentRef, batch: &EditBatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::BatchEdit, doc.as_str())?;
        let stored = inner.doc_mut(doc)?;

        let mut text = stored.text.clone();
        for op in batch.ops() {
            apply(&mut text, op, doc)?;
        }
        stored.text = text;
        inner.mutated(StoreOp::BatchEdit);
        Ok(())
    }

    async fn delete(&self, doc: &DocumentRef) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::Delete, doc.as_str())?;
        inner
            .docs
            .remove(doc.as_str())
            .ok_or_else(|| KbMirrorError::not_found(doc.as_str()))?;
        inner.mutated(StoreOp::Delete);
        Ok(())
    }

    async fn move_to(&self, doc: &DocumentRef, location: &Location) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::Move, doc.as_str())?;
        inner.doc_mut(doc)?.parents = vec![location.clone()];
        inner.mutated(StoreOp::Move);
        Ok(())
    }

    async fn locate(&self, doc: &DocumentRef) -> Result<Lookup> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreOp::Locate, doc.as_str())?;
        Ok(match inner.docs.get(doc.as_str()) {
            Some(d) => Lookup::Found(DocumentMeta {
                parents: d.parents.clone(),
                trashed: d.trashed,
            }),
            None => Lookup::NotFound,
        })
    }
}

/// One element per paragraph, each keeping its trailing newline.
fn paragraph_elements(text: &str) -> Vec<ContentElement> {
    let mut offset = BODY_START;
    text.split_inclusive('\n')
        .map(|para| {
            let len = para.encode_utf16().count();
            let element = ContentElement {
                start_index: offset,
                end_index: offset + len,
                text: para.to_string(),
            };
            offset += len;
            element
        })
        .collect()
}

/// Byte position of a document index, or `None` if it falls outside the
/// text or inside a surrogate pair.
fn byte_position(text: &str, index: usize) -> Option<usize> {
    let target = index.checked_sub(BODY_START)?;
    let mut units = 0;
    for (byte, ch) in text.char_indices() {
        if units == target {
            return Some(byte);
        }
        if units > target {
            return None;
        }
        units += ch.len_utf16();
    }
    (units == target).then_some(text.len())
}

fn apply(text: &mut String, op: &EditOp, doc: &DocumentRef) -> Result<()> {
    // The trailing newline is structural and cannot be edited.
    let terminal = BODY_START + text.encode_utf16().count() - 1;
    let invalid = |what: String| KbMirrorError::validation(format!("{doc}: {what}"));

    match op {
        EditOp::DeleteRange { start, end } => {
            if start >= end || *start < BODY_START || *end > terminal {
                return Err(invalid(format!("invalid delete range [{start}, {end})")));
            }
            let from = byte_position(text, *start)
                .ok_or_else(|| invalid(format!("delete start {start} splits a character")))?;
            let to = byte_position(text, *end)
                .ok_or_else(|| invalid(format!("delete end {end} splits a character")))?;
            text.replace_range(from..to, "");
        }
        EditOp::InsertText { index, text: insert } => {
            if *index < BODY_START || *index > terminal {
                return Err(invalid(format!("insert index {index} out of range")));
            }
            let at = byte_position(text, *index)
                .ok_or_else(|| invalid(format!("insert index {index} splits a character")))?;
            text.insert_str(at, insert);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_insert_move_roundtrip() {
        let store = MemoryDocumentStore::new();
        let doc = store.create("42").await.unwrap();
        assert_eq!(store.parents(&doc).await.unwrap(), vec![Location::from(ROOT_LOCATION)]);

        store
            .batch_edit(&doc, &EditBatch::new().insert_text(1, "line one\nline two"))
            .await
            .unwrap();
        store.move_to(&doc, &Location::from("F")).await.unwrap();

        assert_eq!(store.body_text(&doc).await.unwrap(), "line one\nline two");
        assert!(store.exists_in(&doc, &Location::from("F")).await.unwrap());
        assert_eq!(store.mutations().await, 3);

        let fetched = store.get(&doc).await.unwrap();
        assert_eq!(fetched.elements.len(), 2);
        assert_eq!(fetched.elements[1].start_index, 10);
        assert_eq!(fetched.terminal_offset(), 18);
    }

    #[tokio::test]
    async fn offsets_count_utf16_units() {
        let store = MemoryDocumentStore::new();
        let doc = store.insert_document("d", "a😀b", &Location::from("F")).await;
        let fetched = store.get(&doc).await.unwrap();
        // 'a' + surrogate pair + 'b' + '\n'
        assert_eq!(fetched.elements[0].end_index, 6);

        store
            .batch_edit(&doc, &EditBatch::new().insert_text(4, "X"))
            .await
            .unwrap();
        assert_eq!(store.body_text(&doc).await.unwrap(), "a😀Xb");

        let err = store
            .batch_edit(&doc, &EditBatch::new().insert_text(3, "Y"))
            .await
            .unwrap_err();
        assert!(matches!(err, KbMirrorError::Validation { .. }));
    }

    #[tokio::test]
    async fn failed_batch_leaves_document_untouched() {
        let store = MemoryDocumentStore::new();
        let doc = store.insert_document("d", "keep me", &Location::from("F")).await;

        let batch = EditBatch::new().delete_range(1, 5).insert_text(99, "nope");
        assert!(store.batch_edit(&doc, &batch).await.is_err());
        assert_eq!(store.body_text(&doc).await.unwrap(), "keep me");
        assert_eq!(store.mutations().await, 0);
    }

    #[tokio::test]
    async fn trailing_newline_cannot_be_deleted() {
        let store = MemoryDocumentStore::new();
        let doc = store.insert_document("d", "abc", &Location::from("F")).await;
        assert!(store.batch_edit(&doc, &EditBatch::new().delete_range(1, 5)).await.is_err());
        store
            .batch_edit(&doc, &EditBatch::new().delete_range(1, 4))
            .await
            .unwrap();
        assert_eq!(store.body_text(&doc).await.unwrap(), "");
    }

    #[tokio::test]
    async fn queued_faults_fire_in_order() {
        let store = MemoryDocumentStore::new();
        let doc = store.insert_document("d", "x", &Location::from("F")).await;

        store.fail_next(StoreOp::Get, Fault::RateLimited, 2).await;
        assert!(store.get(&doc).await.unwrap_err().is_rate_limited());
        assert!(store.get(&doc).await.unwrap_err().is_rate_limited());
        assert!(store.get(&doc).await.is_ok());
        assert_eq!(store.calls(StoreOp::Get).await, 3);

        store.fail_next(StoreOp::Locate, Fault::Transport, 1).await;
        assert!(matches!(
            store.locate(&doc).await.unwrap_err(),
            KbMirrorError::Network(_)
        ));
    }

    #[tokio::test]
    async fn missing_documents_surface_not_found() {
        let store = MemoryDocumentStore::new();
        let doc = DocumentRef::from("nope");
        assert!(store.delete(&doc).await.unwrap_err().is_not_found());
        assert_eq!(store.locate(&doc).await.unwrap(), Lookup::NotFound);
        assert!(!store.exists_in(&doc, &Location::from("F")).await.unwrap());
    }

    #[tokio::test]
    async fn trashed_or_refiled_documents_are_out_of_place() {
        let store = MemoryDocumentStore::new();
        let target = Location::from("F");
        let a = store.insert_document("a", "x", &target).await;
        let b = store.insert_document("b", "y", &target).await;

        store.trash(&a).await;
        store.set_parents(&b, vec![Location::from("elsewhere")]).await;

        assert!(!store.exists_in(&a, &target).await.unwrap());
        assert!(!store.exists_in(&b, &target).await.unwrap());
    }
}
