//! Remote document store access.
//!
//! This crate provides:
//! - [`DocumentStore`]: the operations the reconciler and patcher need
//! - [`document`]: the structured document model and edit batches
//! - [`http`]: a client for the Docs/Drive style HTTP API
//! - [`memory`]: an in-process store with fault injection, for tests and dry runs

pub mod document;
pub mod http;
pub mod memory;

use async_trait::async_trait;

use kbmirror_shared::{DocumentRef, Location, Result};

pub use document::{BODY_START, ContentElement, Document, DocumentMeta, EditBatch, EditOp, Lookup};
pub use http::HttpDocumentStore;
pub use memory::{Fault, MemoryDocumentStore, ROOT_LOCATION, StoreOp};

/// Operations against the remote document service.
///
/// Throttling surfaces as [`KbMirrorError::RateLimited`] and missing
/// documents as [`KbMirrorError::NotFound`]; callers decide what to retry.
///
/// [`KbMirrorError::RateLimited`]: kbmirror_shared::KbMirrorError::RateLimited
/// [`KbMirrorError::NotFound`]: kbmirror_shared::KbMirrorError::NotFound
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create an empty document titled `title` in the store's default location.
    async fn create(&self, title: &str) -> Result<DocumentRef>;

    /// Fetch the current structure of a document.
    async fn get(&self, doc: &DocumentRef) -> Result<Document>;

    /// Apply all edits atomically.
    async fn batch_edit(&self, doc: &DocumentRef, batch: &EditBatch) -> Result<()>;

    async fn delete(&self, doc: &DocumentRef) -> Result<()>;

    /// Re-file the document so that `location` is its only parent.
    async fn move_to(&self, doc: &DocumentRef, location: &Location) -> Result<()>;

    async fn locate(&self, doc: &DocumentRef) -> Result<Lookup>;

    /// True iff the document exists, is not trashed, and sits only in `location`.
    async fn exists_in(&self, doc: &DocumentRef, location: &Location) -> Result<bool> {
        match self.locate(doc).await? {
            Lookup::Found(meta) => Ok(meta.is_in(location)),
            Lookup::NotFound => Ok(false),
        }
    }
}
