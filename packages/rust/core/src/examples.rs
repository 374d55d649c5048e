//! Example-ticket blocks appended to article documents.

use std::collections::BTreeMap;

use tracing::debug;

use kbmirror_docstore::DocumentStore;
use kbmirror_shared::{ArticleId, DocumentRef, Ledger, Result, TicketRow};

use crate::marker::{MarkerScan, Markers, scan};
use crate::patch::{PatchMode, build_patch};
use crate::retry::RetryPolicy;

/// Group tickets by the article that resolved them.
///
/// At most `max_tickets` rows are considered, in source order. Descriptions
/// are reduced to plain text, and rows without an article id are dropped.
pub fn group_tickets(tickets: Vec<TicketRow>, max_tickets: usize) -> BTreeMap<ArticleId, Vec<TicketRow>> {
    let mut groups: BTreeMap<ArticleId, Vec<TicketRow>> = BTreeMap::new();
    for mut ticket in tickets.into_iter().take(max_tickets) {
        if ticket.article_id.as_str().is_empty() {
            debug!(ticket_id = %ticket.ticket_id, "ticket without article, ignored");
            continue;
        }
        let description = kbmirror_text::clean_optional(ticket.description.as_deref());
        ticket.description = (!description.is_empty()).then_some(description);
        groups.entry(ticket.article_id.clone()).or_default().push(ticket);
    }
    groups
}

/// Document of `article_id` in the first ledger that tracks it.
pub fn find_document<'l>(ledgers: &'l [(String, Ledger)], article_id: &ArticleId) -> Option<&'l DocumentRef> {
    ledgers
        .iter()
        .find_map(|(_, ledger)| ledger.get(article_id))
        .map(|entry| &entry.document_ref)
}

/// Writes rendered example blocks between the configured markers.
pub struct ExamplesWriter<'a> {
    store: &'a dyn DocumentStore,
    retry: RetryPolicy,
    markers: Markers,
}

impl<'a> ExamplesWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore, retry: RetryPolicy, markers: Markers) -> Self {
        Self {
            store,
            retry,
            markers,
        }
    }

    /// Replace (or append) the block in `doc`. `Ok(None)` when throttling
    /// outlasted the retries.
    pub async fn write(&self, doc: &DocumentRef, body: &str) -> Result<Option<()>> {
        let Some(current) = self.retry.run("get", || self.store.get(doc)).await? else {
            return Ok(None);
        };
        let batch = build_patch(&current, body, PatchMode::Partial(&self.markers))?;
        self.retry
            .run("append_examples", || self.store.batch_edit(doc, &batch))
            .await
    }

    /// Reduce an existing block in `doc` to `placeholder`. Documents without
    /// a block are left alone and give `Ok(Some(false))`.
    pub async fn clear(&self, doc: &DocumentRef, placeholder: &str) -> Result<Option<bool>> {
        let Some(current) = self.retry.run("get", || self.store.get(doc)).await? else {
            return Ok(None);
        };
        if scan(&current, &self.markers) == MarkerScan::Absent {
            return Ok(Some(false));
        }
        let batch = build_patch(&current, placeholder, PatchMode::Partial(&self.markers))?;
        let cleared = self
            .retry
            .run("clear_examples", || self.store.batch_edit(doc, &batch))
            .await?;
        Ok(cleared.map(|()| true))
    }
}
