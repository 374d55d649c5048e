//! Ledger-driven reconciliation of source articles against mirrored documents.
//!
//! One pass deletes documents whose article disappeared, then classifies
//! every current article and creates, recreates or patches its document.
//! Failures below the pass level are contained per article: the article is
//! logged and skipped, its ledger entry left as it was (or dropped, for a
//! document that could not be recovered).

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use kbmirror_docstore::{BODY_START, DocumentStore, EditBatch};
use kbmirror_shared::{
    ArticleId, ArticleRecord, DocumentRef, KbMirrorError, Ledger, LedgerEntry, Location, Result,
};

use crate::patch::{PatchMode, build_patch};
use crate::pipeline::ProgressReporter;
use crate::render::render_article;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Classification & report
// ---------------------------------------------------------------------------

/// What a source row needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No ledger entry.
    New,
    /// Ledger entry whose document is gone, trashed, or filed elsewhere.
    MovedOrMissing,
    /// Document in place but written from another revision.
    Stale,
    Current,
}

/// What happened to one article during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Recreated,
    Updated,
    Current,
    Deleted,
    Skipped,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Recreated => "recreated",
            Self::Updated => "updated",
            Self::Current => "current",
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleOutcome {
    pub article_id: ArticleId,
    pub action: Action,
    /// Why an article was skipped.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<ArticleOutcome>,
}

impl ReconcileReport {
    pub fn count(&self, action: Action) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    pub fn ids(&self, action: Action) -> Vec<&ArticleId> {
        self.outcomes
            .iter()
            .filter(|o| o.action == action)
            .map(|o| &o.article_id)
            .collect()
    }

    /// True when the pass changed nothing remotely.
    pub fn is_noop(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.action, Action::Current))
    }

    fn record(&mut self, article_id: &ArticleId, action: Action, detail: Option<String>) {
        match &detail {
            Some(reason) => warn!(article_id = %article_id, action = action.as_str(), reason = %reason, "article skipped"),
            None => info!(article_id = %article_id, action = action.as_str(), "article reconciled"),
        }
        self.outcomes.push(ArticleOutcome {
            article_id: article_id.clone(),
            action,
            detail,
        });
    }
}

/// Classification of a pass without running it.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Ledger entries whose article is gone.
    pub deletions: Vec<ArticleId>,
    /// Each source row, with `None` when the placement check did not complete.
    pub rows: Vec<(ArticleId, Option<Classification>)>,
}

impl SyncPlan {
    pub fn count(&self, class: Classification) -> usize {
        self.rows.iter().filter(|(_, c)| *c == Some(class)).count()
    }
}

/// Reject row sets that would corrupt the ledger: empty or repeated ids.
pub fn validate_rows(rows: &[ArticleRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if row.article_id.as_str().is_empty() {
            return Err(KbMirrorError::validation(format!(
                "source row with empty article id (title: {:?})",
                row.title
            )));
        }
        if !seen.insert(&row.article_id) {
            return Err(KbMirrorError::validation(format!(
                "duplicate article id {} in source rows",
                row.article_id
            )));
        }
    }
    Ok(())
}

const EXHAUSTED: &str = "rate limited, retries exhausted";

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<'a> {
    store: &'a dyn DocumentStore,
    retry: RetryPolicy,
    target: Location,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn DocumentStore, retry: RetryPolicy, target: Location) -> Self {
        Self {
            store,
            retry,
            target,
        }
    }

    /// Bring the documents in line with `rows`, updating `ledger` in place.
    ///
    /// Only malformed rows fail the pass, and they do so before anything is
    /// touched.
    #[instrument(skip_all, fields(target = %self.target, rows = rows.len(), ledger = ledger.len()))]
    pub async fn reconcile(
        &self,
        rows: &[ArticleRecord],
        ledger: &mut Ledger,
        progress: &dyn ProgressReporter,
    ) -> Result<ReconcileReport> {
        validate_rows(rows)?;
        let mut report = ReconcileReport::default();

        let gone = removed_ids(rows, ledger);
        if !gone.is_empty() {
            progress.phase("Deleting documents for removed articles");
        }
        for id in &gone {
            self.delete_entry(id, ledger, &mut report).await;
        }

        progress.phase("Reconciling articles");
        let total = rows.len();
        for (i, row) in rows.iter().enumerate() {
            let (action, detail) = match self.sync_row(row, ledger).await {
                Ok(Some(action)) => (action, None),
                Ok(None) => (Action::Skipped, Some(EXHAUSTED.to_string())),
                Err(e) => (Action::Skipped, Some(e.to_string())),
            };
            report.record(&row.article_id, action, detail);
            progress.article_done(&row.article_id, action.as_str(), i + 1, total);
        }

        Ok(report)
    }

    /// Classify every row without mutating anything.
    #[instrument(skip_all, fields(target = %self.target, rows = rows.len()))]
    pub async fn plan(&self, rows: &[ArticleRecord], ledger: &Ledger) -> Result<SyncPlan> {
        validate_rows(rows)?;
        let mut plan = SyncPlan {
            deletions: removed_ids(rows, ledger),
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            let class = match self.classify(row, ledger).await {
                Ok(class) => class,
                Err(e) => {
                    warn!(article_id = %row.article_id, error = %e, "placement check failed");
                    None
                }
            };
            plan.rows.push((row.article_id.clone(), class));
        }
        Ok(plan)
    }

    /// `Ok(None)` when the placement check was throttled out.
    pub async fn classify(&self, row: &ArticleRecord, ledger: &Ledger) -> Result<Option<Classification>> {
        let Some(entry) = ledger.get(&row.article_id) else {
            return Ok(Some(Classification::New));
        };

        let doc = &entry.document_ref;
        let in_place = self
            .retry
            .run("exists", || self.store.exists_in(doc, &self.target))
            .await?;

        Ok(in_place.map(|in_place| {
            if !in_place {
                Classification::MovedOrMissing
            } else if entry.revision != row.revision {
                Classification::Stale
            } else {
                Classification::Current
            }
        }))
    }

    async fn sync_row(&self, row: &ArticleRecord, ledger: &mut Ledger) -> Result<Option<Action>> {
        let Some(class) = self.classify(row, ledger).await? else {
            return Ok(None);
        };
        debug!(article_id = %row.article_id, ?class, "classified");

        match class {
            Classification::Current => Ok(Some(Action::Current)),
            Classification::New => {
                let created = self.create_document(row).await?;
                Ok(created.map(|doc| {
                    ledger.upsert(
                        row.article_id.clone(),
                        LedgerEntry::new(doc, row.revision.clone()),
                    );
                    Action::Created
                }))
            }
            Classification::MovedOrMissing => {
                // The old document is unrecoverable whatever happens next.
                ledger.remove(&row.article_id);
                let created = self.create_document(row).await?;
                Ok(created.map(|doc| {
                    ledger.upsert(
                        row.article_id.clone(),
                        LedgerEntry::new(doc, row.revision.clone()),
                    );
                    Action::Recreated
                }))
            }
            Classification::Stale => {
                let Some(entry) = ledger.get(&row.article_id) else {
                    return Ok(None);
                };
                let doc = entry.document_ref.clone();
                let patched = self.replace_content(&doc, &render_article(row)).await?;
                Ok(patched.map(|()| {
                    ledger.set_revision(&row.article_id, row.revision.clone());
                    Action::Updated
                }))
            }
        }
    }

    /// Delete the document of an article that left the source. The entry is
    /// dropped once the document is confirmed gone.
    async fn delete_entry(&self, id: &ArticleId, ledger: &mut Ledger, report: &mut ReconcileReport) {
        let Some(entry) = ledger.get(id) else {
            return;
        };
        let doc = entry.document_ref.clone();

        match self.retry.run("delete", || self.store.delete(&doc)).await {
            Ok(Some(())) => {
                ledger.remove(id);
                report.record(id, Action::Deleted, None);
            }
            Err(e) if e.is_not_found() => {
                debug!(article_id = %id, document = %doc, "document already gone");
                ledger.remove(id);
                report.record(id, Action::Deleted, None);
            }
            Ok(None) => report.record(id, Action::Skipped, Some(EXHAUSTED.to_string())),
            Err(e) => report.record(id, Action::Skipped, Some(e.to_string())),
        }
    }

    /// Create, fill and file a document for `row`. A document left
    /// half-made is deleted again and `Ok(None)`/`Err` returned.
    async fn create_document(&self, row: &ArticleRecord) -> Result<Option<DocumentRef>> {
        let title = row.article_id.to_string();
        let Some(doc) = self.retry.run("create", || self.store.create(&title)).await? else {
            return Ok(None);
        };

        match self.fill_and_file(&doc, &render_article(row)).await {
            Ok(Some(())) => Ok(Some(doc)),
            other => {
                self.discard(&doc).await;
                other.map(|_| None)
            }
        }
    }

    async fn fill_and_file(&self, doc: &DocumentRef, content: &str) -> Result<Option<()>> {
        let batch = EditBatch::new().insert_text(BODY_START, content);
        if self
            .retry
            .run("insert", || self.store.batch_edit(doc, &batch))
            .await?
            .is_none()
        {
            return Ok(None);
        }
        self.retry
            .run("move", || self.store.move_to(doc, &self.target))
            .await
    }

    async fn discard(&self, doc: &DocumentRef) {
        match self.retry.run("discard", || self.store.delete(doc)).await {
            Ok(Some(())) => debug!(document = %doc, "discarded half-created document"),
            Ok(None) => warn!(document = %doc, "could not discard half-created document: {EXHAUSTED}"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(document = %doc, error = %e, "could not discard half-created document"),
        }
    }

    /// Full replace against a freshly fetched copy of the document.
    async fn replace_content(&self, doc: &DocumentRef, content: &str) -> Result<Option<()>> {
        let Some(current) = self.retry.run("get", || self.store.get(doc)).await? else {
            return Ok(None);
        };
        let batch = build_patch(&current, content, PatchMode::Full)?;
        self.retry
            .run("patch", || self.store.batch_edit(doc, &batch))
            .await
    }
}

fn removed_ids(rows: &[ArticleRecord], ledger: &Ledger) -> Vec<ArticleId> {
    let current: HashSet<&ArticleId> = rows.iter().map(|r| &r.article_id).collect();
    ledger
        .ids()
        .filter(|id| !current.contains(id))
        .cloned()
        .collect()
}
