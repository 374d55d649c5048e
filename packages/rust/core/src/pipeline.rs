//! End-to-end passes: `sync` (source → documents → ledger) and `examples`
//! (tickets → clusters → example blocks).

use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use kbmirror_docstore::DocumentStore;
use kbmirror_shared::{
    AppConfig, ArticleId, CollectionConfig, DocumentRef, KbMirrorError, Ledger, Location, Result,
};
use kbmirror_source::RecordSource;
use kbmirror_storage::LedgerStore;

use crate::cluster::{Clusterer, cluster_groups};
use crate::examples::{ExamplesWriter, find_document, group_tickets};
use crate::marker::Markers;
use crate::reconcile::{Action, ReconcileReport, Reconciler, SyncPlan};
use crate::render::render_examples;
use crate::retry::RetryPolicy;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each article is handled.
    fn article_done(&self, article_id: &ArticleId, action: &str, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn article_done(&self, _article_id: &ArticleId, _action: &str, _current: usize, _total: usize) {}
}

/// The remote collaborators a pass works against.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub source: &'a dyn RecordSource,
    pub store: &'a dyn DocumentStore,
    pub ledgers: &'a dyn LedgerStore,
}

/// Settings shared by every pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    pub retry: RetryPolicy,
    /// Namespace the ledgers are stored in.
    pub ledger_location: Location,
}

impl PassOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            ledger_location: Location(config.ledger.location.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

/// Result of a `sync` pass over one collection.
#[derive(Debug)]
pub struct SyncResult {
    pub collection: String,
    pub report: ReconcileReport,
    /// Entries in the saved ledger.
    pub ledger_size: usize,
    pub elapsed: Duration,
}

/// Run one reconciliation pass for `collection`.
///
/// 1. Load the ledger
/// 2. Fetch the article rows
/// 3. Reconcile documents against the ledger
/// 4. Save the ledger, once
///
/// Errors in steps 1, 2 and 4 (and malformed rows in 3) end the pass.
/// Document mutations already applied stay applied.
#[instrument(skip_all, fields(collection = %collection.name, ledger = %collection.ledger_name))]
pub async fn sync_collection(
    services: Services<'_>,
    options: &PassOptions,
    collection: &CollectionConfig,
    progress: &dyn ProgressReporter,
) -> Result<SyncResult> {
    let start = Instant::now();

    progress.phase("Loading ledger");
    let mut ledger = services
        .ledgers
        .load(&collection.ledger_name, &options.ledger_location)
        .await?;

    progress.phase("Fetching articles");
    let rows = services.source.fetch_articles(&collection.query).await?;
    info!(rows = rows.len(), ledger = ledger.len(), "starting sync");

    let reconciler = Reconciler::new(services.store, options.retry, collection.target());
    let report = reconciler.reconcile(&rows, &mut ledger, progress).await?;

    info!(
        created = report.count(Action::Created),
        recreated = report.count(Action::Recreated),
        updated = report.count(Action::Updated),
        deleted = report.count(Action::Deleted),
        current = report.count(Action::Current),
        skipped = report.count(Action::Skipped),
        "reconciliation finished"
    );

    progress.phase("Saving ledger");
    services
        .ledgers
        .save(&collection.ledger_name, &ledger, &options.ledger_location)
        .await
        .map_err(|e| {
            warn!(error = %e, "ledger save failed; document changes from this pass are not recorded");
            e
        })?;

    Ok(SyncResult {
        collection: collection.name.clone(),
        report,
        ledger_size: ledger.len(),
        elapsed: start.elapsed(),
    })
}

/// Classify `collection` without touching documents or the ledger.
#[instrument(skip_all, fields(collection = %collection.name))]
pub async fn plan_collection(
    services: Services<'_>,
    options: &PassOptions,
    collection: &CollectionConfig,
    progress: &dyn ProgressReporter,
) -> Result<SyncPlan> {
    progress.phase("Loading ledger");
    let ledger = services
        .ledgers
        .load(&collection.ledger_name, &options.ledger_location)
        .await?;

    progress.phase("Fetching articles");
    let rows = services.source.fetch_articles(&collection.query).await?;

    progress.phase("Classifying articles");
    Reconciler::new(services.store, options.retry, collection.target())
        .plan(&rows, &ledger)
        .await
}

// ---------------------------------------------------------------------------
// examples
// ---------------------------------------------------------------------------

/// Result of an `examples` pass.
#[derive(Debug, Default)]
pub struct ExamplesResult {
    /// Articles whose document received a block.
    pub written: Vec<ArticleId>,
    /// Articles that had a document but could not be written.
    pub skipped: Vec<(ArticleId, String)>,
    /// Articles with tickets but no document in any searched ledger.
    pub unmatched: Vec<ArticleId>,
    /// Articles left with nothing to show after label filtering.
    pub filtered: Vec<ArticleId>,
    /// Filtered articles whose earlier block was emptied.
    pub cleared: Vec<ArticleId>,
    /// Dry run only: what would have been written, and where.
    pub rendered: Vec<(ArticleId, DocumentRef, String)>,
}

/// Append clustered example tickets to each article's document.
#[instrument(skip_all, fields(dry_run))]
pub async fn append_examples(
    services: Services<'_>,
    options: &PassOptions,
    config: &AppConfig,
    clusterer: &mut dyn Clusterer,
    dry_run: bool,
    progress: &dyn ProgressReporter,
) -> Result<ExamplesResult> {
    let examples = &config.examples;

    progress.phase("Loading ledgers");
    let ledgers = load_searched_ledgers(services, options, config).await?;

    progress.phase("Fetching tickets");
    let tickets = services
        .source
        .fetch_tickets(&examples.query, examples.max_tickets)
        .await?;
    let groups = group_tickets(tickets, examples.max_tickets);
    info!(articles = groups.len(), "tickets grouped");

    progress.phase("Clustering tickets");
    let clustered = cluster_groups(groups, examples.min_group_size, clusterer);

    progress.phase("Writing examples");
    let markers = Markers::new(&examples.marker_start, &examples.marker_end);
    let placeholder = markers.strip_from(&examples.heading);
    let writer = ExamplesWriter::new(services.store, options.retry, markers.clone());
    let mut result = ExamplesResult::default();
    let total = clustered.len();

    for (i, (article_id, assignments)) in clustered.iter().enumerate() {
        // Ticket text is free-form and may quote a marker.
        let rendered = render_examples(&examples.heading, assignments, examples.label_filter)
            .map(|body| markers.strip_from(&body));
        let doc = find_document(&ledgers, article_id);

        let action = match (rendered, doc) {
            (None, doc) => {
                debug!(article_id = %article_id, "no tickets left after filtering");
                result.filtered.push(article_id.clone());
                match doc {
                    Some(doc) if !dry_run => {
                        let outcome = writer.clear(doc, &placeholder).await;
                        match settle(&mut result, article_id, outcome) {
                            Some(true) => {
                                info!(article_id = %article_id, action = "cleared", "stale examples block emptied");
                                result.cleared.push(article_id.clone());
                                "cleared"
                            }
                            Some(false) => "filtered",
                            None => "skipped",
                        }
                    }
                    _ => "filtered",
                }
            }
            (Some(_), None) => {
                debug!(article_id = %article_id, "article has no document, skipping");
                result.unmatched.push(article_id.clone());
                "unmatched"
            }
            (Some(body), Some(doc)) if dry_run => {
                result.rendered.push((article_id.clone(), doc.clone(), body));
                "rendered"
            }
            (Some(body), Some(doc)) => {
                let outcome = writer.write(doc, &body).await.map(|w| w.map(|()| true));
                match settle(&mut result, article_id, outcome) {
                    Some(_) => {
                        info!(article_id = %article_id, action = "examples", tickets = assignments.len(), "examples written");
                        result.written.push(article_id.clone());
                        "examples"
                    }
                    None => "skipped",
                }
            }
        };
        progress.article_done(article_id, action, i + 1, total);
    }

    Ok(result)
}

/// Record a failed or throttled write as skipped, passing success through.
fn settle(
    result: &mut ExamplesResult,
    article_id: &ArticleId,
    outcome: Result<Option<bool>>,
) -> Option<bool> {
    let reason = match outcome {
        Ok(Some(done)) => return Some(done),
        Ok(None) => "rate limited, retries exhausted".to_string(),
        Err(e) => e.to_string(),
    };
    warn!(article_id = %article_id, action = "skipped", reason = %reason, "examples not written");
    result.skipped.push((article_id.clone(), reason));
    None
}

/// Ledgers named by `examples.ledgers` (all collections when empty), in order.
async fn load_searched_ledgers(
    services: Services<'_>,
    options: &PassOptions,
    config: &AppConfig,
) -> Result<Vec<(String, Ledger)>> {
    let names: Vec<&str> = if config.examples.ledgers.is_empty() {
        config.collections.iter().map(|c| c.name.as_str()).collect()
    } else {
        config.examples.ledgers.iter().map(String::as_str).collect()
    };

    let mut ledgers = Vec::with_capacity(names.len());
    for name in names {
        let collection = config
            .collections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| KbMirrorError::config(format!("unknown collection '{name}'")))?;
        let ledger = services
            .ledgers
            .load(&collection.ledger_name, &options.ledger_location)
            .await?;
        debug!(collection = name, entries = ledger.len(), "ledger loaded for examples");
        ledgers.push((collection.name.clone(), ledger));
    }
    Ok(ledgers)
}
