//! Reconciliation engine and example-ticket pipeline for kbmirror.
//!
//! This crate keeps a folder of mirrored documents in line with the
//! knowledge-base articles a source query returns (`sync`), and appends
//! clustered example tickets to those documents (`examples`).

pub mod cluster;
pub mod examples;
pub mod marker;
pub mod patch;
pub mod pipeline;
pub mod reconcile;
pub mod render;
pub mod retry;

pub use cluster::{BridgeClusterer, Clusterer, Unclustered, cluster_groups};
pub use marker::{MarkerScan, Markers};
pub use patch::{PatchMode, build_patch};
pub use pipeline::{
    ExamplesResult, PassOptions, ProgressReporter, Services, SilentProgress, SyncResult,
    append_examples, plan_collection, sync_collection,
};
pub use reconcile::{Action, ArticleOutcome, Classification, ReconcileReport, Reconciler, SyncPlan};
pub use retry::RetryPolicy;
