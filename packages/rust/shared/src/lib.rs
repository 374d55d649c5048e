//! Shared types, error model, and configuration for kbmirror.
//!
//! This crate is the foundation depended on by all other kbmirror crates.
//! It provides:
//! - [`KbMirrorError`]: the unified error type
//! - Domain types ([`ArticleRecord`], [`TicketRow`], [`Revision`], [`ClusterLabel`])
//! - The [`Ledger`] mapping article ids to mirrored documents
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod ledger;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CollectionConfig, DocumentStoreConfig, ExamplesConfig, LabelFilter, LedgerConfig,
    RetryConfig, SourceConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, read_token, validate_config,
};
pub use error::{KbMirrorError, Result};
pub use ledger::{Ledger, LedgerEntry};
pub use types::{
    ArticleId, ArticleRecord, ClusterAssignment, ClusterLabel, DocumentRef, Location, Revision,
    TicketRow,
};
