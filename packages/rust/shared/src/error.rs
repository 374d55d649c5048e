//! Error types for kbmirror.
//!
//! Library crates use [`KbMirrorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbmirror operations.
#[derive(Debug, thiserror::Error)]
pub enum KbMirrorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to a remote service.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service asked us to slow down (HTTP 429 or equivalent).
    #[error("rate limited during {operation}")]
    RateLimited { operation: String },

    /// The remote resource does not exist (or is already gone).
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Any other non-success reply from a remote service.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Malformed payload from a remote service.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Ledger storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (malformed source rows, bad edit ranges, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Clustering bridge error.
    #[error("clustering error: {0}")]
    Cluster(String),

    /// A start marker was found without a matching end marker after it.
    #[error("unbalanced markers in document {document}: start marker has no end marker after it")]
    UnbalancedMarkers { document: String },

    /// Block content carrying a marker string would end the block early on
    /// the next scan.
    #[error("content for document {document} contains a block marker")]
    MarkerInContent { document: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbMirrorError>;

impl KbMirrorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn rate_limited(operation: impl Into<String>) -> Self {
        Self::RateLimited {
            operation: operation.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// True for throttling signals, the only class the retry policy retries.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// True when the remote resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
