//! Core domain types for kbmirror.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scalar identifiers
// ---------------------------------------------------------------------------

/// Either a number or a string, as source systems and spreadsheets hand
/// identifiers back in whichever shape they like.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawScalar {
    fn into_canonical(self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => canonical_number(f).unwrap_or_else(|| f.to_string()),
            Self::Text(s) => canonical_text(&s),
        }
    }
}

/// Integral floats print without a fractional part (`3.0` → `"3"`).
fn canonical_number(f: f64) -> Option<String> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        Some(format!("{}", f as i64))
    } else {
        None
    }
}

fn canonical_text(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|_| trimmed.contains('.'))
        .and_then(canonical_number)
        .unwrap_or_else(|| trimmed.to_string())
}

/// Identifier of a knowledge-base article in the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(canonical_text(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ArticleId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        RawScalar::deserialize(d).map(|raw| Self(raw.into_canonical()))
    }
}

impl From<ArticleId> for String {
    fn from(id: ArticleId) -> Self {
        id.0
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<i64> for ArticleId {
    fn from(i: i64) -> Self {
        Self(i.to_string())
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque revision marker of an article.
///
/// Compared by value only. Numeric and textual spellings of the same number
/// are equal (`3`, `"3"`, `3.0`); no ordering is implied, so an "older"
/// revision is just as different as a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(canonical_text(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        RawScalar::deserialize(d).map(|raw| Self(raw.into_canonical()))
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.0
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<i64> for Revision {
    fn from(i: i64) -> Self {
        Self(i.to_string())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a document in the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentRef(pub String);

impl DocumentRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A folder-like container in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// A knowledge-base article as returned by the source extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub article_id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub summary: String,
    pub revision: Revision,
    /// Public link to the article. Filled from the configured template when
    /// the source does not supply one.
    #[serde(default)]
    pub url: String,
}

/// A closed support ticket that cites a knowledge-base article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRow {
    pub ticket_id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Subject line of the article that resolved the ticket.
    #[serde(default)]
    pub article_subject: Option<String>,
    pub article_id: ArticleId,
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Cluster identifier of a ticket within its article's ticket set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterLabel(pub i32);

impl ClusterLabel {
    /// Reserved label for noise and for tickets that were never clustered.
    pub const NOISE: ClusterLabel = ClusterLabel(-1);

    pub fn is_noise(self) -> bool {
        self == Self::NOISE
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ticket together with its assigned cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub ticket: TicketRow,
    pub label: ClusterLabel,
}
