//! The ledger: which mirrored document belongs to which article, and at which
//! revision it was last written.
//!
//! Keys are unique by construction (`BTreeMap`), and iteration order is the
//! article-id order so that saved ledgers diff cleanly between runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ArticleId, DocumentRef, Revision};

/// A single ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub document_ref: DocumentRef,
    pub revision: Revision,
}

impl LedgerEntry {
    pub fn new(document_ref: DocumentRef, revision: Revision) -> Self {
        Self {
            document_ref,
            revision,
        }
    }
}

/// In-memory ledger for one collection, mutated during a pass and flushed once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: BTreeMap<ArticleId, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ArticleId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ArticleId) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or replace the entry for `id`, returning the previous one.
    pub fn upsert(&mut self, id: ArticleId, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(id, entry)
    }

    /// Record a new revision for an existing entry. Returns `false` when the
    /// article is not tracked.
    pub fn set_revision(&mut self, id: &ArticleId, revision: Revision) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.revision = revision;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ArticleId) -> Option<LedgerEntry> {
        self.entries.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ArticleId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArticleId, &LedgerEntry)> {
        self.entries.iter()
    }
}

impl FromIterator<(ArticleId, LedgerEntry)> for Ledger {
    fn from_iter<I: IntoIterator<Item = (ArticleId, LedgerEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Ledger {
    type Item = (ArticleId, LedgerEntry);
    type IntoIter = std::collections::btree_map::IntoIter<ArticleId, LedgerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(doc: &str, rev: i64) -> LedgerEntry {
        LedgerEntry::new(DocumentRef::from(doc), Revision::from(rev))
    }

    #[test]
    fn upsert_replaces_existing_key() {
        let mut ledger = Ledger::new();
        assert!(ledger.upsert("A1".into(), entry("d1", 1)).is_none());
        let previous = ledger.upsert("A1".into(), entry("d2", 2));
        assert_eq!(previous, Some(entry("d1", 1)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&"A1".into()), Some(&entry("d2", 2)));
    }

    #[test]
    fn set_revision_only_touches_tracked_articles() {
        let mut ledger: Ledger = [("A1".into(), entry("d1", 3))].into_iter().collect();
        assert!(ledger.set_revision(&"A1".into(), Revision::from(4)));
        assert!(!ledger.set_revision(&"A9".into(), Revision::from(4)));
        assert_eq!(ledger.get(&"A1".into()).map(|e| e.revision.clone()), Some(Revision::from(4)));
        assert!(!ledger.contains(&"A9".into()));
    }

    #[test]
    fn serializes_as_map() {
        let ledger: Ledger = [("A1".into(), entry("d1", 3))].into_iter().collect();
        let json = serde_json::to_string(&ledger).expect("serialize");
        assert_eq!(json, r#"{"A1":{"document_ref":"d1","revision":"3"}}"#);
        let parsed: Ledger = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, ledger);
    }
}
