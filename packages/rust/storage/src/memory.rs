//! In-process ledger store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use kbmirror_shared::{KbMirrorError, Ledger, Location, Result};

use crate::LedgerStore;

/// [`LedgerStore`] backed by a map, with switches to make loads or saves fail.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    ledgers: Mutex<HashMap<(String, String), Ledger>>,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored ledger.
    pub async fn put(&self, name: &str, location: &Location, ledger: Ledger) {
        self.ledgers
            .lock()
            .await
            .insert((location.to_string(), name.to_string()), ledger);
    }

    /// The ledger as last saved, if ever.
    pub async fn stored(&self, name: &str, location: &Location) -> Option<Ledger> {
        self.ledgers
            .lock()
            .await
            .get(&(location.to_string(), name.to_string()))
            .cloned()
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self, name: &str, location: &Location) -> Result<Ledger> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(KbMirrorError::Storage(format!(
                "ledger store unreachable while loading {name}"
            )));
        }
        Ok(self.stored(name, location).await.unwrap_or_default())
    }

    async fn save(&self, name: &str, ledger: &Ledger, location: &Location) -> Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(KbMirrorError::Storage(format!(
                "ledger store unreachable while saving {name}"
            )));
        }
        self.put(name, location, ledger.clone()).await;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbmirror_shared::{ArticleId, DocumentRef, LedgerEntry, Revision};

    #[tokio::test]
    async fn save_replaces_and_counts() {
        let store = MemoryLedgerStore::new();
        let location = Location::from("loc");
        assert!(store.load("a", &location).await.unwrap().is_empty());

        let mut ledger = Ledger::new();
        ledger.upsert(
            ArticleId::from(1),
            LedgerEntry::new(DocumentRef::from("d1"), Revision::from(1)),
        );
        store.save("a", &ledger, &location).await.unwrap();

        assert_eq!(store.load("a", &location).await.unwrap(), ledger);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn failure_switches() {
        let store = MemoryLedgerStore::new();
        let location = Location::from("loc");

        store.set_fail_save(true);
        assert!(matches!(
            store.save("a", &Ledger::new(), &location).await,
            Err(KbMirrorError::Storage(_))
        ));
        assert_eq!(store.save_count(), 0);
        assert!(store.stored("a", &location).await.is_none());

        store.set_fail_load(true);
        assert!(store.load("a", &location).await.is_err());
    }
}
