//! Ledger persistence.
//!
//! [`LedgerStore`] is what the pipelines see: load a named ledger (missing
//! means empty) and overwrite it wholesale. [`Storage`] implements it on a
//! local libSQL database; [`MemoryLedgerStore`] keeps ledgers in process.

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info, instrument};

use kbmirror_shared::{
    ArticleId, DocumentRef, KbMirrorError, Ledger, LedgerEntry, Location, Result, Revision,
};

pub use memory::MemoryLedgerStore;

/// Load/save access to named ledgers within a location.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load a ledger. A ledger that was never saved loads as empty.
    async fn load(&self, name: &str, location: &Location) -> Result<Ledger>;

    /// Replace the stored ledger with `ledger`.
    async fn save(&self, name: &str, ledger: &Ledger, location: &Location) -> Result<()>;
}

/// A saved ledger as listed by [`Storage::list_ledgers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub name: String,
    pub entry_count: u64,
    pub saved_at: String,
}

fn storage_err(e: libsql::Error) -> KbMirrorError {
    KbMirrorError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbMirrorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbMirrorError::Storage(format!(
                "ledger database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    KbMirrorError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(KbMirrorError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Saved ledgers in `location`, by name.
    pub async fn list_ledgers(&self, location: &Location) -> Result<Vec<LedgerSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ledger_name, entry_count, saved_at FROM ledgers
                 WHERE location = ?1 ORDER BY ledger_name",
                params![location.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(LedgerSummary {
                name: row.get::<String>(0).map_err(storage_err)?,
                entry_count: row.get::<u64>(1).map_err(storage_err)?,
                saved_at: row.get::<String>(2).map_err(storage_err)?,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl LedgerStore for Storage {
    #[instrument(skip_all, fields(ledger = name, location = %location))]
    async fn load(&self, name: &str, location: &Location) -> Result<Ledger> {
        let mut rows = self
            .conn
            .query(
                "SELECT article_id, document_ref, revision FROM ledger_entries
                 WHERE location = ?1 AND ledger_name = ?2",
                params![location.as_str(), name],
            )
            .await
            .map_err(storage_err)?;

        let mut ledger = Ledger::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let article_id = row.get::<String>(0).map_err(storage_err)?;
            let document_ref = row.get::<String>(1).map_err(storage_err)?;
            let revision = row.get::<String>(2).map_err(storage_err)?;
            ledger.upsert(
                ArticleId::new(article_id),
                LedgerEntry::new(DocumentRef(document_ref), Revision::new(revision)),
            );
        }

        debug!(entries = ledger.len(), "ledger loaded");
        Ok(ledger)
    }

    #[instrument(skip_all, fields(ledger = name, location = %location, entries = ledger.len()))]
    async fn save(&self, name: &str, ledger: &Ledger, location: &Location) -> Result<()> {
        self.check_writable()?;

        // Dropping the transaction on an early return rolls it back.
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        tx.execute(
            "DELETE FROM ledger_entries WHERE location = ?1 AND ledger_name = ?2",
            params![location.as_str(), name],
        )
        .await
        .map_err(storage_err)?;

        for (article_id, entry) in ledger.iter() {
            tx.execute(
                "INSERT INTO ledger_entries (location, ledger_name, article_id, document_ref, revision)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    location.as_str(),
                    name,
                    article_id.as_str(),
                    entry.document_ref.as_str(),
                    entry.revision.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO ledgers (location, ledger_name, entry_count, saved_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(location, ledger_name) DO UPDATE SET
               entry_count = excluded.entry_count,
               saved_at = excluded.saved_at",
            params![location.as_str(), name, ledger.len() as i64, now.as_str()],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        info!("ledger saved");
        Ok(())
    }
}
