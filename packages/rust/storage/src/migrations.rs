//! SQL migration definitions for the ledger database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: ledgers, ledger_entries",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per saved ledger, so an empty ledger still shows up
CREATE TABLE IF NOT EXISTS ledgers (
    location    TEXT NOT NULL,
    ledger_name TEXT NOT NULL,
    entry_count INTEGER NOT NULL,
    saved_at    TEXT NOT NULL,
    PRIMARY KEY (location, ledger_name)
);

-- article_id -> mirrored document
CREATE TABLE IF NOT EXISTS ledger_entries (
    location     TEXT NOT NULL,
    ledger_name  TEXT NOT NULL,
    article_id   TEXT NOT NULL,
    document_ref TEXT NOT NULL,
    revision     TEXT NOT NULL,
    PRIMARY KEY (location, ledger_name, article_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
