//! Embedded SQL migration runner.
//!
//! Migrations are compiled into the binary and applied in order at startup.
//! Applied names are recorded in `_crossnostr_migrations`; each migration and
//! its tracking row commit in one transaction.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_telegram_channels",
        sql: include_str!("migrations/001_telegram_channels.sql"),
    },
    Migration {
        name: "002_nostr_accounts",
        sql: include_str!("migrations/002_nostr_accounts.sql"),
    },
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _crossnostr_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A statement within a migration failed; the migration was rolled back.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// Failed to read which migrations were already applied.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending migration and returns how many ran.
///
/// # Errors
///
/// Returns `MigrationError` if the tracking table cannot be read or any
/// migration fails. A failed migration leaves no partial schema behind.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_crossnostr_migrations".to_string(),
            source,
        })?;

    let mut applied = 0;
    for migration in migrations {
        let seen = conn
            .query_row(
                "SELECT 1 FROM _crossnostr_migrations WHERE name = ?1",
                [migration.name],
                |_| Ok(()),
            )
            .optional()
            .map_err(MigrationError::StateQuery)?
            .is_some();

        if seen {
            tracing::debug!(migration = migration.name, "already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply_one(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _crossnostr_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
