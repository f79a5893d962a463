//! Embedded SQL migration runner.
//!
//! Migrations are SQL files compiled into the binary. They run in order on
//! start-up and are recorded in `_autotrade_migrations`; an applied
//! migration is never run again. Each one commits atomically with its
//! tracking row.

use rusqlite::Connection;
use thiserror::Error;

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS _autotrade_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_market",
        sql: include_str!("migrations/001_market.sql"),
    },
    Migration {
        name: "002_strategy",
        sql: include_str!("migrations/002_strategy.sql"),
    },
    Migration {
        name: "003_trading",
        sql: include_str!("migrations/003_trading.sql"),
    },
    Migration {
        name: "004_risk",
        sql: include_str!("migrations/004_risk.sql"),
    },
    Migration {
        name: "005_experiments",
        sql: include_str!("migrations/005_experiments.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations and returns how many were applied.
///
/// # Errors
///
/// Returns `MigrationError` if a migration fails (its changes are rolled
/// back) or the tracking table cannot be read.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

/// Number of migrations shipped with this build.
pub fn migration_count() -> usize {
    MIGRATIONS.len()
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE_SQL)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_autotrade_migrations_bootstrap".to_string(),
            source,
        })?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _autotrade_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _autotrade_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
