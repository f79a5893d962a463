//! Connection pool creation and configuration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Path that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Where the database lives and how its pool behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSettings {
    /// SQLite file path, or [`IN_MEMORY`].
    pub path: String,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
}

impl DbSettings {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::in_memory()
        }
    }

    /// A fresh in-memory database, shared by every connection of one pool.
    pub fn in_memory() -> Self {
        Self {
            path: IN_MEMORY.to_string(),
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY
    }
}

/// Pool of SQLite connections shared by the server.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Applies per-connection pragmas as the pool opens each connection.
#[derive(Debug)]
struct ConnectionSetup {
    busy_timeout: Duration,
    wal: bool,
}

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        if self.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!("journal_mode stayed {mode}, expected wal")),
                ));
            }
        }
        Ok(())
    }
}

static MEMORY_DATABASES: AtomicUsize = AtomicUsize::new(0);

/// Opens a pool for `settings`.
///
/// File databases run in WAL mode. An in-memory database gets a unique
/// shared-cache name, so all of the pool's connections see the same tables;
/// it lives as long as the pool keeps a connection open, so connections in
/// such a pool never expire.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if no connection can be established.
pub fn create_pool(settings: &DbSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;

    let in_memory = settings.is_in_memory();
    let target = if in_memory {
        let n = MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed);
        format!(
            "file:autotrade-{}-{n}?mode=memory&cache=shared",
            std::process::id()
        )
    } else {
        settings.path.clone()
    };

    let mut builder = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_customizer(Box::new(ConnectionSetup {
            busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
            wal: !in_memory,
        }));
    if in_memory {
        builder = builder.max_lifetime(None).idle_timeout(None);
    }
    let pool = builder.build(SqliteConnectionManager::file(&target).with_flags(flags))?;

    tracing::debug!(
        path = %settings.path,
        in_memory,
        pool_max_size = settings.pool_max_size,
        "database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_get_foreign_keys_and_busy_timeout() {
        let settings = DbSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
            ..DbSettings::in_memory()
        };

        let pool = create_pool(&settings).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);

        assert_eq!(pool.max_size(), 3);
    }

    #[test]
    fn in_memory_pool_shares_one_database() {
        let pool = create_pool(&DbSettings::in_memory()).expect("pool creation should succeed");

        let writer = pool.get().expect("should get a connection");
        writer
            .execute_batch("CREATE TABLE shared (v INTEGER); INSERT INTO shared VALUES (7);")
            .expect("should write through first connection");

        let reader = pool.get().expect("should get a second connection");
        let v: i64 = reader
            .query_row("SELECT v FROM shared", [], |row| row.get(0))
            .expect("second connection should see the table");
        assert_eq!(v, 7);
    }

    #[test]
    fn separate_in_memory_pools_are_isolated() {
        let first = create_pool(&DbSettings::in_memory()).expect("first pool");
        let second = create_pool(&DbSettings::in_memory()).expect("second pool");

        first
            .get()
            .expect("connection")
            .execute_batch("CREATE TABLE only_first (v INTEGER);")
            .expect("should create table");

        let seen: i64 = second
            .get()
            .expect("connection")
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'only_first'",
                [],
                |row| row.get(0),
            )
            .expect("should query schema");
        assert_eq!(seen, 0);
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("wal.db");

        let pool = create_pool(&DbSettings::file(path.to_string_lossy()))
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");
    }
}
