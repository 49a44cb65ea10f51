//! SQL schema and migration setup for the SQLite backend.
//!
//! Uses `rusqlite_migration` to manage schema migrations via SQLite's
//! `user_version` pragma. Migrations are embedded at compile time via
//! `include_str!`.

use std::time::Duration;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// Where and how to open the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file path.
    pub path: String,
    /// How long a statement waits on another connection's lock before the
    /// operation fails with [`StorageError::Timeout`].
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub const DEFAULT_PATH: &'static str = "hint.db";
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(path: impl Into<String>) -> Self {
        StoreConfig {
            path: path.into(),
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::new(Self::DEFAULT_PATH)
    }
}

/// All schema migrations, applied in order via `user_version` tracking.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(include_str!("migrations/001_initial_schema.sql")),
        // Future migrations added here as new M::up(...) entries.
    ])
}

/// Opens (or creates) the database described by `config` with WAL mode,
/// foreign keys, and all pending migrations applied.
pub fn open_database(config: &StoreConfig) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(&config.path)?;
    configure_and_migrate(&mut conn, config.busy_timeout)?;
    Ok(conn)
}

/// Opens an in-memory SQLite database with all migrations applied.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure_and_migrate(&mut conn, StoreConfig::DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Configures pragmas and applies pending migrations.
fn configure_and_migrate(conn: &mut Connection, busy_timeout: Duration) -> Result<(), StorageError> {
    // Set before anything that may need a lock, including the WAL switch.
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // NORMAL synchronous is safe with WAL mode and provides better performance.
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // Enable foreign key enforcement (off by default in SQLite).
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let before: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    let after: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if after != before {
        tracing::info!(from = before, to = after, "applied schema migrations");
    }

    Ok(())
}
