//! SQLite storage layer -- pool, schema, shared error type.
//!
//! The database is the only synchronization point between request contexts.
//! Every mutation is scoped to one run, keyed by run id or call id.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    let version = schema::current_version(&conn)?;
    tracing::debug!(path = %path.display(), ?version, "database ready");

    Ok(pool)
}

/// Errors from the run, test-case and preference stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("call id {call_id} is already registered to run {existing_run}")]
    DuplicateCallId { call_id: String, existing_run: i64 },

    #[error("run {run_id} is already correlated with call id {call_id}")]
    RunAlreadyCorrelated { run_id: i64, call_id: String },

    #[error("test run {0} not found")]
    RunNotFound(i64),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Current time in the format every table stores.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Pool over a fresh on-disk database. The `TempDir` must outlive the pool.
#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = open_pool(&dir.path().join("test.db")).unwrap();
    (dir, pool)
}
