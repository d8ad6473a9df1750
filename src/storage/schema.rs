//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Version written by [`migrate`]. Bump when the table layout changes.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS test_cases (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id INTEGER,
            campaign_id INTEGER,
            phone_number TEXT,
            dtmf_inputs TEXT NOT NULL DEFAULT '[]',
            timeout_seconds INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS test_runs (
            id INTEGER PRIMARY KEY,
            test_case_id INTEGER NOT NULL,
            campaign_id INTEGER,
            requested_by INTEGER,
            call_id TEXT,
            state TEXT NOT NULL DEFAULT 'initiated',
            provider_status TEXT,
            initiated_at TEXT NOT NULL,
            finished_at TEXT,
            execution_time_ms INTEGER,
            call_duration_ms INTEGER,
            estimated_cost_usd REAL,
            voice_quality_score REAL,
            audio_clarity_score REAL,
            dtmf_recognition_rate REAL,
            recording_url TEXT,
            transcript TEXT,
            call_flow_path TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS performance_metrics (
            id INTEGER PRIMARY KEY,
            test_run_id INTEGER NOT NULL,
            metric_name TEXT NOT NULL,
            metric_value REAL NOT NULL,
            unit TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (test_run_id, metric_name),
            FOREIGN KEY (test_run_id) REFERENCES test_runs(id)
        );

        CREATE TABLE IF NOT EXISTS notification_preferences (
            user_id INTEGER PRIMARY KEY,
            email_enabled INTEGER NOT NULL DEFAULT 1,
            sms_enabled INTEGER NOT NULL DEFAULT 0,
            chat_enabled INTEGER NOT NULL DEFAULT 0,
            email_addresses TEXT NOT NULL DEFAULT '[]',
            phone_numbers TEXT NOT NULL DEFAULT '[]',
            chat_webhooks TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_test_runs_call_id ON test_runs(call_id);
        CREATE INDEX IF NOT EXISTS idx_test_runs_case ON test_runs(test_case_id);
        CREATE INDEX IF NOT EXISTS idx_metrics_run ON performance_metrics(test_run_id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Highest applied schema version, or `None` on a database never migrated.
pub fn current_version(conn: &Connection) -> Result<Option<i64>> {
    let version: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["test_cases", "test_runs", "performance_metrics", "notification_preferences"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_migrate_records_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_call_id_index_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO test_runs (test_case_id, call_id, initiated_at) VALUES (1, 'CA1', 'now')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO test_runs (test_case_id, call_id, initiated_at) VALUES (2, 'CA1', 'now')",
            [],
        );
        assert!(dup.is_err());

        // Runs awaiting correlation may coexist.
        conn.execute(
            "INSERT INTO test_runs (test_case_id, initiated_at) VALUES (3, 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO test_runs (test_case_id, initiated_at) VALUES (4, 'now')",
            [],
        )
        .unwrap();
    }
}
