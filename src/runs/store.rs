use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::{NewRun, QualityUpdate, RunMetric, RunState, TestRun};
use crate::storage::{now_rfc3339, Pool, StoreError};

const RUN_COLUMNS: &str = "id, test_case_id, campaign_id, requested_by, call_id, state,
    provider_status, initiated_at, finished_at, execution_time_ms, call_duration_ms,
    estimated_cost_usd, voice_quality_score, audio_clarity_score, dtmf_recognition_rate,
    recording_url, transcript, call_flow_path";

/// Durable run records plus the `call_id -> run` index.
///
/// Every mutation is scoped to one run row. Field writes are
/// write-once (`... WHERE field IS NULL`), so duplicate or reordered
/// callbacks converge on the same row contents.
#[derive(Clone)]
pub struct RunStore {
    pool: Pool,
}

impl RunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a run in `Initiated` with no call id yet.
    pub fn create(&self, run: &NewRun) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        insert_run(&conn, run)
    }

    /// Bind `call_id` to `run_id`. Re-registering the same pair is a no-op.
    pub fn register(&self, run_id: i64, call_id: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        bind_call_id(&conn, run_id, call_id)
    }

    /// Insert a run already keyed by `call_id`. Both writes land together or
    /// not at all, so a rejected call id leaves no row behind.
    pub fn open(&self, run: &NewRun, call_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let run_id = insert_run(&tx, run)?;
        bind_call_id(&tx, run_id, call_id)?;
        tx.commit()?;
        Ok(run_id)
    }

    /// Find the run that owns `call_id`.
    pub fn lookup(&self, call_id: &str) -> Result<Option<TestRun>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM test_runs WHERE call_id = ?1"),
                params![call_id],
                raw_run,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    pub fn get(&self, run_id: i64) -> Result<Option<TestRun>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM test_runs WHERE id = ?1"),
                params![run_id],
                raw_run,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    /// `Initiated -> Running`. Returns whether the transition happened.
    pub fn mark_running(&self, run_id: i64) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE test_runs SET state = ?2, updated_at = ?3 WHERE id = ?1 AND state = ?4",
            params![
                run_id,
                RunState::Running.as_str(),
                now_rfc3339(),
                RunState::Initiated.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Move a live run into `terminal`, recording the call outcome once.
    /// Returns `false` when the run was already terminal; nothing is written
    /// in that case.
    pub fn finish(
        &self,
        run_id: i64,
        terminal: RunState,
        provider_status: &str,
        call_duration_ms: i64,
        estimated_cost_usd: f64,
    ) -> Result<bool, StoreError> {
        debug_assert!(terminal.is_terminal());
        let now = now_rfc3339();
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE test_runs
             SET state = ?2,
                 provider_status = ?3,
                 finished_at = ?4,
                 call_duration_ms = COALESCE(call_duration_ms, ?5),
                 estimated_cost_usd = COALESCE(estimated_cost_usd, ?6),
                 updated_at = ?4
             WHERE id = ?1 AND state IN ('initiated', 'running')",
            params![
                run_id,
                terminal.as_str(),
                provider_status,
                now,
                call_duration_ms,
                estimated_cost_usd
            ],
        )?;
        Ok(changed == 1)
    }

    /// Returns whether the URL was written (false if one was already set).
    pub fn set_recording_url(&self, run_id: i64, url: &str) -> Result<bool, StoreError> {
        self.set_text_once(run_id, "recording_url", url)
    }

    pub fn set_transcript(&self, run_id: i64, text: &str) -> Result<bool, StoreError> {
        self.set_text_once(run_id, "transcript", text)
    }

    fn set_text_once(&self, run_id: i64, column: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            &format!(
                "UPDATE test_runs SET {column} = ?2, updated_at = ?3
                 WHERE id = ?1 AND {column} IS NULL"
            ),
            params![run_id, value, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    /// Fill whichever quality scores are still null.
    pub fn set_quality(&self, run_id: i64, q: &QualityUpdate) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE test_runs
             SET voice_quality_score = COALESCE(voice_quality_score, ?2),
                 audio_clarity_score = COALESCE(audio_clarity_score, ?3),
                 dtmf_recognition_rate = COALESCE(dtmf_recognition_rate, ?4),
                 updated_at = ?5
             WHERE id = ?1",
            params![
                run_id,
                q.voice_quality_score,
                q.audio_clarity_score,
                q.dtmf_recognition_rate,
                now_rfc3339()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Attach metrics to a run. A metric name already present for the run is
    /// kept as is. Returns how many rows were new.
    pub fn record_metrics(&self, run_id: i64, metrics: &[RunMetric]) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO performance_metrics (test_run_id, metric_name, metric_value, unit)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for m in metrics {
                inserted += stmt.execute(params![run_id, m.name, m.value, m.unit])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn metrics(&self, run_id: i64) -> Result<Vec<RunMetric>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT metric_name, metric_value, unit FROM performance_metrics
             WHERE test_run_id = ?1 ORDER BY metric_name",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RunMetric {
                name: row.get(0)?,
                value: row.get(1)?,
                unit: row.get(2)?,
            })
        })?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }
}

fn insert_run(conn: &Connection, run: &NewRun) -> Result<i64, StoreError> {
    let path =
        serde_json::to_string(&run.call_flow_path).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO test_runs (test_case_id, campaign_id, requested_by, state, initiated_at,
                                execution_time_ms, call_flow_path, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?5)",
        params![
            run.test_case_id,
            run.campaign_id,
            run.requested_by,
            RunState::Initiated.as_str(),
            now,
            run.execution_time_ms,
            path
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn bind_call_id(conn: &Connection, run_id: i64, call_id: &str) -> Result<(), StoreError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM test_runs WHERE call_id = ?1",
            params![call_id],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        Some(id) if id == run_id => return Ok(()),
        Some(id) => {
            return Err(StoreError::DuplicateCallId {
                call_id: call_id.to_string(),
                existing_run: id,
            })
        }
        None => {}
    }

    let changed = match conn.execute(
        "UPDATE test_runs SET call_id = ?2, updated_at = ?3
         WHERE id = ?1 AND call_id IS NULL",
        params![run_id, call_id, now_rfc3339()],
    ) {
        Ok(n) => n,
        // Lost a race against another registration of the same call id.
        Err(rusqlite::Error::SqliteFailure(f, _)) if f.code == ErrorCode::ConstraintViolation => {
            let owner: i64 = conn.query_row(
                "SELECT id FROM test_runs WHERE call_id = ?1",
                params![call_id],
                |row| row.get(0),
            )?;
            return Err(StoreError::DuplicateCallId {
                call_id: call_id.to_string(),
                existing_run: owner,
            });
        }
        Err(e) => return Err(e.into()),
    };

    if changed == 0 {
        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT call_id FROM test_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        return match current {
            None => Err(StoreError::RunNotFound(run_id)),
            Some(other) => Err(StoreError::RunAlreadyCorrelated {
                run_id,
                call_id: other.unwrap_or_default(),
            }),
        };
    }

    debug!(run_id, %call_id, "registered call id");
    Ok(())
}

type RawRun = (TestRun, String, Option<String>);

fn raw_run(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok((
        TestRun {
            id: row.get(0)?,
            test_case_id: row.get(1)?,
            campaign_id: row.get(2)?,
            requested_by: row.get(3)?,
            call_id: row.get(4)?,
            state: RunState::Initiated,
            provider_status: row.get(6)?,
            initiated_at: row.get(7)?,
            finished_at: row.get(8)?,
            execution_time_ms: row.get(9)?,
            call_duration_ms: row.get(10)?,
            estimated_cost_usd: row.get(11)?,
            voice_quality_score: row.get(12)?,
            audio_clarity_score: row.get(13)?,
            dtmf_recognition_rate: row.get(14)?,
            recording_url: row.get(15)?,
            transcript: row.get(16)?,
            call_flow_path: None,
        },
        row.get(5)?,
        row.get(17)?,
    ))
}

fn decode((mut run, state, path): RawRun) -> Result<TestRun, StoreError> {
    run.state = state
        .parse()
        .map_err(|e: String| StoreError::Corrupt(format!("run {}: {e}", run.id)))?;
    run.call_flow_path = path
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("run {} call_flow_path: {e}", run.id)))?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_pool;

    fn new_run(case: i64) -> NewRun {
        NewRun {
            test_case_id: case,
            call_flow_path: vec!["dial:+15551234567".into(), "dtmf:1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_create_register_lookup() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);

        let run_id = store.create(&new_run(1)).unwrap();
        assert!(store.lookup("CA1").unwrap().is_none());

        store.register(run_id, "CA1").unwrap();
        let run = store.lookup("CA1").unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.state, RunState::Initiated);
        assert_eq!(run.call_id.as_deref(), Some("CA1"));
        assert_eq!(
            run.call_flow_path.unwrap(),
            vec!["dial:+15551234567", "dtmf:1"]
        );
    }

    #[test]
    fn test_open_binds_call_id_atomically() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);

        let first = store.open(&new_run(1), "CA1").unwrap();
        assert_eq!(store.lookup("CA1").unwrap().unwrap().id, first);

        let err = store.open(&new_run(2), "CA1").unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateCallId { existing_run, .. } if existing_run == first
        ));
        // The rejected run was rolled back with its failed binding.
        assert!(store.get(first + 1).unwrap().is_none());
        let next = store.open(&new_run(3), "CA2").unwrap();
        assert_eq!(store.get(next).unwrap().unwrap().test_case_id, 3);
    }

    #[test]
    fn test_register_is_idempotent_for_same_run() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let run_id = store.create(&new_run(1)).unwrap();

        store.register(run_id, "CA1").unwrap();
        store.register(run_id, "CA1").unwrap();
    }

    #[test]
    fn test_register_rejects_duplicate_call_id() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let a = store.create(&new_run(1)).unwrap();
        let b = store.create(&new_run(2)).unwrap();

        store.register(a, "CA1").unwrap();
        let err = store.register(b, "CA1").unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateCallId { existing_run, .. } if existing_run == a
        ));
        // The first owner is untouched.
        assert_eq!(store.lookup("CA1").unwrap().unwrap().id, a);
    }

    #[test]
    fn test_register_unknown_run_and_recorrelation() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        assert!(matches!(
            store.register(42, "CA1"),
            Err(StoreError::RunNotFound(42))
        ));

        let run_id = store.create(&new_run(1)).unwrap();
        store.register(run_id, "CA1").unwrap();
        assert!(matches!(
            store.register(run_id, "CA2"),
            Err(StoreError::RunAlreadyCorrelated { .. })
        ));
    }

    #[test]
    fn test_no_substring_correlation() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let run_id = store.create(&new_run(1)).unwrap();
        store.register(run_id, "CA12345").unwrap();

        assert!(store.lookup("CA123").unwrap().is_none());
        assert!(store.lookup("A1234").unwrap().is_none());
    }

    #[test]
    fn test_state_machine_is_forward_only() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let run_id = store.create(&new_run(1)).unwrap();

        assert!(store.mark_running(run_id).unwrap());
        assert!(!store.mark_running(run_id).unwrap());

        assert!(store
            .finish(run_id, RunState::Completed, "completed", 42_000, 0.0655)
            .unwrap());
        // Absorbing: a later failure report changes nothing.
        assert!(!store
            .finish(run_id, RunState::Failed, "busy", 1_000, 0.0)
            .unwrap());
        assert!(!store.mark_running(run_id).unwrap());

        let run = store.get(run_id).unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.provider_status.as_deref(), Some("completed"));
        assert_eq!(run.call_duration_ms, Some(42_000));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_artifacts_are_write_once() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let run_id = store.create(&new_run(1)).unwrap();

        assert!(store.set_recording_url(run_id, "https://rec/1").unwrap());
        assert!(!store.set_recording_url(run_id, "https://rec/2").unwrap());
        assert!(store.set_transcript(run_id, "press one").unwrap());
        assert!(!store.set_transcript(run_id, "other").unwrap());

        store
            .set_quality(
                run_id,
                &QualityUpdate {
                    voice_quality_score: Some(84.0),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .set_quality(
                run_id,
                &QualityUpdate {
                    voice_quality_score: Some(10.0),
                    dtmf_recognition_rate: Some(1.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let run = store.get(run_id).unwrap().unwrap();
        assert_eq!(run.recording_url.as_deref(), Some("https://rec/1"));
        assert_eq!(run.transcript.as_deref(), Some("press one"));
        assert_eq!(run.voice_quality_score, Some(84.0));
        assert_eq!(run.dtmf_recognition_rate, Some(1.0));
        assert_eq!(run.audio_clarity_score, None);
    }

    #[test]
    fn test_metrics_keep_first_value() {
        let (_dir, pool) = test_pool();
        let store = RunStore::new(pool);
        let run_id = store.create(&new_run(1)).unwrap();

        let first = [
            RunMetric::new("mos_score", 4.2, "score"),
            RunMetric::new("jitter", 3.0, "ms"),
        ];
        assert_eq!(store.record_metrics(run_id, &first).unwrap(), 2);
        assert_eq!(
            store
                .record_metrics(run_id, &[RunMetric::new("mos_score", 1.0, "score")])
                .unwrap(),
            0
        );

        let metrics = store.metrics(run_id).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1], RunMetric::new("mos_score", 4.2, "score"));
    }
}
