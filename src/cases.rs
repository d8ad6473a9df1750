//! Test case records, as resolved by the dashboard's CRUD layer.
//!
//! The orchestrator only reads the destination, DTMF script, timeout and
//! ownership of a case.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::storage::{Pool, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub name: String,
    pub owner_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub phone_number: Option<String>,
    pub dtmf_inputs: Vec<String>,
    pub timeout_seconds: Option<u32>,
}

/// Fields for a new test case.
#[derive(Debug, Clone, Default)]
pub struct NewTestCase {
    pub name: String,
    pub owner_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub phone_number: Option<String>,
    pub dtmf_inputs: Vec<String>,
    pub timeout_seconds: Option<u32>,
}

#[derive(Clone)]
pub struct TestCaseStore {
    pool: Pool,
}

impl TestCaseStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn insert(&self, case: &NewTestCase) -> Result<i64, StoreError> {
        let dtmf = serde_json::to_string(&case.dtmf_inputs)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO test_cases (name, owner_id, campaign_id, phone_number, dtmf_inputs, timeout_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                case.name,
                case.owner_id,
                case.campaign_id,
                case.phone_number,
                dtmf,
                case.timeout_seconds
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<TestCase>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, name, owner_id, campaign_id, phone_number, dtmf_inputs, timeout_seconds
                 FROM test_cases WHERE id = ?1",
                params![id],
                raw_case,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    pub fn list(&self) -> Result<Vec<TestCase>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, owner_id, campaign_id, phone_number, dtmf_inputs, timeout_seconds
             FROM test_cases ORDER BY id",
        )?;
        let rows = stmt.query_map([], raw_case)?;

        let mut list = Vec::new();
        for r in rows {
            list.push(decode(r?)?);
        }
        Ok(list)
    }
}

type RawCase = (TestCase, String);

fn raw_case(row: &Row<'_>) -> rusqlite::Result<RawCase> {
    Ok((
        TestCase {
            id: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            campaign_id: row.get(3)?,
            phone_number: row.get(4)?,
            dtmf_inputs: Vec::new(),
            timeout_seconds: row.get(6)?,
        },
        row.get(5)?,
    ))
}

fn decode((mut case, dtmf): RawCase) -> Result<TestCase, StoreError> {
    case.dtmf_inputs = serde_json::from_str(&dtmf)
        .map_err(|e| StoreError::Corrupt(format!("test case {} dtmf_inputs: {e}", case.id)))?;
    Ok(case)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_pool;

    #[test]
    fn test_insert_and_get() {
        let (_dir, pool) = test_pool();
        let store = TestCaseStore::new(pool);

        let id = store
            .insert(&NewTestCase {
                name: "Main menu".into(),
                owner_id: Some(3),
                phone_number: Some("5551234567".into()),
                dtmf_inputs: vec!["1".into(), "#".into()],
                timeout_seconds: Some(45),
                ..Default::default()
            })
            .unwrap();

        let case = store.get(id).unwrap().unwrap();
        assert_eq!(case.name, "Main menu");
        assert_eq!(case.owner_id, Some(3));
        assert_eq!(case.dtmf_inputs, vec!["1", "#"]);
        assert_eq!(case.timeout_seconds, Some(45));
        assert!(store.get(id + 100).unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
