//! Per-user notification preferences.

use rusqlite::{params, OptionalExtension};

use super::NotificationPreference;
use crate::storage::{now_rfc3339, Pool, StoreError};

#[derive(Clone)]
pub struct PreferenceStore {
    pool: Pool,
}

type RawPreference = (bool, bool, bool, String, String, String);

fn decode_list(column: &str, raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn encode_list(list: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(list).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl PreferenceStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Stored preferences, or the defaults (email only, no addresses) for a
    /// user who never saved any.
    pub fn get(&self, user_id: i64) -> Result<NotificationPreference, StoreError> {
        let conn = self.pool.get()?;
        let raw: Option<RawPreference> = conn
            .query_row(
                "SELECT email_enabled, sms_enabled, chat_enabled,
                        email_addresses, phone_numbers, chat_webhooks
                 FROM notification_preferences WHERE user_id = ?1",
                params![user_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;

        let Some((email_enabled, sms_enabled, chat_enabled, emails, phones, hooks)) = raw else {
            return Ok(NotificationPreference::default());
        };
        Ok(NotificationPreference {
            email_enabled,
            sms_enabled,
            chat_enabled,
            email_addresses: decode_list("email_addresses", &emails)?,
            phone_numbers: decode_list("phone_numbers", &phones)?,
            chat_webhooks: decode_list("chat_webhooks", &hooks)?,
        })
    }

    /// Replace the user's preferences wholesale.
    pub fn put(&self, user_id: i64, prefs: &NotificationPreference) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO notification_preferences
                (user_id, email_enabled, sms_enabled, chat_enabled,
                 email_addresses, phone_numbers, chat_webhooks, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                email_enabled = excluded.email_enabled,
                sms_enabled = excluded.sms_enabled,
                chat_enabled = excluded.chat_enabled,
                email_addresses = excluded.email_addresses,
                phone_numbers = excluded.phone_numbers,
                chat_webhooks = excluded.chat_webhooks,
                updated_at = excluded.updated_at",
            params![
                user_id,
                prefs.email_enabled,
                prefs.sms_enabled,
                prefs.chat_enabled,
                encode_list(&prefs.email_addresses)?,
                encode_list(&prefs.phone_numbers)?,
                encode_list(&prefs.chat_webhooks)?,
                now,
            ],
        )?;
        Ok(())
    }
}
