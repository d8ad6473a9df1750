//! Notification fan-out -- email, SMS and chat delivery of run outcomes.
//!
//! A [`NotificationEvent`] is rendered per channel and handed to whichever
//! transports are both configured and enabled in the recipient's
//! [`NotificationPreference`]. Send failures stay inside the dispatcher.

pub mod dispatcher;
pub mod preferences;
pub mod render;
pub mod transport;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::dispatcher::{DispatchSummary, Dispatcher};
pub use self::preferences::PreferenceStore;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Chat,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Sms => write!(f, "sms"),
            Channel::Chat => write!(f, "chat"),
        }
    }
}

/// Per-user delivery settings. Read at dispatch time, never mutated there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreference {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub chat_enabled: bool,
    pub email_addresses: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub chat_webhooks: Vec<String>,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            chat_enabled: false,
            email_addresses: Vec::new(),
            phone_numbers: Vec::new(),
            chat_webhooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Something worth telling a user about. Built per dispatch, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    TestResult {
        test_name: String,
        passed: bool,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
        run_id: i64,
    },
    Alert {
        alert_type: String,
        severity: Severity,
        message: String,
        timestamp: DateTime<Utc>,
    },
    CampaignCompletion {
        campaign_name: String,
        total: u32,
        passed: u32,
        failed: u32,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
    Simple {
        kind: String,
        message: String,
    },
}

/// Rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, to: &str, message: &EmailMessage) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError>;
}

/// Posts to the configured team channel.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError>;
}
