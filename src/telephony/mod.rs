//! Telephony gateway -- outbound test calls and call inspection.
//!
//! The gateway holds no local state. Every provider failure is surfaced to the
//! caller, which owns the retry policy.

pub mod script;
pub mod twilio;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::twilio::TwilioGateway;

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("provider rejected request (HTTP {status}): {message}")]
    ProviderRejected { status: u16, message: String },

    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("call {0} not found at provider")]
    NotFound(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

/// One outbound test call. `destination` must already be canonical.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub destination: String,
    pub dtmf: Vec<String>,
    /// Ring timeout handed to the provider.
    pub timeout_secs: u32,
    pub recording_enabled: bool,
}

/// The provider accepted the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedCall {
    pub call_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetadata {
    pub call_id: String,
    pub status: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
    pub duration_secs: Option<u32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub price: Option<String>,
}

/// Provider-side voice quality for a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean opinion score, 1.0 - 5.0.
    pub mos: f64,
    pub jitter_ms: f64,
    pub packet_loss_pct: f64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRef {
    pub recording_id: String,
    pub url: String,
    pub duration_secs: Option<u32>,
    pub created_at: Option<String>,
}

/// Trait for the external voice-call API.
#[async_trait]
pub trait TelephonyGateway: Send + Sync {
    /// Place an outbound call that plays the compiled DTMF script.
    async fn place_call(&self, req: &CallRequest) -> Result<PlacedCall, TelephonyError>;

    async fn fetch_call_metadata(&self, call_id: &str) -> Result<CallMetadata, TelephonyError>;

    /// `Ok(None)` means the provider has not computed metrics yet.
    async fn fetch_quality_metrics(
        &self,
        call_id: &str,
    ) -> Result<Option<QualityMetrics>, TelephonyError>;

    async fn fetch_recordings(&self, call_id: &str) -> Result<Vec<RecordingRef>, TelephonyError>;
}

/// Normalize a dialable number to international format.
///
/// Strips everything except digits and `+`. Without a leading `+`, a
/// 10-digit number is assumed to be North American and gets `+1`.
pub fn format_phone_number(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        cleaned
    } else if cleaned.len() == 10 {
        format!("+1{cleaned}")
    } else {
        format!("+{cleaned}")
    }
}

const PER_MINUTE_USD: f64 = 0.013;
const RECORDING_PER_MINUTE_USD: f64 = 0.0025;
const TRANSCRIPTION_PER_MINUTE_USD: f64 = 0.05;

/// Approximate provider cost of a recorded and transcribed call.
/// Partial minutes are billed as whole minutes.
pub fn estimate_call_cost(duration_secs: u32) -> f64 {
    let minutes = duration_secs.div_ceil(60) as f64;
    (PER_MINUTE_USD + RECORDING_PER_MINUTE_USD + TRANSCRIPTION_PER_MINUTE_USD) * minutes
}
