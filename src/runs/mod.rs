//! Test runs and the call-id correlation store.
//!
//! A run is created when the provider accepts a call and is keyed by the
//! provider's call id from then on. Its state only moves forward:
//! `Initiated -> Running -> {Completed | Failed}`, terminal states absorbing.

pub mod execute;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use self::store::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initiated,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Initiated => "initiated",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(RunState::Initiated),
            "running" => Ok(RunState::Running),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            other => Err(format!("unknown run state '{other}'")),
        }
    }
}

/// How a provider call status moves a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Call still in flight; the run is Running.
    InProgress,
    /// Call over; the run lands in the given terminal state.
    Terminal(RunState),
}

/// Classify a provider call status. Only `completed` counts as success;
/// every other terminal or unrecognized status fails the run.
pub fn classify_status(provider_status: &str) -> StatusClass {
    match provider_status.trim().to_ascii_lowercase().as_str() {
        "queued" | "initiated" | "ringing" | "in-progress" => StatusClass::InProgress,
        "completed" => StatusClass::Terminal(RunState::Completed),
        _ => StatusClass::Terminal(RunState::Failed),
    }
}

/// One attempt to execute a test case over a real call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,
    pub test_case_id: i64,
    pub campaign_id: Option<i64>,
    /// User who triggered the run, when identity was verified.
    pub requested_by: Option<i64>,
    /// Provider call id, absent until the gateway accepted the call.
    pub call_id: Option<String>,
    pub state: RunState,
    /// Last terminal status reported by the provider.
    pub provider_status: Option<String>,
    pub initiated_at: String,
    pub finished_at: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub call_duration_ms: Option<i64>,
    pub estimated_cost_usd: Option<f64>,
    pub voice_quality_score: Option<f64>,
    pub audio_clarity_score: Option<f64>,
    pub dtmf_recognition_rate: Option<f64>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub call_flow_path: Option<Vec<String>>,
}

/// Fields known when a run is created.
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub test_case_id: i64,
    pub campaign_id: Option<i64>,
    pub requested_by: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub call_flow_path: Vec<String>,
}

/// Write-once quality scores. `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityUpdate {
    pub voice_quality_score: Option<f64>,
    pub audio_clarity_score: Option<f64>,
    pub dtmf_recognition_rate: Option<f64>,
}

/// An auxiliary measurement attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

impl RunMetric {
    pub fn new(name: &str, value: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }
    }
}
