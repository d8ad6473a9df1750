//! Trigger path: place a real call for a test case and open its run.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};

use super::{NewRun, RunStore};
use crate::cases::TestCaseStore;
use crate::storage::StoreError;
use crate::telephony::{format_phone_number, CallRequest, TelephonyError, TelephonyGateway};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("telephony provider is not configured")]
    ProviderNotConfigured,

    #[error("test case {0} not found")]
    NotFound(i64),

    #[error("test case {0} has no destination number")]
    MissingDestination(i64),

    #[error("provider rejected the call: {0}")]
    ProviderRejected(String),

    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<TelephonyError> for ExecuteError {
    fn from(e: TelephonyError) -> Self {
        match e {
            TelephonyError::ProviderUnreachable(m) => ExecuteError::ProviderUnreachable(m),
            other => ExecuteError::ProviderRejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExecuteOutcome {
    pub call_id: String,
    pub run_id: i64,
}

/// Places test calls and registers the resulting runs.
pub struct Executor {
    cases: TestCaseStore,
    runs: RunStore,
    gateway: Option<Arc<dyn TelephonyGateway>>,
    default_timeout_secs: u32,
}

impl Executor {
    pub fn new(
        cases: TestCaseStore,
        runs: RunStore,
        gateway: Option<Arc<dyn TelephonyGateway>>,
        default_timeout_secs: u32,
    ) -> Self {
        Self {
            cases,
            runs,
            gateway,
            default_timeout_secs,
        }
    }

    /// Run test case `test_case_id` over a real call. Provider failures are
    /// returned as-is; retrying is up to the caller.
    pub async fn execute_real(
        &self,
        test_case_id: i64,
        requested_by: Option<i64>,
    ) -> Result<ExecuteOutcome, ExecuteError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or(ExecuteError::ProviderNotConfigured)?;

        let case = self
            .cases
            .get(test_case_id)?
            .ok_or(ExecuteError::NotFound(test_case_id))?;

        let destination = case
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(format_phone_number)
            .ok_or(ExecuteError::MissingDestination(test_case_id))?;

        let req = CallRequest {
            destination,
            dtmf: case.dtmf_inputs.clone(),
            timeout_secs: case.timeout_seconds.unwrap_or(self.default_timeout_secs),
            recording_enabled: true,
        };

        let started = Instant::now();
        let placed = match gateway.place_call(&req).await {
            Ok(p) => p,
            Err(e) => {
                warn!(test_case_id, error = %e, "call placement failed");
                return Err(e.into());
            }
        };
        let execution_time_ms = started.elapsed().as_millis() as i64;

        let mut path = Vec::with_capacity(req.dtmf.len() + 1);
        path.push(format!("dial:{}", req.destination));
        path.extend(req.dtmf.iter().map(|d| format!("dtmf:{d}")));

        let new_run = NewRun {
            test_case_id,
            campaign_id: case.campaign_id,
            requested_by,
            execution_time_ms: Some(execution_time_ms),
            call_flow_path: path,
        };
        let run_id = match self.runs.open(&new_run, &placed.call_id) {
            Ok(id) => id,
            Err(e) => {
                error!(test_case_id, call_id = %placed.call_id, error = %e, "failed to correlate accepted call");
                return Err(e.into());
            }
        };

        info!(
            test_case_id,
            run_id,
            call_id = %placed.call_id,
            status = %placed.status,
            execution_time_ms,
            "real call initiated"
        );
        Ok(ExecuteOutcome {
            call_id: placed.call_id,
            run_id,
        })
    }
}
