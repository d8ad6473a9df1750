//! Callback reconciliation.
//!
//! The provider delivers status, recording and transcription callbacks at
//! least once and in any order. Each handler looks the run up by call id and
//! applies a write-once or forward-only update, so replays and reorderings
//! converge on the same row. Slow follow-up work (quality enrichment and
//! completion notifications) is detached from the callback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cases::TestCaseStore;
use crate::notify::{Dispatcher, NotificationEvent, PreferenceStore};
use crate::runs::{classify_status, QualityUpdate, RunMetric, RunState, RunStore, StatusClass};
use crate::storage::StoreError;
use crate::telephony::{estimate_call_cost, TelephonyGateway};

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    pub call_id: String,
    pub provider_status: String,
    pub duration_secs: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingEvent {
    pub call_id: String,
    pub recording_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionEvent {
    pub call_id: String,
    pub transcript: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// No run owns the call id.
    Discarded,
    /// Non-terminal status; the run is (now) running.
    Progressed,
    /// This callback moved the run into a terminal state.
    Finished(RunState),
    /// The run was terminal before this callback arrived.
    AlreadyTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Discarded,
    Applied,
    /// The field was already populated; the callback was a replay.
    Duplicate,
}

/// Convert a 1.0-5.0 mean opinion score to the 0-100 voice quality scale.
pub fn mos_to_score(mos: f64) -> f64 {
    ((mos * 20.0 * 100.0).round() / 100.0).clamp(0.0, 100.0)
}

/// Who gets told when a run finishes.
#[derive(Clone)]
pub struct CompletionNotifier {
    pub dispatcher: Arc<Dispatcher>,
    pub preferences: PreferenceStore,
    pub cases: TestCaseStore,
}

#[derive(Clone)]
pub struct Reconciler {
    runs: RunStore,
    gateway: Option<Arc<dyn TelephonyGateway>>,
    notifier: Option<CompletionNotifier>,
    quality_delay: Duration,
}

impl Reconciler {
    pub fn new(
        runs: RunStore,
        gateway: Option<Arc<dyn TelephonyGateway>>,
        quality_delay: Duration,
    ) -> Self {
        Self {
            runs,
            gateway,
            notifier: None,
            quality_delay,
        }
    }

    pub fn with_notifier(mut self, notifier: CompletionNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn on_status(&self, ev: &StatusEvent) -> Result<StatusOutcome, StoreError> {
        let Some(run) = self.runs.lookup(&ev.call_id)? else {
            warn!(call_id = %ev.call_id, status = %ev.provider_status, "status for unknown call, discarding");
            return Ok(StatusOutcome::Discarded);
        };
        if run.state.is_terminal() {
            debug!(run_id = run.id, call_id = %ev.call_id, "run already terminal");
            return Ok(StatusOutcome::AlreadyTerminal);
        }

        self.runs.mark_running(run.id)?;
        let terminal = match classify_status(&ev.provider_status) {
            StatusClass::InProgress => {
                debug!(run_id = run.id, status = %ev.provider_status, "call in progress");
                return Ok(StatusOutcome::Progressed);
            }
            StatusClass::Terminal(state) => state,
        };

        let secs = ev.duration_secs.unwrap_or(0);
        let finished = self.runs.finish(
            run.id,
            terminal,
            &ev.provider_status,
            i64::from(secs) * 1000,
            estimate_call_cost(secs),
        )?;
        if !finished {
            // A concurrent callback won the transition.
            return Ok(StatusOutcome::AlreadyTerminal);
        }

        info!(
            run_id = run.id,
            call_id = %ev.call_id,
            state = %terminal,
            duration_secs = secs,
            "run finished"
        );
        if terminal == RunState::Completed {
            self.spawn_quality_enrichment(run.id, ev.call_id.clone());
        }
        self.spawn_notification(run.id);
        Ok(StatusOutcome::Finished(terminal))
    }

    pub async fn on_recording(&self, ev: &RecordingEvent) -> Result<ArtifactOutcome, StoreError> {
        let Some(run) = self.runs.lookup(&ev.call_id)? else {
            warn!(call_id = %ev.call_id, "recording for unknown call, discarding");
            return Ok(ArtifactOutcome::Discarded);
        };
        if self.runs.set_recording_url(run.id, &ev.recording_url)? {
            info!(run_id = run.id, "recording attached");
            Ok(ArtifactOutcome::Applied)
        } else {
            Ok(ArtifactOutcome::Duplicate)
        }
    }

    pub async fn on_transcription(
        &self,
        ev: &TranscriptionEvent,
    ) -> Result<ArtifactOutcome, StoreError> {
        let Some(run) = self.runs.lookup(&ev.call_id)? else {
            warn!(call_id = %ev.call_id, "transcription for unknown call, discarding");
            return Ok(ArtifactOutcome::Discarded);
        };
        if self.runs.set_transcript(run.id, &ev.transcript)? {
            info!(run_id = run.id, chars = ev.transcript.len(), "transcript attached");
            Ok(ArtifactOutcome::Applied)
        } else {
            Ok(ArtifactOutcome::Duplicate)
        }
    }

    fn spawn_quality_enrichment(&self, run_id: i64, call_id: String) {
        if self.gateway.is_none() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.quality_delay).await;
            this.enrich_quality(run_id, &call_id).await;
        });
    }

    /// One best-effort quality poll. Never touches the run state.
    pub async fn enrich_quality(&self, run_id: i64, call_id: &str) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let metrics = match gateway.fetch_quality_metrics(call_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                info!(run_id, %call_id, "quality metrics not ready, giving up");
                return;
            }
            Err(e) => {
                warn!(run_id, %call_id, error = %e, "quality metrics fetch failed");
                return;
            }
        };

        let score = mos_to_score(metrics.mos);
        let update = QualityUpdate {
            voice_quality_score: Some(score),
            ..QualityUpdate::default()
        };
        let extra = [
            RunMetric::new("mos_score", metrics.mos, "score"),
            RunMetric::new("latency", metrics.latency_ms, "ms"),
            RunMetric::new("jitter", metrics.jitter_ms, "ms"),
            RunMetric::new("packet_loss", metrics.packet_loss_pct, "percent"),
        ];
        // Metrics first, so a visible score implies the metrics are there too.
        let stored = self
            .runs
            .record_metrics(run_id, &extra)
            .and_then(|_| self.runs.set_quality(run_id, &update));
        match stored {
            Ok(_) => info!(run_id, mos = metrics.mos, score, "quality metrics stored"),
            Err(e) => warn!(run_id, error = %e, "failed to store quality metrics"),
        }
    }

    fn spawn_notification(&self, run_id: i64) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let runs = self.runs.clone();
        tokio::spawn(async move {
            if let Err(e) = notify_finished(&notifier, &runs, run_id).await {
                warn!(run_id, error = %e, "could not prepare completion notification");
            }
        });
    }
}

async fn notify_finished(
    notifier: &CompletionNotifier,
    runs: &RunStore,
    run_id: i64,
) -> Result<(), StoreError> {
    let run = runs.get(run_id)?.ok_or(StoreError::RunNotFound(run_id))?;
    let case = notifier.cases.get(run.test_case_id)?;

    let Some(user_id) = run
        .requested_by
        .or_else(|| case.as_ref().and_then(|c| c.owner_id))
    else {
        debug!(run_id, "no recipient for run, skipping notification");
        return Ok(());
    };

    let prefs = notifier.preferences.get(user_id)?;
    let event = NotificationEvent::TestResult {
        test_name: case
            .map(|c| c.name)
            .unwrap_or_else(|| format!("Test case {}", run.test_case_id)),
        passed: run.state == RunState::Completed,
        duration_ms: run.call_duration_ms.unwrap_or(0),
        timestamp: Utc::now(),
        run_id,
    };
    notifier.dispatcher.dispatch(&event, &prefs).await;
    Ok(())
}
