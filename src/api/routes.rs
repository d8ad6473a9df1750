//! API route definitions.

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::auth::{bearer_token, UserId};
use crate::notify::NotificationPreference;
use crate::reconcile::{RecordingEvent, StatusEvent, TranscriptionEvent};
use crate::telephony::script::{compile, parse_dtmf_param};

/// Acknowledgement body for every provider callback.
const ACK: &str = "OK";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/test-runs/{id}", get(get_run))
        .route("/test-runs/{id}/execute-real", post(execute_real))
        .route("/telephony/script", get(script))
        .route("/telephony/status", post(status_callback))
        .route("/telephony/recording", post(recording_callback))
        .route("/telephony/transcription", post(transcription_callback))
        .route("/telephony/configured", get(configured))
        .route("/telephony/calls/{call_id}", get(call_details))
        .route("/telephony/calls/{call_id}/recordings", get(call_recordings))
        .route(
            "/notification-preferences",
            get(get_preferences).put(put_preferences),
        )
}

/// Resolve the caller. Without a verifier every caller is anonymous.
fn caller(state: &AppState, headers: &HeaderMap) -> Result<Option<UserId>, ApiError> {
    let Some(verifier) = &state.verifier else {
        return Ok(None);
    };
    bearer_token(headers)
        .and_then(|t| verifier.verify(t))
        .map(Some)
        .ok_or(ApiError::Unauthorized)
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn execute_real(
    State(state): State<AppState>,
    Path(test_case_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let requested_by = caller(&state, &headers)?;
    let out = state
        .executor
        .execute_real(test_case_id, requested_by)
        .await?;
    Ok(Json(json!({
        "success": true,
        "callId": out.call_id,
        "runId": out.run_id,
    })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .runs
        .get(run_id)?
        .ok_or_else(|| ApiError::NotFound(format!("test run {run_id} not found")))?;
    let metrics = state.runs.metrics(run_id)?;
    Ok(Json(json!({ "success": true, "data": run, "metrics": metrics })))
}

// ---------------------------------------------------------------------------
// Provider callbacks
//
// Field names follow the provider's form encoding; the camelCase aliases
// accept the neutral names too. Every callback is acknowledged with 200,
// whatever happens downstream.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusForm {
    #[serde(rename = "CallSid", alias = "callId")]
    call_id: String,
    #[serde(rename = "CallStatus", alias = "providerStatus")]
    call_status: String,
    #[serde(rename = "CallDuration", alias = "durationSeconds", default)]
    call_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordingForm {
    #[serde(rename = "CallSid", alias = "callId")]
    call_id: String,
    #[serde(rename = "RecordingUrl", alias = "recordingUrl")]
    recording_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionForm {
    #[serde(rename = "CallSid", alias = "callId")]
    call_id: String,
    #[serde(rename = "TranscriptionText", alias = "transcriptText")]
    transcript: String,
}

async fn status_callback(
    State(state): State<AppState>,
    form: Result<Form<StatusForm>, FormRejection>,
) -> &'static str {
    let Form(form) = match form {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed status callback");
            return ACK;
        }
    };
    let event = StatusEvent {
        call_id: form.call_id,
        provider_status: form.call_status,
        duration_secs: form
            .call_duration
            .as_deref()
            .and_then(|d| d.trim().parse().ok()),
    };
    if let Err(e) = state.reconciler.on_status(&event).await {
        error!(call_id = %event.call_id, error = %e, "status callback not applied");
    }
    ACK
}

async fn recording_callback(
    State(state): State<AppState>,
    form: Result<Form<RecordingForm>, FormRejection>,
) -> &'static str {
    let Form(form) = match form {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed recording callback");
            return ACK;
        }
    };
    let event = RecordingEvent {
        call_id: form.call_id,
        recording_url: form.recording_url,
    };
    if let Err(e) = state.reconciler.on_recording(&event).await {
        error!(call_id = %event.call_id, error = %e, "recording callback not applied");
    }
    ACK
}

async fn transcription_callback(
    State(state): State<AppState>,
    form: Result<Form<TranscriptionForm>, FormRejection>,
) -> &'static str {
    let Form(form) = match form {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed transcription callback");
            return ACK;
        }
    };
    let event = TranscriptionEvent {
        call_id: form.call_id,
        transcript: form.transcript,
    };
    if let Err(e) = state.reconciler.on_transcription(&event).await {
        error!(call_id = %event.call_id, error = %e, "transcription callback not applied");
    }
    ACK
}

// ---------------------------------------------------------------------------
// Script and call inspection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScriptQuery {
    dtmf: Option<String>,
    record: Option<String>,
}

async fn script(Query(q): Query<ScriptQuery>) -> Response {
    let digits = match parse_dtmf_param(q.dtmf.as_deref()) {
        Ok(d) => d,
        Err(e) => return ApiError::BadRequest(e.to_string()).into_response(),
    };
    let recording = q.record.as_deref() != Some("false");
    (
        [(header::CONTENT_TYPE, "application/xml")],
        compile(&digits, recording).to_xml(),
    )
        .into_response()
}

async fn configured(State(state): State<AppState>) -> Json<Value> {
    let configured = state.gateway.is_some();
    let message = if configured {
        "Telephony provider is configured and ready"
    } else {
        "Telephony provider is not configured"
    };
    Json(json!({
        "success": true,
        "configured": configured,
        "message": message,
    }))
}

async fn call_details(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let gateway = state.gateway.as_ref().ok_or(ApiError::ProviderNotConfigured)?;
    let meta = gateway.fetch_call_metadata(&call_id).await?;
    Ok(Json(json!({ "success": true, "data": meta })))
}

async fn call_recordings(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let gateway = state.gateway.as_ref().ok_or(ApiError::ProviderNotConfigured)?;
    let recordings = gateway.fetch_recordings(&call_id).await?;
    Ok(Json(json!({ "success": true, "data": recordings })))
}

// ---------------------------------------------------------------------------
// Notification preferences
// ---------------------------------------------------------------------------

/// Preferences are per user, so these routes need a verified caller.
fn require_user(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    caller(state, headers)?.ok_or(ApiError::Unauthorized)
}

async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers)?;
    let prefs = state.preferences.get(user)?;
    Ok(Json(json!({ "success": true, "data": prefs })))
}

async fn put_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(prefs): Json<NotificationPreference>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, &headers)?;
    state.preferences.put(user, &prefs)?;
    Ok(Json(json!({ "success": true, "data": prefs })))
}
