//! Structured JSON errors for the trigger and inspection routes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::runs::execute::ExecuteError;
use crate::storage::StoreError;
use crate::telephony::TelephonyError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("telephony provider is not configured")]
    ProviderNotConfigured,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MissingDestination(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    ProviderRejected(String),

    #[error("{0}")]
    ProviderUnreachable(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::ProviderNotConfigured => "ProviderNotConfigured",
            ApiError::NotFound(_) => "NotFound",
            ApiError::MissingDestination(_) => "MissingDestination",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ProviderRejected(_) => "ProviderRejected",
            ApiError::ProviderUnreachable(_) => "ProviderUnreachable",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::ProviderNotConfigured | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MissingDestination(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ProviderRejected(_) | ApiError::ProviderUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            error!(error = %msg, "request failed");
        }
        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<ExecuteError> for ApiError {
    fn from(e: ExecuteError) -> Self {
        let message = e.to_string();
        match e {
            ExecuteError::ProviderNotConfigured => ApiError::ProviderNotConfigured,
            ExecuteError::NotFound(_) => ApiError::NotFound(message),
            ExecuteError::MissingDestination(_) => ApiError::MissingDestination(message),
            ExecuteError::ProviderRejected(_) => ApiError::ProviderRejected(message),
            ExecuteError::ProviderUnreachable(_) => ApiError::ProviderUnreachable(message),
            ExecuteError::Storage(_) => ApiError::Internal(message),
        }
    }
}

impl From<TelephonyError> for ApiError {
    fn from(e: TelephonyError) -> Self {
        let message = e.to_string();
        match e {
            TelephonyError::NotFound(_) => ApiError::NotFound(message),
            TelephonyError::ProviderUnreachable(_) => ApiError::ProviderUnreachable(message),
            TelephonyError::ProviderRejected { .. } | TelephonyError::Decode(_) => {
                ApiError::ProviderRejected(message)
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
