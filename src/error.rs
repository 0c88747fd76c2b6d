use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Oracle-related errors
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle not registered: {0}")]
    NotFound(String),

    #[error("Oracle call failed for {oracle_id}: {message}")]
    CallFailed { oracle_id: String, message: String },

    #[error("Oracle call timed out for {0}")]
    Timeout(String),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

/// Resolution job life-cycle errors
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Schedule deadline is in the past: {0}")]
    DeadlinePassed(chrono::DateTime<chrono::Utc>),
}

/// Inbound webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("No webhook secret configured for oracle: {0}")]
    UnknownOracle(String),

    #[error("Invalid webhook signature from {0}")]
    InvalidSignature(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Resolution(ResolutionError::JobNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "JOB_NOT_FOUND",
                format!("Job not found: {}", id),
                None,
            ),
            AppError::Resolution(ResolutionError::CampaignNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "CAMPAIGN_NOT_FOUND",
                format!("Campaign not found: {}", id),
                Some(serde_json::json!({"campaign_id": id})),
            ),
            AppError::Resolution(ResolutionError::DeadlinePassed(deadline)) => (
                StatusCode::BAD_REQUEST,
                "DEADLINE_PASSED",
                format!("Schedule deadline is in the past: {}", deadline),
                None,
            ),
            AppError::Oracle(OracleError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "ORACLE_NOT_FOUND",
                format!("Oracle not registered: {}", id),
                Some(serde_json::json!({"oracle_id": id})),
            ),
            AppError::Oracle(OracleError::Timeout(id)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "ORACLE_TIMEOUT",
                format!("Oracle call timed out for {}", id),
                Some(serde_json::json!({"oracle_id": id})),
            ),
            AppError::Webhook(WebhookError::InvalidSignature(oracle_id)) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                "Webhook signature verification failed".to_string(),
                Some(serde_json::json!({"oracle_id": oracle_id})),
            ),
            AppError::Webhook(WebhookError::UnknownOracle(oracle_id)) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_ORACLE",
                format!("No webhook secret configured for oracle: {}", oracle_id),
                None,
            ),
            AppError::Webhook(WebhookError::MalformedPayload(msg)) => (
                StatusCode::BAD_REQUEST,
                "MALFORMED_PAYLOAD",
                format!("Malformed webhook payload: {}", msg),
                None,
            ),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, None),
            AppError::InvalidAmount(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                format!("Invalid amount: {}", msg),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Oracle(OracleError::CallFailed {
            oracle_id: "api".to_string(),
            message: format!("HTTP request error: {:?}", error),
        })
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
