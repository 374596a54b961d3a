use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("learning pipeline is already running")]
    PipelineAlreadyRunning,

    #[error("daily processing limit reached ({processed}/{limit})")]
    DailyLimitReached { processed: i64, limit: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("AI provider error: {0}")]
    AiProvider(String),

    #[error("{0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("record".to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization error: {e}"))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl AppError {
    /// Errors the caller caused keep their own status and message
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition { .. } | AppError::PipelineAlreadyRunning => {
                StatusCode::CONFLICT
            }
            AppError::DailyLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::AiProvider(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(json!({
            "statusCode": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.to_string(),
        }))
    }
}

pub trait ResultExt<T> {
    /// Rewrites server-side failures as `Failed to <action>: <message>`
    fn or_fail(self, action: &str) -> AppResult<T>;
}

impl<T> ResultExt<T> for AppResult<T> {
    fn or_fail(self, action: &str) -> AppResult<T> {
        self.map_err(|e| {
            if e.is_client_error() {
                e
            } else {
                AppError::Internal(format!("Failed to {action}: {e}"))
            }
        })
    }
}
