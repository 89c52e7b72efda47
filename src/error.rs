use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Transport-agnostic error kind, stable across the whole crate. The HTTP
/// layer is the only place that knows about status codes; every component
/// below it returns one of these (usually wrapped in a component-local
/// error enum that carries more context and converts via `From`).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Stable machine-readable code per §7 of the error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            AppError::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            AppError::VerificationFailed(_) => "VERIFICATION_FAILED",
            AppError::Expired(_) => "EXPIRED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Upstream(_) => "UPSTREAM",
            AppError::Database(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::AlreadyProcessed(_) => StatusCode::CONFLICT,
            AppError::VerificationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Expired(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retriable per §7: `Upstream` and `Conflict` only.
    pub fn retriable(&self) -> bool {
        matches!(self, AppError::Upstream(_) | AppError::Conflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "detail": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
