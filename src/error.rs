use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::WebhookError;
use crate::generation::GenerationError;
use crate::ledger::LedgerError;
use crate::resolver::ResolveError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    IncompatibleModel(String),
    #[error("insufficient credits")]
    InsufficientCredits { required: i64, current: i64 },
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(?self);
        match self {
            AppError::InsufficientCredits { required, current } => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "insufficient credits",
                    "requiredCredits": required,
                    "currentCredits": current,
                })),
            )
                .into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            AppError::IncompatibleModel(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()).into_response()
            }
            AppError::BadGateway(_) => (StatusCode::BAD_GATEWAY, self.to_string()).into_response(),
            AppError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
            }
            // storage details stay in the log
            AppError::Db(_) | AppError::Message(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Timeout(_) => AppError::ServiceUnavailable(err.to_string()),
            LedgerError::AccountNotFound(_) => AppError::NotFound,
            LedgerError::InvalidAmount(_) => AppError::BadRequest(err.to_string()),
            LedgerError::Db(db) => AppError::Db(db),
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownModel(_) | ResolveError::TooManyImages { .. } => {
                AppError::BadRequest(err.to_string())
            }
            ResolveError::IncompatibleModel(_) => AppError::IncompatibleModel(err.to_string()),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Validation(message) => AppError::BadRequest(message),
            GenerationError::Resolve(err) => err.into(),
            GenerationError::InsufficientCredits { required, current } => {
                AppError::InsufficientCredits { required, current }
            }
            GenerationError::Ledger(err) => err.into(),
            GenerationError::Dispatch(err) => AppError::BadGateway(err.to_string()),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Unauthenticated => AppError::Unauthorized,
            WebhookError::Malformed(_) | WebhookError::UnknownProduct(_) => {
                AppError::BadRequest(err.to_string())
            }
            WebhookError::NotConfigured => AppError::ServiceUnavailable(err.to_string()),
            WebhookError::Ledger(err) => err.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
