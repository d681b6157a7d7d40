use crate::types::AvailabilitySlot;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::DatabaseErrorKind;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

/// Failures of the persistence layer. These never reach HTTP callers directly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("row violates a uniqueness constraint")]
    Duplicate,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::Duplicate
            }
            other => StoreError::Database(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("slot is unavailable")]
    SlotUnavailable {
        next_available: Option<Box<AvailabilitySlot>>,
    },

    #[error("availability overlaps an existing slot")]
    SlotOverlap,

    #[error("slot belongs to a different provider than the booking")]
    ProviderMismatch,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn slot_unavailable() -> Self {
        BookingError::SlotUnavailable {
            next_available: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::SlotUnavailable { .. } => "slot_unavailable",
            BookingError::SlotOverlap => "slot_overlap",
            BookingError::ProviderMismatch => "provider_mismatch",
            BookingError::NotFound(_) => "not_found",
            BookingError::Unauthorized => "unauthorized",
            BookingError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) | BookingError::ProviderMismatch => StatusCode::BAD_REQUEST,
            BookingError::SlotUnavailable { .. } | BookingError::SlotOverlap => StatusCode::CONFLICT,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BookingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        error!(?err, "Persistence failure");
        BookingError::Internal(err.to_string())
    }
}

impl From<ValidationErrors> for BookingError {
    fn from(errors: ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

impl From<JsonRejection> for BookingError {
    fn from(rejection: JsonRejection) -> Self {
        BookingError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for BookingError {
    fn from(rejection: QueryRejection) -> Self {
        BookingError::Validation(rejection.body_text())
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // internal details stay in the logs
        let message = match &self {
            BookingError::Internal(_) => "An internal error occurred, please retry".to_string(),
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message,
        });
        if let BookingError::SlotUnavailable {
            next_available: Some(slot),
        } = &self
        {
            body["next_available"] = json!(slot);
        }

        (status, Json(body)).into_response()
    }
}
