use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{claims::ClaimError, encounter::EncounterError, player::PlayerError},
};

/// Reason returned when an action targets a boss that is not alive.
pub const TARGET_DEFEATED: &str = "target already defeated";

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input rejected at the boundary; nothing was applied.
    #[error("{0}")]
    Validation(String),
    /// The action does not fit the current state (dead boss, double claim, ...).
    #[error("{0}")]
    StateConflict(String),
    /// Storage backend failure.
    #[error("storage unavailable")]
    Persistence(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// A mutation would have broken an encounter invariant and was discarded.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { key, .. } => {
                ServiceError::StateConflict(format!("`{key}` already exists"))
            }
            other => ServiceError::Persistence(other),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::Validation(format!("validation failed: {err}"))
    }
}

impl From<ClaimError> for ServiceError {
    fn from(err: ClaimError) -> Self {
        ServiceError::StateConflict(err.to_string())
    }
}

impl From<PlayerError> for ServiceError {
    fn from(err: PlayerError) -> Self {
        ServiceError::StateConflict(err.to_string())
    }
}

impl From<EncounterError> for ServiceError {
    fn from(err: EncounterError) -> Self {
        match err {
            EncounterError::KillAlreadyResolved(_) | EncounterError::NotKilled(_) => {
                ServiceError::InvariantViolation(err.to_string())
            }
            EncounterError::NotRespawning
            | EncounterError::RespawnNotDue(_)
            | EncounterError::Finished => ServiceError::StateConflict(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("{0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("{0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::StateConflict(message) => AppError::Conflict(message),
            ServiceError::Persistence(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvariantViolation(message) => AppError::Internal(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_keep_their_user_facing_reason() {
        let err: ServiceError = ClaimError::InProgress { key: "k".into() }.into();
        let app: AppError = err.into();
        assert!(matches!(&app, AppError::Conflict(message) if message == "already being processed"));
        assert_eq!(app.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn storage_conflicts_are_state_conflicts() {
        let err: ServiceError = StorageError::conflict("reward_grants", "a:1").into();
        assert!(matches!(err, ServiceError::StateConflict(_)));
    }

    #[test]
    fn degraded_maps_to_service_unavailable() {
        let app: AppError = ServiceError::Degraded.into();
        assert_eq!(app.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
