use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dao::storage::StorageError,
    dto::ws::{ErrorCode, ErrorPayload},
    state::{registry::RoomPanicked, room::RoomError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without a leaderboard store.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The room refused the operation.
    #[error(transparent)]
    Room(#[from] RoomError),
    /// The membership directory rejected the user.
    #[error("user `{user_id}` is not a member of group `{group_id}`")]
    NotAMember {
        /// Group whose roster was checked.
        group_id: String,
        /// User that was refused.
        user_id: String,
    },
    /// The connection is not seated in the room the message addresses.
    #[error("connection is not in room `{0}`")]
    NotInRoom(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The room crashed while processing the operation and was torn down.
    #[error("room failure: {0}")]
    RoomFailure(#[from] RoomPanicked),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl ServiceError {
    /// Stable wire code for the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Unavailable(_) | ServiceError::Degraded => ErrorCode::ServiceUnavailable,
            ServiceError::Room(err) => err.code(),
            ServiceError::NotAMember { .. } => ErrorCode::NotAMember,
            ServiceError::NotInRoom(_) => ErrorCode::NotInRoom,
            ServiceError::NotFound(_) => ErrorCode::Internal,
            ServiceError::RoomFailure(_) => ErrorCode::RoomFailure,
        }
    }

    /// Body of the `*-error` event reporting this error.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self)
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
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
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Room(err) => AppError::Conflict(err.to_string()),
            ServiceError::NotAMember { .. } | ServiceError::NotInRoom(_) => {
                AppError::Conflict(err.to_string())
            }
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::RoomFailure(panic) => AppError::Internal(panic.to_string()),
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
