use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// ApiError
///
/// The single error type flowing out of policy checks, validation, and the
/// repository. Every variant maps to one HTTP status class; none of them is
/// fatal to the process. Storage faults are logged server-side and never
/// leaked to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or out-of-range input (future year, score outside 0..=10,
    /// reserved username). Reported to the caller, never retried.
    #[error("{0}")]
    Validation(String),

    /// Confirmation code did not match the one derivable from the username.
    /// Deliberately a 400, mirroring the signup flow it belongs to.
    #[error("invalid confirmation code")]
    BadConfirmationCode,

    /// No usable credentials on a request that requires them.
    #[error("authentication required")]
    Unauthorized,

    /// Policy engine denial. Carries no detail about which check failed.
    #[error("permission denied")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness constraint violated (duplicate review, duplicate
    /// username/email). The store is the serialization point; the second
    /// committer of a conflicting write lands here.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Faults in our own machinery (token signing, serialization). Logged,
    /// reported as an opaque 500.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// Translates a storage-layer failure into the request-level error kind.
    /// Unique violations become conflicts, check violations become validation
    /// errors; anything else stays an opaque database fault.
    pub fn from_db(err: sqlx::Error, conflict: &str) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return ApiError::Conflict(conflict.to_string());
            }
            if db_err.is_check_violation() {
                return ApiError::Validation(format!("constraint violated: {conflict}"));
            }
        }
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::BadConfirmationCode => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Database(err) => {
                tracing::error!("database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
