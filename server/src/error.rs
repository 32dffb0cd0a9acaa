//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use depot_core::error::{DepotError, ErrorKind};
use depot_core::ApiResponse;

/// Error returned by request handlers.
#[derive(Debug)]
pub enum ApiError {
    Depot(DepotError),
    /// Route requires a trusted caller
    Forbidden,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        ApiError::Depot(err)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest
        | ErrorKind::HashMismatch
        | ErrorKind::UnsupportedCompression
        | ErrorKind::ExtractionFailed => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::StorageBackend
        | ErrorKind::MissingProfiles
        | ErrorKind::IllegalCopy
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "not authorized".to_string()),
            ApiError::Depot(err) => {
                let status = status_for(err.kind());
                if status.is_server_error() {
                    tracing::error!(error = %err, "Request failed");
                } else {
                    tracing::debug!(error = %err, status = status.as_u16(), "Request rejected");
                }
                (status, err.to_string())
            }
        };
        (status, Json(ApiResponse::error(status.as_u16(), message))).into_response()
    }
}
