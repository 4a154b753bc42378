//! API error responses.
//!
//! Maps the service error sum onto stable HTTP statuses: 400 for malformed
//! requests, 404 for unknown identifiers, 412 for slashing refusals, 500
//! for everything the client cannot fix.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::SignerError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

/// Error wrapper returned by handlers.
#[derive(Debug)]
pub struct ApiError(pub SignerError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SignerError::BadRequest(_) | SignerError::MetadataParse(_) => StatusCode::BAD_REQUEST,
            SignerError::SignerNotFound(_) => StatusCode::NOT_FOUND,
            SignerError::SlashingRejected(_) => StatusCode::PRECONDITION_FAILED,
            SignerError::Database(_)
            | SignerError::StorageFailure(_)
            | SignerError::BackendUnavailable(_)
            | SignerError::SignerUnavailable(_)
            | SignerError::KeystoreDecrypt(_)
            | SignerError::Crypto(_)
            | SignerError::Io(_)
            | SignerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SignerError> for ApiError {
    fn from(error: SignerError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
