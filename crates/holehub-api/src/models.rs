//! Mapping of control plane errors onto HTTP responses

use axum::{http::StatusCode, Json};
use holehub_cert::CertificateError;
use holehub_control::ControlError;
use holehub_proto::{ErrorCode, ErrorResponse};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::Validation(_) | ControlError::EmailFormat(_) => StatusCode::BAD_REQUEST,
        ControlError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ControlError::Forbidden { .. } => StatusCode::FORBIDDEN,
        ControlError::UserNotFound(_) | ControlError::HoleNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::UserExists(_)
        | ControlError::EmailExists(_)
        | ControlError::NameConflict(_)
        | ControlError::InvalidState(_) => StatusCode::CONFLICT,
        ControlError::Certificate(CertificateError::Read { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            StatusCode::NOT_FOUND
        }
        ControlError::Certificate(CertificateError::MissingCa(_)) => StatusCode::NOT_FOUND,
        ControlError::PortsExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ControlError::Certificate(_)
        | ControlError::Process(_)
        | ControlError::Store(_)
        | ControlError::Password(_)
        | ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a control plane error into the structured error body
pub fn api_error(err: ControlError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    // Internal details stay in the log
    let message = match err.code() {
        ErrorCode::Internal => "Internal server error".to_string(),
        _ => err.to_string(),
    };
    let mut body = ErrorResponse::new(err.code(), message);
    if let Some(suggestion) = err.suggestion() {
        body = body.with_suggestion(suggestion);
    }
    (status, Json(body))
}
