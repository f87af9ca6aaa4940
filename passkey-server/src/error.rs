//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::CeremonyError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Ceremony error - error from the passkey engine
    #[error("Ceremony error: {0}")]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ceremony(ref e) => match e {
                CeremonyError::InvalidArgument(_) | CeremonyError::InvalidSession => {
                    StatusCode::BAD_REQUEST
                }
                CeremonyError::NotFound(_) => StatusCode::NOT_FOUND,
                CeremonyError::VerificationFailed => StatusCode::UNAUTHORIZED,
                CeremonyError::Conflict(_) => StatusCode::CONFLICT,
                CeremonyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Ceremony(ref e) => match e {
                CeremonyError::InvalidArgument(_) => "INVALID_INPUT",
                CeremonyError::NotFound(_) => "NOT_FOUND",
                CeremonyError::InvalidSession => "INVALID_SESSION",
                CeremonyError::VerificationFailed => "VERIFICATION_FAILED",
                CeremonyError::Conflict(_) => "CONFLICT",
                CeremonyError::Internal(_) => "INTERNAL_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Ceremony(ref e) => match e {
                CeremonyError::InvalidArgument(msg) => msg.clone(),
                CeremonyError::NotFound(msg) => format!("Not found: {}", msg),
                CeremonyError::InvalidSession => "Invalid or expired session".to_string(),
                CeremonyError::VerificationFailed => "Passkey verification failed".to_string(),
                CeremonyError::Conflict(_) => "Credential is already registered".to_string(),
                CeremonyError::Internal(_) => "Internal server error".to_string(),
            },
            Self::BadRequest(_) => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
            Self::Ceremony(ref e) => e.kind(),
        }
    }
}

/// Unparseable or mistyped request bodies are caller errors
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Authentication error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceremony_error_mapping() {
        let cases = [
            (
                CeremonyError::InvalidArgument("bad".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
            ),
            (
                CeremonyError::NotFound("user alice".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                CeremonyError::InvalidSession,
                StatusCode::BAD_REQUEST,
                "INVALID_SESSION",
            ),
            (
                CeremonyError::VerificationFailed,
                StatusCode::UNAUTHORIZED,
                "VERIFICATION_FAILED",
            ),
            (
                CeremonyError::Conflict("dup".into()),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                CeremonyError::Internal("db down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn test_bad_request_is_invalid_input() {
        let api = ApiError::BadRequest("missing field `username`".into());
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(api.error_code(), "INVALID_INPUT");
        assert!(api.client_message().contains("username"));
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let api: ApiError = CeremonyError::Internal("connection refused at 10.0.0.3".into()).into();
        assert_eq!(api.client_message(), "Internal server error");
        assert!(api.to_string().contains("10.0.0.3"));
    }
}
