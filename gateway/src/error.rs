//! Error types for gateway handlers.
//!
//! Bridges the domain error taxonomy to HTTP responses, implementing Axum's
//! `IntoResponse` so handlers can return `Result<_, AppError>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fundflow_core::DomainError;
use serde::Serialize;
use std::fmt;

/// Application error type for gateway handlers.
///
/// Carries the HTTP status, a client-facing message, and a stable error code
/// clients can branch on. Internal errors keep their source chain for
/// logging without exposing it to callers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code.
    status: StatusCode,
    /// Error message (user-facing).
    message: String,
    /// Error code (for client error handling).
    code: String,
    /// Internal error (for logging, not exposed to client).
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach a source error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// Create a 401 Unauthorized error with a specific code.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), code.into())
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error; the client may retry with the
    /// same idempotency key.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidRequest(message) => Self::bad_request(message),
            DomainError::Unauthenticated => {
                Self::unauthorized("Missing or malformed Authorization header", "UNAUTHENTICATED")
            },
            DomainError::TokenExpired => Self::unauthorized(
                "Your session has expired. Please login again or refresh your token.",
                "TOKEN_EXPIRED",
            ),
            DomainError::TokenInvalid => {
                Self::unauthorized("The provided token is malformed or invalid", "TOKEN_INVALID")
            },
            DomainError::UpstreamUnavailable(reason) => {
                Self::unavailable("Failed to process donation. Please try again later.")
                    .with_source(anyhow::anyhow!("upstream unavailable: {reason}"))
            },
            // Settlement errors never surface through the gateway; if one
            // does, it is a bug worth a 500 with the chain intact.
            other @ (DomainError::AccountNotProvisioned { .. }
            | DomainError::InsufficientBalance { .. }) => {
                Self::internal("An internal error occurred").with_source(other.into())
            },
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = AppError::bad_request("Invalid amount");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid amount");
    }

    #[test]
    fn domain_validation_maps_to_400() {
        let err: AppError = DomainError::InvalidRequest("invalid amount".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn expired_token_maps_to_401_with_specific_code() {
        let err: AppError = DomainError::TokenExpired.into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(err.to_string().starts_with("[TOKEN_EXPIRED]"));
    }

    #[test]
    fn upstream_unavailable_maps_to_503() {
        let err: AppError = DomainError::UpstreamUnavailable("kafka down".to_string()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
