//! Error types for the fleet manager.
//!
//! The variants split into two families the HTTP layer must never conflate:
//! authentication problems (`Unauthenticated`, `Forbidden`) that map to 4xx,
//! and provider outages (`ServiceUnavailable`) that map to 503 so callers
//! know a retry is worthwhile.

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the fleet manager.
pub type Result<T> = std::result::Result<T, Error>;

/// Fleet manager errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller token is missing, inactive, or its claims are malformed
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller is authenticated but lacks a required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Identity provider unreachable or no service credential available
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request payload failed validation
    #[error("Invalid request: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable(_) | Self::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code for the JSON body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::ServiceUnavailable(_) | Self::Http(_) => "service_unavailable",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "invalid_request",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));

        if status == StatusCode::UNAUTHORIZED {
            return (status, [("WWW-Authenticate", "Bearer")], body).into_response();
        }
        (status, body).into_response()
    }
}
