//! Authentication and role-gate middleware.
//!
//! `auth_middleware` validates the bearer token on every request it wraps
//! and stashes the resulting [`CallerIdentity`] as a request extension.
//! `require_admin` runs after it and enforces the `admin` realm role.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::validator::{CallerIdentity, TokenValidator};
use crate::Error;

/// Roles allowed through the admin gate.
const ADMIN_ROLES: &[&str] = &["admin"];

/// Validate the request's bearer token and inject the caller identity.
pub async fn auth_middleware(
    State(validator): State<Arc<TokenValidator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        });

    let Some(token) = token else {
        warn!(path = %path, "Missing or malformed Authorization header");
        return Error::Unauthenticated(
            "Missing Authorization header. Use: Authorization: Bearer <token>".to_string(),
        )
        .into_response();
    };

    match validator.validate(token).await {
        Ok(identity) => {
            debug!(subject = %identity.subject, path = %path, "Authenticated request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Token validation failed");
            e.into_response()
        }
    }
}

/// Grant only callers holding at least one admin role.
///
/// Must run after [`auth_middleware`]; a missing identity extension means
/// the router was assembled wrong and is reported as an internal error.
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    let Some(identity) = request.extensions().get::<CallerIdentity>() else {
        return Error::Internal("caller identity missing from request".to_string())
            .into_response();
    };

    if identity.has_any_role(ADMIN_ROLES) {
        next.run(request).await
    } else {
        warn!(subject = %identity.subject, "Admin access denied");
        Error::Forbidden("insufficient roles".to_string()).into_response()
    }
}
