//! Per-request token validation.
//!
//! # Pipeline
//!
//! 1. Ensure a service credential exists (cache read, with a synchronous
//!    login fallback before the first scheduled acquisition lands).
//! 2. Introspect the caller's token — inactive means `Unauthenticated`, and
//!    the claims are never decoded.
//! 3. Decode the claims; a missing or ill-typed `sub` is `Unauthenticated`.
//! 4. Extract `realm_access.roles` tolerantly — a token without the claim
//!    simply carries no roles, which is valid (it just fails every role
//!    check downstream).
//!
//! Provider transport failures anywhere in the pipeline surface as
//! `ServiceUnavailable`, never as an authentication verdict.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::credentials::CredentialStore;
use super::provider::{Claims, IdentityProvider, ProviderError};
use crate::config::KeycloakConfig;
use crate::{Error, Result};

/// The authorization-relevant identity of a caller, extracted from a
/// validated token. Lives for the duration of one request.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Stable, opaque subject identifier (the `sub` claim).
    pub subject: String,
    /// Realm-level role names. May be empty.
    pub roles: Vec<String>,
}

impl CallerIdentity {
    /// `true` if the caller holds at least one of `required` (logical OR,
    /// exact string match, no hierarchy or wildcards).
    #[must_use]
    pub fn has_any_role(&self, required: &[&str]) -> bool {
        required
            .iter()
            .any(|needed| self.roles.iter().any(|held| held == needed))
    }
}

/// Validates caller tokens against the identity provider.
pub struct TokenValidator {
    provider: Arc<dyn IdentityProvider>,
    credentials: Arc<CredentialStore>,
    config: KeycloakConfig,
}

impl TokenValidator {
    /// Create a validator sharing the given provider and credential store.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        credentials: Arc<CredentialStore>,
        config: KeycloakConfig,
    ) -> Self {
        Self {
            provider,
            credentials,
            config,
        }
    }

    /// Validate a caller's bearer token and return its identity.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthenticated`] if the token is inactive or its claims
    ///   are malformed.
    /// - [`Error::ServiceUnavailable`] if the provider is unreachable or no
    ///   service credential can be obtained.
    pub async fn validate(&self, token: &str) -> Result<CallerIdentity> {
        // Introspection requires the service to be in good standing with the
        // provider; make sure a credential exists before spending a round
        // trip on the caller's token.
        self.credentials
            .get_or_login(self.provider.as_ref(), &self.config)
            .await?;

        let active = self
            .provider
            .introspect(
                token,
                &self.config.frontend_client_id,
                &self.config.admin_client_secret,
                &self.config.realm,
            )
            .await
            .map_err(provider_outage)?;

        if !active {
            debug!("Introspection reported token inactive");
            return Err(Error::Unauthenticated("token is not active".to_string()));
        }

        let claims = self
            .provider
            .decode(token, &self.config.realm)
            .await
            .map_err(|e| match e {
                ProviderError::MalformedToken(msg) => {
                    warn!(error = %msg, "Active token failed to decode");
                    Error::Unauthenticated(format!("token claims malformed: {msg}"))
                }
                other => provider_outage(other),
            })?;

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Unauthenticated("subject claim missing".to_string()))?
            .to_string();

        let roles = extract_realm_roles(&claims);

        debug!(subject = %subject, roles = roles.len(), "Token validated");
        Ok(CallerIdentity { subject, roles })
    }
}

/// Map a provider error to the retryable server-error class.
fn provider_outage(e: ProviderError) -> Error {
    Error::ServiceUnavailable(format!("identity provider error: {e}"))
}

/// Pull the realm-level role list out of a claim map.
///
/// Missing `realm_access`, missing `roles`, or non-string entries all
/// degrade to "fewer roles", never to an error.
fn extract_realm_roles(claims: &Claims) -> Vec<String> {
    claims
        .get("realm_access")
        .and_then(Value::as_object)
        .and_then(|access| access.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
