//! Identity provider client.
//!
//! Three operations against a Keycloak-compatible OIDC server, behind the
//! [`IdentityProvider`] trait so the renewal loop and the validator can be
//! tested without a network:
//!
//! - `login` — client-credentials grant for the service's own identity
//! - `introspect` — RFC 7662 token introspection for caller tokens
//! - `decode` — local claim extraction from a caller token
//!
//! # Decode and signature verification
//!
//! `decode` parses the JWT payload without re-verifying the signature.
//! Introspection is the validity oracle: the provider checked signature,
//! expiry and revocation server-side, and `decode` is only reachable after
//! introspection reported the token active. The header is still run through
//! `jsonwebtoken::decode_header` so structurally broken tokens fail early.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Network timeout for login and introspection calls. A timed-out call is a
/// failure, not a hang.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Decoded claim set of a caller token.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// A service-level access credential as issued by the provider.
///
/// Replaced wholesale on every renewal, never mutated in place.
#[derive(Debug, Clone)]
pub struct ServiceCredential {
    /// The opaque access token (secret).
    pub access_token: String,
    /// Remaining validity in seconds, as reported at issuance.
    pub expires_in: u64,
}

/// A provider-managed user account, reduced to the fields the admin
/// frontend displays. Field names follow the provider's admin API wire
/// format (camelCase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUser {
    /// Provider-side user id (matches the `sub` claim of the user's tokens).
    pub id: String,
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Given name.
    #[serde(default, rename = "firstName")]
    pub first_name: String,
    /// Family name.
    #[serde(default, rename = "lastName")]
    pub last_name: String,
    /// Whether the account may log in.
    #[serde(default)]
    pub enabled: bool,
    /// Whether the email address has been verified.
    #[serde(default, rename = "emailVerified")]
    pub email_verified: bool,
}

/// Error variants for identity provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network or timeout failure talking to the provider.
    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered but rejected the request (bad credentials,
    /// unknown client, malformed form). Indicates configuration trouble
    /// rather than a transient outage.
    #[error("identity provider rejected the request: HTTP {status} - {body}")]
    Rejected {
        /// HTTP status the provider returned.
        status: u16,
        /// Response body, for the logs.
        body: String,
    },

    /// The caller token is not a structurally valid JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),
}

impl ProviderError {
    /// `true` if the provider actively rejected the request, which points at
    /// a configuration error rather than a transient outage.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// The identity provider contract consumed by the core.
///
/// `login` is only ever called by the renewal loop (and its synchronous
/// first-acquisition fallback); `introspect` and `decode` run per request.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Client-credentials login. Returns the new service credential.
    async fn login(
        &self,
        client_id: &str,
        client_secret: &str,
        realm: &str,
    ) -> std::result::Result<ServiceCredential, ProviderError>;

    /// Token introspection. Returns the provider's `active` verdict.
    async fn introspect(
        &self,
        token: &str,
        client_id: &str,
        client_secret: &str,
        realm: &str,
    ) -> std::result::Result<bool, ProviderError>;

    /// Decode a caller token's claims.
    async fn decode(&self, token: &str, realm: &str)
    -> std::result::Result<Claims, ProviderError>;

    /// List the realm's user accounts. Requires the service's admin token.
    async fn list_users(
        &self,
        admin_token: &str,
        realm: &str,
    ) -> std::result::Result<Vec<ProviderUser>, ProviderError>;

    /// Enable or disable a user account. Requires the service's admin token.
    async fn set_user_enabled(
        &self,
        admin_token: &str,
        realm: &str,
        user_id: &str,
        enabled: bool,
    ) -> std::result::Result<(), ProviderError>;
}

/// Token endpoint response for the client-credentials grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Introspection endpoint response. Only `active` matters; everything else
/// the provider returns is ignored.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
}

/// Keycloak client over reqwest.
pub struct KeycloakClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl KeycloakClient {
    /// Create a client for the given Keycloak base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not a valid absolute URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid Keycloak base URL '{base_url}': {e}")))?;

        Ok(Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn token_endpoint(&self, realm: &str) -> String {
        format!(
            "{}/realms/{realm}/protocol/openid-connect/token",
            self.base_url
        )
    }

    fn introspection_endpoint(&self, realm: &str) -> String {
        format!(
            "{}/realms/{realm}/protocol/openid-connect/token/introspect",
            self.base_url
        )
    }

    fn users_endpoint(&self, realm: &str) -> String {
        format!("{}/admin/realms/{realm}/users", self.base_url)
    }

    /// Fetch a user's full admin-API representation as raw JSON, so a
    /// partial update can send the whole object back unchanged apart from
    /// the toggled field.
    async fn fetch_user_representation(
        &self,
        admin_token: &str,
        realm: &str,
        user_id: &str,
    ) -> std::result::Result<serde_json::Value, ProviderError> {
        let response = self
            .http_client
            .get(format!("{}/{user_id}", self.users_endpoint(realm)))
            .bearer_auth(admin_token)
            .timeout(PROVIDER_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, body });
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for KeycloakClient {
    async fn login(
        &self,
        client_id: &str,
        client_secret: &str,
        realm: &str,
    ) -> std::result::Result<ServiceCredential, ProviderError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = self
            .http_client
            .post(self.token_endpoint(realm))
            .timeout(PROVIDER_TIMEOUT)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, body });
        }

        let token: TokenResponse = response.json().await?;
        Ok(ServiceCredential {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    async fn introspect(
        &self,
        token: &str,
        client_id: &str,
        client_secret: &str,
        realm: &str,
    ) -> std::result::Result<bool, ProviderError> {
        let params = [
            ("token", token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response = self
            .http_client
            .post(self.introspection_endpoint(realm))
            .timeout(PROVIDER_TIMEOUT)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, body });
        }

        let verdict: IntrospectionResponse = response.json().await?;
        Ok(verdict.active)
    }

    async fn decode(
        &self,
        token: &str,
        _realm: &str,
    ) -> std::result::Result<Claims, ProviderError> {
        decode_claims(token)
    }

    async fn list_users(
        &self,
        admin_token: &str,
        realm: &str,
    ) -> std::result::Result<Vec<ProviderUser>, ProviderError> {
        let response = self
            .http_client
            .get(self.users_endpoint(realm))
            .bearer_auth(admin_token)
            .timeout(PROVIDER_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, body });
        }

        Ok(response.json().await?)
    }

    async fn set_user_enabled(
        &self,
        admin_token: &str,
        realm: &str,
        user_id: &str,
        enabled: bool,
    ) -> std::result::Result<(), ProviderError> {
        // The admin API replaces the whole user representation on PUT, so
        // read it first and flip only the enabled flag.
        let mut user = self
            .fetch_user_representation(admin_token, realm, user_id)
            .await?;
        user["enabled"] = serde_json::Value::Bool(enabled);

        let response = self
            .http_client
            .put(format!("{}/{user_id}", self.users_endpoint(realm)))
            .bearer_auth(admin_token)
            .timeout(PROVIDER_TIMEOUT)
            .json(&user)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, body });
        }

        Ok(())
    }
}

/// Parse a JWT's payload into a claim map without signature verification.
pub(crate) fn decode_claims(token: &str) -> std::result::Result<Claims, ProviderError> {
    // Reject structurally broken headers before touching the payload.
    jsonwebtoken::decode_header(token)
        .map_err(|e| ProviderError::MalformedToken(e.to_string()))?;

    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() < 2 {
        return Err(ProviderError::MalformedToken(
            "token does not have a payload segment".to_string(),
        ));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| ProviderError::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice::<Claims>(&payload)
        .map_err(|e| ProviderError::MalformedToken(format!("payload is not a JSON object: {e}")))
}
