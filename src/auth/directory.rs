//! Provider-side user administration.
//!
//! The user list lives in the identity provider, not the catalog; these
//! operations proxy the provider's admin API using the service credential
//! kept fresh by the renewal loop. This is the admin token's main consumer
//! beyond introspection.

use std::sync::Arc;

use tracing::{debug, info};

use super::credentials::CredentialStore;
use super::provider::{IdentityProvider, ProviderError, ProviderUser};
use crate::config::KeycloakConfig;
use crate::{Error, Result};

/// Read/administer user accounts held by the identity provider.
pub struct UserDirectory {
    provider: Arc<dyn IdentityProvider>,
    credentials: Arc<CredentialStore>,
    config: KeycloakConfig,
}

impl UserDirectory {
    /// Create a directory sharing the given provider and credential store.
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

    /// List the realm's users.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceUnavailable`] if no service credential can be
    /// obtained or the provider call fails.
    pub async fn users(&self) -> Result<Vec<ProviderUser>> {
        let admin_token = self
            .credentials
            .get_or_login(self.provider.as_ref(), &self.config)
            .await?;

        let users = self
            .provider
            .list_users(&admin_token, &self.config.realm)
            .await
            .map_err(admin_call_error)?;

        debug!(count = users.len(), "Fetched provider user list");
        Ok(users)
    }

    /// Enable or disable a user account.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the provider does not know the user id;
    /// [`Error::ServiceUnavailable`] for credential or provider failures.
    pub async fn set_user_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        let admin_token = self
            .credentials
            .get_or_login(self.provider.as_ref(), &self.config)
            .await?;

        self.provider
            .set_user_enabled(&admin_token, &self.config.realm, user_id, enabled)
            .await
            .map_err(admin_call_error)?;

        info!(user_id = %user_id, enabled, "Updated provider user status");
        Ok(())
    }
}

/// An admin-API 404 means the user id is unknown; everything else is a
/// provider problem the caller should retry.
fn admin_call_error(e: ProviderError) -> Error {
    match e {
        ProviderError::Rejected { status: 404, .. } => {
            Error::NotFound("user not found at identity provider".to_string())
        }
        other => Error::ServiceUnavailable(format!("identity provider error: {other}")),
    }
}
