//! Credential lifecycle and request authorization.
//!
//! Everything the HTTP layer needs to decide "who is calling and what may
//! they do" lives here:
//!
//! - [`provider`] — the identity provider client (login, introspection,
//!   claim decode) behind the [`provider::IdentityProvider`] seam.
//! - [`credentials`] — the process-wide service credential cache and the
//!   self-scheduling renewal loop that keeps it fresh.
//! - [`validator`] — the per-request token validation pipeline producing a
//!   [`validator::CallerIdentity`].
//! - [`middleware`] — axum middleware wiring validation and the role gate
//!   into the router.
//! - [`directory`] — provider-side user administration on top of the
//!   service credential.

pub mod credentials;
pub mod directory;
pub mod middleware;
pub mod provider;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{CredentialStore, RenewalHandle, spawn_renewer};
pub use directory::UserDirectory;
pub use middleware::{auth_middleware, require_admin};
pub use provider::{IdentityProvider, KeycloakClient, ProviderUser, ServiceCredential};
pub use validator::{CallerIdentity, TokenValidator};
