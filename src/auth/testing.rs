//! Shared test doubles for the auth subsystem.

use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use serde_json::Value;

use super::provider::{Claims, IdentityProvider, ProviderError, ProviderUser, ServiceCredential};

/// Build a structurally valid (unsigned) JWT carrying the given payload.
pub(crate) fn make_jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{body}.unsigned")
}

/// Scripted [`IdentityProvider`] with per-operation call counters.
pub(crate) struct MockProvider {
    /// Number of `login` calls observed.
    pub login_calls: AtomicUsize,
    /// Number of `introspect` calls observed.
    pub introspect_calls: AtomicUsize,
    /// Number of `decode` calls observed.
    pub decode_calls: AtomicUsize,
    /// Number of `list_users` calls observed.
    pub list_users_calls: AtomicUsize,

    login_result: Mutex<Option<ServiceCredential>>,
    /// Logins beyond this count fail (`usize::MAX` = never).
    fail_logins_after: usize,
    introspect_result: Option<bool>,
    claims: Option<Claims>,
    users: Option<Vec<ProviderUser>>,
    /// HTTP status `set_user_enabled` is scripted to be rejected with.
    user_update_rejection: Option<u16>,
    /// Admin token most recently presented to an admin-API call.
    admin_token_seen: Mutex<Option<String>>,
    /// `(user_id, enabled)` pairs applied through `set_user_enabled`.
    user_updates: Mutex<Vec<(String, bool)>>,
}

impl MockProvider {
    /// A provider where every operation fails until scripted otherwise.
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            introspect_calls: AtomicUsize::new(0),
            decode_calls: AtomicUsize::new(0),
            list_users_calls: AtomicUsize::new(0),
            login_result: Mutex::new(None),
            fail_logins_after: usize::MAX,
            introspect_result: None,
            claims: None,
            users: None,
            user_update_rejection: None,
            admin_token_seen: Mutex::new(None),
            user_updates: Mutex::new(Vec::new()),
        }
    }

    /// Script `login` to succeed with the given token and validity.
    pub fn with_login_token(self, token: &str, expires_in: u64) -> Self {
        *self.login_result.lock() = Some(ServiceCredential {
            access_token: token.to_string(),
            expires_in,
        });
        self
    }

    /// Script `login` to always fail with a transport-class error.
    pub fn with_login_failure(mut self) -> Self {
        self.fail_logins_after = 0;
        self
    }

    /// Let the first `n` logins succeed, then fail.
    pub fn fail_logins_after(mut self, n: usize) -> Self {
        self.fail_logins_after = n;
        self
    }

    /// Script the introspection verdict.
    pub fn with_introspect_active(mut self, active: bool) -> Self {
        self.introspect_result = Some(active);
        self
    }

    /// Script `introspect` to fail with a transport-class error.
    pub fn with_introspect_failure(mut self) -> Self {
        self.introspect_result = None;
        self
    }

    /// Script `decode` to return the given claim object.
    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims.as_object().cloned();
        self
    }

    /// Script the user list served by `list_users`.
    pub fn with_users(mut self, users: Vec<ProviderUser>) -> Self {
        self.users = Some(users);
        self
    }

    /// Script `set_user_enabled` to be rejected with the given HTTP status.
    pub fn with_user_update_rejection(mut self, status: u16) -> Self {
        self.user_update_rejection = Some(status);
        self
    }

    /// The admin token most recently presented to an admin-API call.
    pub fn last_admin_token(&self) -> Option<String> {
        self.admin_token_seen.lock().clone()
    }

    /// The `(user_id, enabled)` updates applied so far.
    pub fn user_updates(&self) -> Vec<(String, bool)> {
        self.user_updates.lock().clone()
    }

    /// Transport-class failures have no public constructor on
    /// `reqwest::Error`, so the mock stands in a rejection with a
    /// distinctive status instead.
    fn outage() -> ProviderError {
        ProviderError::Rejected {
            status: 599,
            body: "mock outage".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockProvider {
    async fn login(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _realm: &str,
    ) -> Result<ServiceCredential, ProviderError> {
        let calls = self.login_calls.fetch_add(1, Ordering::SeqCst);
        if calls >= self.fail_logins_after {
            return Err(Self::outage());
        }
        self.login_result
            .lock()
            .clone()
            .ok_or_else(Self::outage)
    }

    async fn introspect(
        &self,
        _token: &str,
        _client_id: &str,
        _client_secret: &str,
        _realm: &str,
    ) -> Result<bool, ProviderError> {
        self.introspect_calls.fetch_add(1, Ordering::SeqCst);
        self.introspect_result.ok_or_else(Self::outage)
    }

    async fn decode(&self, _token: &str, _realm: &str) -> Result<Claims, ProviderError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        self.claims
            .clone()
            .ok_or_else(|| ProviderError::MalformedToken("no claims scripted".to_string()))
    }

    async fn list_users(
        &self,
        admin_token: &str,
        _realm: &str,
    ) -> Result<Vec<ProviderUser>, ProviderError> {
        self.list_users_calls.fetch_add(1, Ordering::SeqCst);
        *self.admin_token_seen.lock() = Some(admin_token.to_string());
        self.users.clone().ok_or_else(Self::outage)
    }

    async fn set_user_enabled(
        &self,
        admin_token: &str,
        _realm: &str,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), ProviderError> {
        *self.admin_token_seen.lock() = Some(admin_token.to_string());
        if let Some(status) = self.user_update_rejection {
            return Err(ProviderError::Rejected {
                status,
                body: "scripted rejection".to_string(),
            });
        }
        self.user_updates.lock().push((user_id.to_string(), enabled));
        Ok(())
    }
}
