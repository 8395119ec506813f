//! Service credential cache and renewal scheduler.
//!
//! The process holds exactly one service-level credential at a time, kept in
//! a [`CredentialStore`]. A single background task (spawned by
//! [`spawn_renewer`]) is the only writer: it logs in with the service's
//! client credentials whenever a renewal signal arrives, then schedules the
//! next signal shortly before the new credential expires.
//!
//! The renewal signal is a single-slot mailbox: a bounded(1) channel written
//! with `try_send`, so duplicate triggers coalesce instead of queueing.
//! Login failures keep the previous credential (stale-but-valid beats none)
//! and retry on a fixed backoff, forever — there is no supervisor to restart
//! this loop, so it never gives up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::provider::{IdentityProvider, ProviderError, ServiceCredential};
use crate::config::KeycloakConfig;
use crate::{Error, Result};

/// Renew this many seconds before the credential expires.
const RENEWAL_MARGIN_SECS: u64 = 30;

/// Never schedule a renewal closer than this.
const MIN_RENEWAL_SECS: u64 = 1;

/// Fixed delay before retrying a failed login.
const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Holds the current service credential.
///
/// Readers take a snapshot of the token string; only the renewal loop (and
/// the double-checked first-acquisition fallback) ever writes.
pub struct CredentialStore {
    current: RwLock<Option<ServiceCredential>>,
    /// Serializes fallback logins so concurrent first requests don't stampede
    /// the token endpoint.
    login_gate: tokio::sync::Mutex<()>,
}

impl CredentialStore {
    /// Create an empty store. `read` returns `None` until the first
    /// successful login lands.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            login_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the current access token, if one exists.
    #[must_use]
    pub fn read(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    /// Replace the current credential atomically with respect to readers.
    pub fn store(&self, credential: ServiceCredential) {
        *self.current.write() = Some(credential);
    }

    /// Return the current token, logging in synchronously if none exists yet.
    ///
    /// Double-checked: the unlocked-equivalent fast read runs first; only on
    /// a miss do we take the login gate and re-check, since another task may
    /// have populated the store while we waited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] if no credential exists and the
    /// fallback login fails.
    pub async fn get_or_login(
        &self,
        provider: &dyn IdentityProvider,
        config: &KeycloakConfig,
    ) -> Result<String> {
        if let Some(token) = self.read() {
            return Ok(token);
        }

        let _gate = self.login_gate.lock().await;
        if let Some(token) = self.read() {
            return Ok(token);
        }

        info!("No service credential cached, acquiring one synchronously");
        let credential = provider
            .login(
                &config.admin_client_id,
                &config.admin_client_secret,
                &config.realm,
            )
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("service login failed: {e}")))?;

        let token = credential.access_token.clone();
        self.store(credential);
        Ok(token)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for sending renewal signals.
///
/// `trigger` never blocks: if a signal is already pending, the duplicate is
/// dropped.
#[derive(Clone)]
pub struct RenewalHandle {
    tx: mpsc::Sender<()>,
}

impl RenewalHandle {
    /// Request a renewal. Coalesces with any already-pending signal.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Delay until the next renewal for a credential valid for `expires_in`
/// seconds: the safety margin ahead of expiry, floored at one second.
pub(crate) fn renewal_delay(expires_in: u64) -> Duration {
    Duration::from_secs(
        expires_in
            .saturating_sub(RENEWAL_MARGIN_SECS)
            .max(MIN_RENEWAL_SECS),
    )
}

/// Spawn the renewal loop and send the initial signal so the first credential
/// is acquired eagerly rather than on first request.
///
/// The returned handle can inject extra renewal signals; the loop itself
/// re-schedules after every attempt and exits when `shutdown` fires.
pub fn spawn_renewer(
    store: Arc<CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
    config: KeycloakConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> RenewalHandle {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let handle = RenewalHandle { tx: tx.clone() };

    tokio::spawn(async move {
        let mut ever_succeeded = false;
        let mut failed_before = false;

        loop {
            tokio::select! {
                signal = rx.recv() => {
                    if signal.is_none() {
                        break;
                    }

                    match provider
                        .login(
                            &config.admin_client_id,
                            &config.admin_client_secret,
                            &config.realm,
                        )
                        .await
                    {
                        Ok(credential) => {
                            let delay = renewal_delay(credential.expires_in);
                            info!(
                                expires_in = credential.expires_in,
                                next_renewal_secs = delay.as_secs(),
                                "Service credential renewed"
                            );
                            store.store(credential);
                            ever_succeeded = true;
                            schedule_signal(tx.clone(), delay);
                        }
                        Err(e) => {
                            log_login_failure(&e, ever_succeeded, failed_before);
                            failed_before = true;
                            schedule_signal(tx.clone(), RETRY_BACKOFF);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Renewal scheduler shutting down");
                    break;
                }
            }
        }
    });

    // Initial kick: acquire the first credential eagerly.
    handle.trigger();
    handle
}

/// Send a renewal signal after `delay`. Coalesces via `try_send`; a send into
/// a full or closed channel is a no-op.
fn schedule_signal(tx: mpsc::Sender<()>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.try_send(());
    });
}

/// A rejection means our own client id/secret is wrong — configuration, not
/// outage. For transport failures only the very first one is loud (every
/// request degrades to 503 until a login succeeds); the per-retry repeats
/// log at warn so a long outage doesn't flood the error stream.
fn log_login_failure(e: &ProviderError, ever_succeeded: bool, failed_before: bool) {
    let retry_secs = RETRY_BACKOFF.as_secs();
    if e.is_rejection() {
        error!(
            error = %e,
            retry_secs,
            "Identity provider rejected the service credentials - check client id/secret"
        );
    } else if !failed_before && !ever_succeeded {
        error!(
            error = %e,
            retry_secs,
            "Initial service login failed, requests will see 503 until it succeeds"
        );
    } else {
        warn!(error = %e, retry_secs, "Service credential renewal failed");
    }
}
