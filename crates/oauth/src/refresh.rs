//! Proactive token refresh with per-key single-flight.
//!
//! Decides when a stored credential needs refreshing, guarantees at most one
//! in-flight provider refresh per (service, user) key, and publishes the
//! refreshed credential atomically through the store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    error::{AuthError, AuthResult},
    flow::OAuthFlow,
    storage::CredentialStore,
    types::{Credential, CredentialKey, DEFAULT_REFRESH_LOOKAHEAD_SECS, GrantVariant},
};

/// Refresh timing and retry knobs.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Seconds before expiry at which a token is refreshed proactively, so
    /// callers never receive one that expires mid-use.
    pub lookahead_secs: u64,
    /// Attempt cap for transient provider failures.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub base_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lookahead_secs: DEFAULT_REFRESH_LOOKAHEAD_SECS,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Per-key flight state. `rejected` records that the provider rejected the
/// last refresh for this key, so callers racing the deletion (or arriving
/// after it) see the rejection instead of a bare `NotFound`.
#[derive(Default)]
struct KeySlot {
    rejected: bool,
}

/// Serializes refreshes per key and persists results.
///
/// Locking is scoped per [`CredentialKey`]: the registry lock is held only
/// long enough to clone out the per-key slot, never across the provider
/// call, so unrelated keys never contend.
pub struct RefreshCoordinator {
    store: Arc<dyn CredentialStore>,
    policy: RefreshPolicy,
    in_flight: Mutex<HashMap<CredentialKey, Arc<Mutex<KeySlot>>>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, policy: RefreshPolicy) -> Self {
        Self {
            store,
            policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Return the stored credential for `key`, refreshed if it is inside
    /// the lookahead window and refreshable.
    ///
    /// Credentials that cannot be refreshed (no expiry, or a variant
    /// without a refresh token) are returned unchanged; surfacing the
    /// re-authentication requirement for expired ones is the facade's job.
    pub async fn ensure_valid(&self, flow: &OAuthFlow, key: &CredentialKey) -> AuthResult<Credential> {
        let credential = match self.store.get(key).await {
            Ok(credential) => credential,
            Err(err @ AuthError::NotFound { .. }) => {
                if self.was_rejected(key).await {
                    return Err(AuthError::ReauthenticationRequired { key: key.clone() });
                }
                return Err(err);
            },
            Err(e) => return Err(e),
        };

        if !credential.needs_refresh(self.policy.lookahead_secs)
            || credential.grant_variant != GrantVariant::WithRefresh
        {
            return Ok(credential);
        }

        let slot = {
            let mut registry = self.in_flight.lock().await;
            registry.entry(key.clone()).or_default().clone()
        };
        let result = self.refresh_single_flight(flow, key, &slot).await;
        self.release(key, &slot).await;
        result
    }

    /// Whether the last in-flight refresh for `key` was rejected by the
    /// provider. Awaits any flight still running for the key.
    pub(crate) async fn was_rejected(&self, key: &CredentialKey) -> bool {
        let slot = self.in_flight.lock().await.get(key).cloned();
        match slot {
            Some(slot) => slot.lock().await.rejected,
            None => false,
        }
    }

    /// Drop any flight state for `key`; called when the credential is
    /// revoked so the rejection marker does not outlive it.
    pub(crate) async fn forget(&self, key: &CredentialKey) {
        self.in_flight.lock().await.remove(key);
    }

    async fn refresh_single_flight(
        &self,
        flow: &OAuthFlow,
        key: &CredentialKey,
        slot: &Arc<Mutex<KeySlot>>,
    ) -> AuthResult<Credential> {
        let mut state = slot.lock().await;

        // A concurrent caller may have finished while we waited for the
        // key lock; re-read before touching the provider.
        let credential = match self.store.get(key).await {
            Ok(credential) => credential,
            Err(AuthError::NotFound { .. }) if state.rejected => {
                return Err(AuthError::ReauthenticationRequired { key: key.clone() });
            },
            Err(e) => return Err(e),
        };
        if !credential.needs_refresh(self.policy.lookahead_secs) {
            return Ok(credential);
        }

        match self.refresh_with_retry(flow, &credential).await {
            Ok(refreshed) => {
                state.rejected = false;
                self.store.put(&refreshed).await?;
                Ok(refreshed)
            },
            Err(AuthError::RefreshRejected(reason)) => {
                tracing::warn!(%key, %reason, "refresh token invalidated, deleting credential");
                state.rejected = true;
                self.store.delete(key).await?;
                Err(AuthError::ReauthenticationRequired { key: key.clone() })
            },
            Err(e) => Err(e),
        }
    }

    /// Remove the registry entry once its flight is over, unless other
    /// callers still hold it or it carries a rejection marker that later
    /// callers must observe.
    async fn release(&self, key: &CredentialKey, slot: &Arc<Mutex<KeySlot>>) {
        let mut registry = self.in_flight.lock().await;
        let Some(entry) = registry.get(key) else {
            return;
        };
        if !Arc::ptr_eq(entry, slot) {
            return;
        }
        // Two handles left means the registry's and ours: no waiters, and
        // none can appear while we hold the registry lock.
        if Arc::strong_count(entry) == 2
            && entry.try_lock().map(|state| !state.rejected).unwrap_or(false)
        {
            registry.remove(key);
        }
    }

    async fn refresh_with_retry(
        &self,
        flow: &OAuthFlow,
        credential: &Credential,
    ) -> AuthResult<Credential> {
        let mut delay = self.policy.base_delay;
        let mut attempt = 1;
        loop {
            match flow.refresh(credential).await {
                Ok(refreshed) => return Ok(refreshed),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    tracing::debug!(
                        service = %credential.service,
                        user_id = %credential.user_id,
                        attempt,
                        error = %e,
                        "transient refresh failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
