//! Backend-agnostic entry point for tool wrappers.
//!
//! Selects the local or remote credential backend once at construction;
//! every credential returned by [`AuthClient::get_user_credentials`] is
//! valid now, whichever backend answered.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    callback_server::{CallbackServer, DEFAULT_AUTHORIZATION_TIMEOUT},
    config,
    error::{AuthError, AuthResult},
    flow::OAuthFlow,
    refresh::{RefreshCoordinator, RefreshPolicy},
    storage::{CredentialStore, LocalCredentialStore, RemoteCredentialStore},
    types::{Credential, CredentialKey, GrantVariant, OAuthConfig, PendingFlow},
};

pub struct AuthClient {
    store: Arc<dyn CredentialStore>,
    config_dir: PathBuf,
    /// Absent when the store refreshes server-side.
    coordinator: Option<RefreshCoordinator>,
    /// In-flight interactive authorizations, one per key.
    pending: Mutex<HashMap<CredentialKey, PendingFlow>>,
    authorization_timeout: Duration,
}

impl AuthClient {
    /// Build a client over an explicit store. A refresh coordinator is
    /// wired in unless the store refreshes credentials server-side.
    pub fn new(store: Arc<dyn CredentialStore>, config_dir: PathBuf, policy: RefreshPolicy) -> Self {
        let coordinator = (!store.refreshes_server_side())
            .then(|| RefreshCoordinator::new(store.clone(), policy));
        Self {
            store,
            config_dir,
            coordinator,
            pending: Mutex::new(HashMap::new()),
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }

    /// Select the backend from the environment, once: `ENVIRONMENT=remote`
    /// uses the hosted credential API, anything else the local file store.
    pub fn from_env() -> AuthResult<Self> {
        let config_dir = config::default_config_dir()?;
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".into());

        let store: Arc<dyn CredentialStore> = if environment.eq_ignore_ascii_case("remote") {
            Arc::new(RemoteCredentialStore::from_env()?)
        } else {
            Arc::new(LocalCredentialStore::from_env()?)
        };
        tracing::debug!(%environment, "selected credential backend");

        Ok(Self::new(store, config_dir, RefreshPolicy::default()))
    }

    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    /// OAuth application configuration for `service`.
    pub fn oauth_config(&self, service: &str) -> AuthResult<OAuthConfig> {
        config::load_oauth_config(&self.config_dir, service)
    }

    /// The current credential for (service, user), guaranteed usable now.
    ///
    /// Local backend: the credential is proactively refreshed when inside
    /// the lookahead window. Remote backend: the server already refreshed
    /// it. An expired credential that cannot be refreshed surfaces
    /// `ReauthenticationRequired` rather than being silently retried.
    pub async fn get_user_credentials(
        &self,
        service: &str,
        user_id: &str,
    ) -> AuthResult<Credential> {
        let key = CredentialKey::new(service, user_id);
        let credential = match self.store.get(&key).await {
            Ok(credential) => credential,
            Err(err @ AuthError::NotFound { .. }) => {
                // A missing record may be the tail end of a rejected
                // refresh; report that as a re-authentication requirement,
                // not as a never-authorized user.
                if let Some(coordinator) = &self.coordinator {
                    if coordinator.was_rejected(&key).await {
                        return Err(AuthError::ReauthenticationRequired { key });
                    }
                }
                return Err(err);
            },
            Err(e) => return Err(e),
        };

        let credential = match &self.coordinator {
            Some(coordinator)
                if credential.grant_variant == GrantVariant::WithRefresh
                    && credential.needs_refresh(coordinator.policy().lookahead_secs) =>
            {
                let flow = OAuthFlow::new(service, self.oauth_config(service)?);
                coordinator.ensure_valid(&flow, &key).await?
            },
            _ => credential,
        };

        if self.coordinator.is_some()
            && credential.grant_variant != GrantVariant::WithRefresh
            && credential.is_expired()
        {
            return Err(AuthError::ReauthenticationRequired { key });
        }

        Ok(credential)
    }

    /// Start an interactive authorization and return the URL to open in
    /// the user's browser. Any previous pending flow for the key is
    /// replaced.
    pub async fn begin_authorization(
        &self,
        service: &str,
        user_id: &str,
        scopes: &[String],
    ) -> AuthResult<String> {
        let flow = OAuthFlow::new(service, self.oauth_config(service)?);
        let request = flow.start(user_id, scopes)?;

        let key = CredentialKey::new(service, user_id);
        self.pending.lock().await.insert(key, request.pending);
        Ok(request.url)
    }

    /// Wait for the provider redirect, exchange the code, and persist the
    /// resulting credential. The pending flow is discarded on every exit
    /// path, whether it ends in success, timeout, or error.
    pub async fn complete_authorization(
        &self,
        service: &str,
        user_id: &str,
    ) -> AuthResult<Credential> {
        let key = CredentialKey::new(service, user_id);
        let pending = self
            .pending
            .lock()
            .await
            .remove(&key)
            .ok_or_else(|| AuthError::NoPendingFlow { key: key.clone() })?;

        let config = self.oauth_config(service)?;
        let port = redirect_port(&config, service)?;
        let flow = OAuthFlow::new(service, config);

        let code =
            CallbackServer::wait_for_code(port, pending.state.clone(), self.authorization_timeout)
                .await?;

        let credential = flow.exchange(&pending, &code).await?;
        self.store.put(&credential).await?;
        tracing::info!(%key, "authorization complete, credentials stored");
        Ok(credential)
    }

    /// Delete the stored credential and any in-flight pending flow for the
    /// key. User-initiated; the only way a credential is removed other than
    /// refresh rejection.
    pub async fn revoke(&self, service: &str, user_id: &str) -> AuthResult<()> {
        let key = CredentialKey::new(service, user_id);
        self.pending.lock().await.remove(&key);
        if let Some(coordinator) = &self.coordinator {
            coordinator.forget(&key).await;
        }
        self.store.delete(&key).await?;
        tracing::info!(%key, "credentials revoked");
        Ok(())
    }
}

/// Port of the local redirect listener, taken from the configured redirect
/// URI (default 8080 when the URI carries no explicit port).
fn redirect_port(config: &OAuthConfig, service: &str) -> AuthResult<u16> {
    let url = url::Url::parse(&config.redirect_uri).map_err(|e| AuthError::ConfigMalformed {
        service: service.to_string(),
        reason: format!("invalid redirect_uri: {e}"),
    })?;
    Ok(url.port().unwrap_or(8080))
}
