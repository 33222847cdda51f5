use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::{AuthError, AuthResult},
    storage::CredentialStore,
    types::{Credential, CredentialKey},
};

/// Credential store backed by the hosted toolgate API.
///
/// The server refreshes credentials before returning them, so the local
/// refresh coordinator is bypassed entirely for this backend.
pub struct RemoteCredentialStore {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl RemoteCredentialStore {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Store configured from `TOOLGATE_API_BASE_URL` / `TOOLGATE_API_KEY`.
    pub fn from_env() -> AuthResult<Self> {
        let base_url = std::env::var("TOOLGATE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.toolgate.dev".into());
        let api_key = std::env::var("TOOLGATE_API_KEY").map_err(|_| {
            AuthError::Io(std::io::Error::other(
                "TOOLGATE_API_KEY must be set for the remote credential backend",
            ))
        })?;
        Ok(Self::new(base_url, SecretString::new(api_key)))
    }

    fn credentials_url(&self, key: &CredentialKey) -> String {
        format!(
            "{}/auth/{}/{}/credentials",
            self.base_url, key.service, key.user_id
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }
}

#[async_trait]
impl CredentialStore for RemoteCredentialStore {
    async fn get(&self, key: &CredentialKey) -> AuthResult<Credential> {
        let resp = self
            .client
            .get(self.credentials_url(key))
            .header("Authorization", self.bearer())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthError::NotFound { key: key.clone() });
        }
        let resp = resp.error_for_status()?;

        resp.json::<Credential>()
            .await
            .map_err(|e| AuthError::CredentialCorrupt {
                key: key.clone(),
                reason: e.to_string(),
            })
    }

    async fn put(&self, credential: &Credential) -> AuthResult<()> {
        let key = credential.key();
        let resp = self
            .client
            .post(self.credentials_url(&key))
            .header("Authorization", self.bearer())
            .json(credential)
            .send()
            .await?;

        // 200 and 201 are both "stored".
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(%key, %status, "failed to save credentials remotely");
            return Err(AuthError::Io(std::io::Error::other(format!(
                "remote store rejected credentials: HTTP {status}: {body}"
            ))));
        }
        Ok(())
    }

    async fn delete(&self, key: &CredentialKey) -> AuthResult<()> {
        let resp = self
            .client
            .delete(self.credentials_url(key))
            .header("Authorization", self.bearer())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    fn refreshes_server_side(&self) -> bool {
        true
    }
}
