//! OAuth authorization-code flow engine.
//!
//! Drives all three grant variants (plain, with refresh token, PKCE) off a
//! single code path: `start` issues the authorization URL bound to a fresh
//! [`PendingFlow`], `exchange` trades the redirect code for a credential,
//! `refresh` renews an expiring one.

use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::{
    error::{AuthError, AuthResult},
    pkce,
    types::{Credential, GrantVariant, OAuthConfig, PendingFlow, unix_now},
};

/// An authorization URL plus the transient flow state it is bound to.
pub struct AuthorizationRequest {
    pub url: String,
    pub pending: PendingFlow,
}

/// Token endpoint response. Unknown provider fields are kept in `extra` so
/// values like workspace ids and instance URLs survive into the credential.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds; converted to an absolute `expires_at`.
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

pub struct OAuthFlow {
    service: String,
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(service: impl Into<String>, config: OAuthConfig) -> Self {
        Self {
            service: service.into(),
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the provider authorization URL for `user_id`.
    ///
    /// Always binds a fresh CSRF state nonce; additionally a PKCE
    /// verifier/challenge pair when the service config opts in. Empty
    /// `scopes` falls back to the config's default scopes.
    pub fn start(&self, user_id: &str, scopes: &[String]) -> AuthResult<AuthorizationRequest> {
        let scopes = if scopes.is_empty() {
            self.config.scopes.clone()
        } else {
            scopes.to_vec()
        };
        let state = uuid::Uuid::new_v4().to_string();
        let pkce = self.config.pkce.then(pkce::generate);

        let mut url = url::Url::parse(&self.config.auth_url).map_err(|e| {
            AuthError::ConfigMalformed {
                service: self.service.clone(),
                reason: format!("invalid auth_url: {e}"),
            }
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("state", &state);
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            if let Some(ref pair) = pkce {
                query
                    .append_pair("code_challenge", &pair.challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }

        tracing::info!(service = %self.service, %user_id, "launching authorization flow");

        Ok(AuthorizationRequest {
            url: url.into(),
            pending: PendingFlow {
                service: self.service.clone(),
                user_id: user_id.to_string(),
                scopes,
                state,
                pkce,
            },
        })
    }

    /// Exchange an authorization code for a credential.
    ///
    /// The grant variant is derived from the response: a refresh token means
    /// `WithRefresh`; a PKCE exchange without one is `ChallengeFlow`;
    /// anything else is `NoRefresh`.
    pub async fn exchange(&self, pending: &PendingFlow, code: &str) -> AuthResult<Credential> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", self.config.client_id.clone()),
            (
                "client_secret",
                self.config.client_secret.expose_secret().clone(),
            ),
        ];
        if let Some(ref pair) = pending.pkce {
            form.push(("code_verifier", pair.verifier.clone()));
        }

        let resp = self.client.post(&self.config.token_url).form(&form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::ExchangeFailed(format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;

        let grant_variant = match (&token.refresh_token, &pending.pkce) {
            (Some(_), _) => GrantVariant::WithRefresh,
            (None, Some(_)) => GrantVariant::ChallengeFlow,
            (None, None) => GrantVariant::NoRefresh,
        };

        tracing::info!(
            service = %self.service,
            user_id = %pending.user_id,
            ?grant_variant,
            "exchanged authorization code for tokens"
        );

        Ok(Credential {
            service: pending.service.clone(),
            user_id: pending.user_id.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| unix_now() + secs),
            grant_variant,
            extra: token.extra,
        })
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// A 4xx from the provider means the refresh token was invalidated
    /// (`RefreshRejected`, never retried); 5xx and transport failures are
    /// transient and reported as `RefreshFailed` for the coordinator's
    /// retry loop.
    pub async fn refresh(&self, existing: &Credential) -> AuthResult<Credential> {
        let Some(ref refresh_token) = existing.refresh_token else {
            return Err(AuthError::RefreshUnsupported {
                key: existing.key(),
            });
        };

        let form = [
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", self.config.client_id.clone()),
            (
                "client_secret",
                self.config.client_secret.expose_secret().clone(),
            ),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshRejected(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed(format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        // Some providers do not rotate the refresh token; keep the old one.
        let refresh_token = token.refresh_token.or_else(|| existing.refresh_token.clone());

        // Provider-specific fields from the original grant survive unless
        // the refresh response overwrites them.
        let mut extra = existing.extra.clone();
        extra.extend(token.extra);

        tracing::info!(
            service = %self.service,
            user_id = %existing.user_id,
            "refreshed access token"
        );

        Ok(Credential {
            service: existing.service.clone(),
            user_id: existing.user_id.clone(),
            access_token: token.access_token,
            refresh_token,
            expires_at: token.expires_in.map(|secs| unix_now() + secs),
            grant_variant: existing.grant_variant,
            extra,
        })
    }
}
