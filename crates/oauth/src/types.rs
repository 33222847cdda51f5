use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a credential is proactively refreshed.
pub const DEFAULT_REFRESH_LOOKAHEAD_SECS: u64 = 300;

/// OAuth 2.0 provider configuration for one service.
///
/// Loaded once per service from `{config_dir}/{service}/oauth.json` and
/// immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether the provider requires the PKCE challenge/verifier pairing.
    #[serde(default)]
    pub pkce: bool,
}

/// Which authorization-code flavor a provider implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantVariant {
    /// Provider issued no refresh token; expiry means re-authentication.
    NoRefresh,
    /// Provider issued a refresh token; access tokens are renewable.
    WithRefresh,
    /// PKCE exchange without a refresh token.
    ChallengeFlow,
}

/// Identity of a stored credential. One credential per key; storing a new
/// credential for an existing key overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub service: String,
    pub user_id: String,
}

impl CredentialKey {
    pub fn new(service: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.user_id)
    }
}

/// Stored OAuth credential for one (service, user) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub service: String,
    pub user_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires. Absent means the token
    /// never expires or expiry is provider-managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub grant_variant: GrantVariant,
    /// Provider-specific fields (workspace id, instance url, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Credential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(&self.service, &self.user_id)
    }

    /// Whether the access token is past its expiry. Tokens without an
    /// expiry never expire from our point of view.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= unix_now(),
            None => false,
        }
    }

    /// Whether the token expires within the next `lookahead_secs` seconds.
    pub fn needs_refresh(&self, lookahead_secs: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= unix_now() + lookahead_secs,
            None => false,
        }
    }
}

/// PKCE challenge pair (S256 method).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Transient state for an authorization handshake in progress.
///
/// Exists only between "authorization URL issued" and "code exchanged";
/// never persisted.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    pub service: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    /// CSRF state nonce the provider must echo back.
    pub state: String,
    pub pkce: Option<PkceChallenge>,
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: Option<u64>) -> Credential {
        Credential {
            service: "slack".into(),
            user_id: "u1".into(),
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            grant_variant: GrantVariant::WithRefresh,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_no_expiry_never_needs_refresh() {
        let cred = credential(None);
        assert!(!cred.is_expired());
        assert!(!cred.needs_refresh(DEFAULT_REFRESH_LOOKAHEAD_SECS));
    }

    #[test]
    fn test_expiry_inside_lookahead_needs_refresh() {
        let cred = credential(Some(unix_now() + 60));
        assert!(!cred.is_expired());
        assert!(cred.needs_refresh(DEFAULT_REFRESH_LOOKAHEAD_SECS));
    }

    #[test]
    fn test_expiry_outside_lookahead_is_fresh() {
        let cred = credential(Some(unix_now() + 3600));
        assert!(!cred.needs_refresh(DEFAULT_REFRESH_LOOKAHEAD_SECS));
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let cred = credential(Some(unix_now() - 1));
        assert!(cred.is_expired());
        assert!(cred.needs_refresh(DEFAULT_REFRESH_LOOKAHEAD_SECS));
    }

    #[test]
    fn test_extra_fields_round_trip_through_json() {
        let mut cred = credential(Some(123));
        cred.extra.insert(
            "instance_url".into(),
            serde_json::Value::String("https://example.my.salesforce.com".into()),
        );
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains("instance_url"));
        let back: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cred);
    }

    #[test]
    fn test_grant_variant_serializes_snake_case() {
        let json = serde_json::to_string(&GrantVariant::ChallengeFlow).unwrap();
        assert_eq!(json, "\"challenge_flow\"");
    }
}
