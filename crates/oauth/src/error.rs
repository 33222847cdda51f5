use thiserror::Error;

use crate::types::CredentialKey;

pub type AuthResult<T> = Result<T, AuthError>;

/// Stable error taxonomy surfaced to tool wrappers.
///
/// Wrappers match on these kinds to present actionable messages ("please
/// re-authenticate with Slack") instead of raw provider error bodies.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no OAuth config found for service '{service}'")]
    ConfigNotFound { service: String },

    #[error("OAuth config for service '{service}' is malformed: {reason}")]
    ConfigMalformed { service: String, reason: String },

    /// No credential stored yet. Expected on first use; triggers the
    /// interactive authorization flow.
    #[error("no credentials stored for {key}")]
    NotFound { key: CredentialKey },

    /// A service or user id that cannot name a storage record, such as
    /// one containing a path separator.
    #[error("invalid credential key component '{component}'")]
    InvalidKey { component: String },

    /// Stored record exists but cannot be decoded. Distinct from
    /// `NotFound` so callers can tell "never authenticated" apart from
    /// "data damaged".
    #[error("stored credentials for {key} are corrupt: {reason}")]
    CredentialCorrupt { key: CredentialKey, reason: String },

    /// The redirect carried a state nonce we did not issue. Possible
    /// CSRF/replay; the flow is aborted.
    #[error("authorization state mismatch (possible CSRF)")]
    StateMismatch,

    /// The provider reported an error on the redirect (user denied
    /// consent, bad scope, ...).
    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("timed out waiting for the authorization redirect")]
    AuthorizationTimeout,

    /// `complete_authorization` was called without a matching
    /// `begin_authorization`, or the pending flow was already discarded.
    #[error("no authorization in progress for {key}")]
    NoPendingFlow { key: CredentialKey },

    /// The provider invalidated the refresh token. Never retried; the
    /// stored credential is deleted and re-authentication is required.
    #[error("provider rejected the refresh token: {0}")]
    RefreshRejected(String),

    /// `refresh` was called on a credential without a refresh token.
    /// Contract violation, not a runtime condition to recover from.
    #[error("credential for {key} does not support refresh")]
    RefreshUnsupported { key: CredentialKey },

    /// Transient refresh failure that persisted through the retry budget.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("re-authentication required for {key}")]
    ReauthenticationRequired { key: CredentialKey },

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether the refresh coordinator may retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RefreshFailed(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_rejected_is_not_transient() {
        assert!(!AuthError::RefreshRejected("invalid_grant".into()).is_transient());
    }

    #[test]
    fn test_refresh_failed_is_transient() {
        assert!(AuthError::RefreshFailed("502 Bad Gateway".into()).is_transient());
    }

    #[test]
    fn test_not_found_message_names_the_key() {
        let err = AuthError::NotFound {
            key: CredentialKey::new("slack", "u1"),
        };
        assert_eq!(err.to_string(), "no credentials stored for slack/u1");
    }
}
