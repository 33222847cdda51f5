//! Per-service OAuth application configuration.
//!
//! One JSON file per service at `{base_dir}/{service}/oauth.json`. Pure
//! reads, safe to call repeatedly and concurrently.

use std::path::{Path, PathBuf};

use crate::{
    error::{AuthError, AuthResult},
    types::OAuthConfig,
};

/// Default directory holding per-service `oauth.json` files.
///
/// `TOOLGATE_OAUTH_CONFIG_DIR` overrides; otherwise `~/.toolgate/oauth_configs`.
pub fn default_config_dir() -> AuthResult<PathBuf> {
    if let Ok(dir) = std::env::var("TOOLGATE_OAUTH_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = directories::BaseDirs::new().ok_or_else(|| {
        AuthError::Io(std::io::Error::other("could not determine home directory"))
    })?;
    Ok(home.home_dir().join(".toolgate/oauth_configs"))
}

/// Load the OAuth configuration for `service` from `base_dir`.
pub fn load_oauth_config(base_dir: &Path, service: &str) -> AuthResult<OAuthConfig> {
    let path = base_dir.join(service).join("oauth.json");
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::ConfigNotFound {
                service: service.to_string(),
            });
        },
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content).map_err(|e| AuthError::ConfigMalformed {
        service: service.to_string(),
        reason: e.to_string(),
    })
}
