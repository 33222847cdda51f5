use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    error::{AuthError, AuthResult},
    storage::CredentialStore,
    types::{Credential, CredentialKey},
};

/// File-backed credential store for local development and self-hosted
/// installations.
///
/// One JSON record per key at `{base_dir}/{service}/{user_id}_credentials.json`.
/// Writes go to a temporary sibling file and are moved into place with
/// `rename`, so a concurrent reader never observes a half-written record.
pub struct LocalCredentialStore {
    base_dir: PathBuf,
}

impl LocalCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store rooted at the default data directory.
    ///
    /// `TOOLGATE_CREDENTIALS_DIR` overrides; otherwise `~/.toolgate/credentials`.
    pub fn from_env() -> AuthResult<Self> {
        if let Ok(dir) = std::env::var("TOOLGATE_CREDENTIALS_DIR") {
            return Ok(Self::new(dir));
        }
        let home = directories::BaseDirs::new().ok_or_else(|| {
            AuthError::Io(std::io::Error::other("could not determine home directory"))
        })?;
        Ok(Self::new(home.home_dir().join(".toolgate/credentials")))
    }

    fn record_path(&self, key: &CredentialKey) -> AuthResult<PathBuf> {
        validate_component(&key.service)?;
        validate_component(&key.user_id)?;
        Ok(self
            .base_dir
            .join(&key.service)
            .join(format!("{}_credentials.json", key.user_id)))
    }

    /// Enumerate all stored credential keys, scanning one directory per
    /// service. Used by the CLI status view.
    pub fn list(&self) -> Vec<CredentialKey> {
        let mut keys = Vec::new();
        let services = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(_) => return keys,
        };
        for service_entry in services.flatten() {
            let service_dir = service_entry.path();
            if !service_dir.is_dir() {
                continue;
            }
            let service = service_entry.file_name().to_string_lossy().into_owned();
            let records = match std::fs::read_dir(&service_dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for record in records.flatten() {
                let name = record.file_name().to_string_lossy().into_owned();
                if let Some(user_id) = name.strip_suffix("_credentials.json") {
                    keys.push(CredentialKey::new(&service, user_id));
                }
            }
        }
        keys.sort_by(|a, b| (&a.service, &a.user_id).cmp(&(&b.service, &b.user_id)));
        keys
    }

    async fn write_atomic(path: &Path, contents: &str) -> AuthResult<()> {
        let parent = path.parent().ok_or_else(|| {
            AuthError::Io(std::io::Error::other("credential path has no parent"))
        })?;
        tokio::fs::create_dir_all(parent).await?;

        // Unique temp name so concurrent writers for the same key cannot
        // trample each other's staging file.
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Key components become path segments under `base_dir`; anything that
/// could traverse out of it is refused.
fn validate_component(component: &str) -> AuthResult<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(AuthError::InvalidKey {
            component: component.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl CredentialStore for LocalCredentialStore {
    async fn get(&self, key: &CredentialKey) -> AuthResult<Credential> {
        let path = self.record_path(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::NotFound { key: key.clone() });
            },
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| AuthError::CredentialCorrupt {
            key: key.clone(),
            reason: e.to_string(),
        })
    }

    async fn put(&self, credential: &Credential) -> AuthResult<()> {
        let path = self.record_path(&credential.key())?;
        let json = serde_json::to_string_pretty(credential).map_err(|e| {
            AuthError::Io(std::io::Error::other(e))
        })?;
        Self::write_atomic(&path, &json).await?;
        tracing::debug!(service = %credential.service, user_id = %credential.user_id, "stored credentials");
        Ok(())
    }

    async fn delete(&self, key: &CredentialKey) -> AuthResult<()> {
        match tokio::fs::remove_file(self.record_path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GrantVariant;

    fn credential(service: &str, user_id: &str) -> Credential {
        let mut extra = serde_json::Map::new();
        extra.insert("team_id".into(), serde_json::Value::String("T123".into()));
        Credential {
            service: service.into(),
            user_id: user_id.into(),
            access_token: "xoxb-token".into(),
            refresh_token: Some("xoxe-refresh".into()),
            expires_at: Some(1_900_000_000),
            grant_variant: GrantVariant::WithRefresh,
            extra,
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_all_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        let cred = credential("slack", "u1");

        store.put(&cred).await.unwrap();
        let loaded = store.get(&cred.key()).await.unwrap();
        assert_eq!(loaded, cred);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        let err = store.get(&CredentialKey::new("slack", "nobody")).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_distinct_from_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        let dir = tmp.path().join("slack");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("u1_credentials.json"), "{ truncated").unwrap();

        let err = store.get(&CredentialKey::new("slack", "u1")).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialCorrupt { .. }));
    }

    #[tokio::test]
    async fn test_put_overwrites_never_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        let mut cred = credential("slack", "u1");
        store.put(&cred).await.unwrap();

        cred.access_token = "rotated".into();
        store.put(&cred).await.unwrap();

        let loaded = store.get(&cred.key()).await.unwrap();
        assert_eq!(loaded.access_token, "rotated");
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        let cred = credential("slack", "u1");
        store.put(&cred).await.unwrap();

        store.delete(&cred.key()).await.unwrap();
        assert!(matches!(
            store.get(&cred.key()).await.unwrap_err(),
            AuthError::NotFound { .. }
        ));
        // Deleting again is not an error.
        store.delete(&cred.key()).await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_key_components_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path().join("store"));

        for (service, user_id) in [
            ("../escape", "u1"),
            ("slack", "../../etc/passwd"),
            ("sl/ack", "u1"),
            ("slack", "u\\1"),
            ("..", "u1"),
            ("", "u1"),
            ("slack", ""),
        ] {
            let err = store
                .put(&credential(service, user_id))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidKey { .. }), "{service}/{user_id}");
            let err = store
                .get(&CredentialKey::new(service, user_id))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidKey { .. }), "{service}/{user_id}");
        }

        // Nothing escaped onto disk, not even the store root.
        assert!(!tmp.path().join("store").exists());
        assert!(!tmp.path().join("escape").exists());
    }

    #[tokio::test]
    async fn test_list_enumerates_per_service() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalCredentialStore::new(tmp.path());
        store.put(&credential("slack", "u1")).await.unwrap();
        store.put(&credential("slack", "u2")).await.unwrap();
        store.put(&credential("linear", "u1")).await.unwrap();

        let keys = store.list();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], CredentialKey::new("linear", "u1"));
        assert_eq!(keys[2], CredentialKey::new("slack", "u2"));
    }

    #[tokio::test]
    async fn test_concurrent_reads_see_whole_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(LocalCredentialStore::new(tmp.path()));
        let cred = credential("slack", "u1");
        store.put(&cred).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16u64 {
            let store = store.clone();
            let mut cred = cred.clone();
            tasks.push(tokio::spawn(async move {
                cred.expires_at = Some(1_900_000_000 + i);
                store.put(&cred).await.unwrap();
                store.get(&cred.key()).await.unwrap()
            }));
        }
        for task in tasks {
            // Every observed record decodes cleanly, whichever write won.
            let seen = task.await.unwrap();
            assert_eq!(seen.access_token, "xoxb-token");
        }
    }
}
