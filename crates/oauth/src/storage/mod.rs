//! Durable credential persistence, polymorphic over a local file-backed
//! store and a networked store. Callers never learn which backend answered.

mod local;
mod remote;

pub use local::LocalCredentialStore;
pub use remote::RemoteCredentialStore;

use async_trait::async_trait;

use crate::{
    error::AuthResult,
    types::{Credential, CredentialKey},
};

/// Key-value persistence of one [`Credential`] per (service, user).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential for `key`. Fails with `NotFound` when nothing
    /// has been stored, `CredentialCorrupt` when the record cannot be
    /// decoded.
    async fn get(&self, key: &CredentialKey) -> AuthResult<Credential>;

    /// Persist `credential`, replacing any existing record for its key
    /// atomically. Idempotent on identical input.
    async fn put(&self, credential: &Credential) -> AuthResult<()>;

    /// Remove the credential for `key`. Removing a missing key is not an
    /// error.
    async fn delete(&self, key: &CredentialKey) -> AuthResult<()>;

    /// Whether credentials returned by `get` are already refreshed
    /// server-side, making the local refresh coordinator unnecessary.
    fn refreshes_server_side(&self) -> bool {
        false
    }
}
