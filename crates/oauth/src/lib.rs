//! Credential lifecycle management for toolgate service integrations.
//!
//! Acquires, persists, validates, and refreshes OAuth (and API-key)
//! credentials for each (service, user) pair, behind a backend-agnostic
//! [`AuthClient`] facade so tool wrappers never see a stale or half-written
//! token.

pub mod callback_server;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod refresh;
pub mod storage;
pub mod types;

pub use callback_server::CallbackServer;
pub use client::AuthClient;
pub use error::{AuthError, AuthResult};
pub use flow::OAuthFlow;
pub use refresh::{RefreshCoordinator, RefreshPolicy};
pub use storage::{CredentialStore, LocalCredentialStore, RemoteCredentialStore};
pub use types::{Credential, CredentialKey, GrantVariant, OAuthConfig, PkceChallenge};
