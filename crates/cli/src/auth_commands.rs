use anyhow::Result;
use clap::Subcommand;
use toolgate_oauth::{AuthClient, CredentialStore, LocalCredentialStore};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authorize a service for a user via OAuth.
    Login {
        /// Service name (e.g. "slack", "linear").
        #[arg(long)]
        service: String,
        /// User identifier the credentials belong to.
        #[arg(long, default_value = "local")]
        user: String,
        /// Scopes to request (defaults to the service config's scopes).
        #[arg(long)]
        scope: Vec<String>,
    },
    /// Show stored credentials and their expiry.
    Status,
    /// Revoke stored credentials for a service.
    Logout {
        /// Service name (e.g. "slack", "linear").
        #[arg(long)]
        service: String,
        /// User identifier the credentials belong to.
        #[arg(long, default_value = "local")]
        user: String,
    },
}

pub async fn handle_auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login {
            service,
            user,
            scope,
        } => login(&service, &user, &scope).await,
        AuthAction::Status => status().await,
        AuthAction::Logout { service, user } => logout(&service, &user).await,
    }
}

async fn login(service: &str, user: &str, scopes: &[String]) -> Result<()> {
    let client = AuthClient::from_env()?;
    let url = client.begin_authorization(service, user, scopes).await?;

    println!("Opening browser for authentication...");
    if open::that(&url).is_err() {
        println!("Could not open browser. Please visit:\n{url}");
    }

    println!("Waiting for the provider redirect...");
    let credential = client.complete_authorization(service, user).await?;

    println!(
        "Successfully logged in to {service} as {user} ({:?})",
        credential.grant_variant
    );
    Ok(())
}

async fn status() -> Result<()> {
    let store = LocalCredentialStore::from_env()?;
    let keys = store.list();
    if keys.is_empty() {
        println!("No authenticated services.");
        return Ok(());
    }
    for key in keys {
        match store.get(&key).await {
            Ok(credential) => {
                println!("{key} [{}]", expiry_note(credential.expires_at));
            },
            Err(e) => {
                println!("{key} [unreadable: {e}]");
            },
        }
    }
    Ok(())
}

fn expiry_note(expires_at: Option<u64>) -> String {
    let Some(ts) = expires_at else {
        return "no expiry".to_string();
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if ts > now {
        let remaining = ts - now;
        let hours = remaining / 3600;
        let mins = (remaining % 3600) / 60;
        format!("valid ({hours}h {mins}m remaining)")
    } else {
        "expired".to_string()
    }
}

async fn logout(service: &str, user: &str) -> Result<()> {
    let client = AuthClient::from_env()?;
    client.revoke(service, user).await?;
    println!("Logged out from {service} ({user})");
    Ok(())
}
