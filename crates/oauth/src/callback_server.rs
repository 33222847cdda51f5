//! Local HTTP listener for the OAuth redirect.
//!
//! Binds 127.0.0.1 on the redirect URI's port, waits (bounded) for the
//! provider's browser redirect, verifies the CSRF state nonce, and hands the
//! authorization code back to the flow. The listener is released on every
//! exit path: success, timeout, or error.

use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AuthError, AuthResult};

/// How long to wait for the user to complete consent in the browser.
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    tx: mpsc::Sender<AuthResult<String>>,
}

pub struct CallbackServer;

impl CallbackServer {
    /// Wait for the provider to deliver an authorization code to
    /// `127.0.0.1:{port}`, verifying the returned `state` against
    /// `expected_state`.
    pub async fn wait_for_code(
        port: u16,
        expected_state: String,
        timeout: Duration,
    ) -> AuthResult<String> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;

        let (tx, mut rx) = mpsc::channel::<AuthResult<String>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // Providers differ in the redirect path they were registered with,
        // so every path except the favicon request is treated as the
        // callback.
        let app = Router::new()
            .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
            .fallback(get(handle_callback))
            .with_state(CallbackState {
                expected_state,
                tx,
            });

        let server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .into_future(),
        );

        let outcome = tokio::time::timeout(timeout, rx.recv()).await;

        // Graceful shutdown lets the in-flight browser response flush
        // before the listener is dropped.
        let _ = shutdown_tx.send(());
        let _ = server.await;

        match outcome {
            Err(_) => Err(AuthError::AuthorizationTimeout),
            Ok(None) => Err(AuthError::AuthorizationTimeout),
            Ok(Some(result)) => result,
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> Html<String> {
    let (message, result) = match query {
        CallbackQuery {
            error: Some(error), ..
        } => (
            format!("Authentication error: {error}. You can close this window."),
            Err(AuthError::AuthorizationDenied(error)),
        ),
        CallbackQuery {
            code: Some(code),
            state: Some(echoed),
            ..
        } if echoed == state.expected_state => (
            "Authentication successful! You can close this window.".to_string(),
            Ok(code),
        ),
        CallbackQuery {
            code: Some(_),
            ..
        } => {
            tracing::warn!("redirect carried an unknown state nonce, aborting flow");
            (
                "Authentication failed: state mismatch. You can close this window.".to_string(),
                Err(AuthError::StateMismatch),
            )
        },
        _ => (
            "Authentication failed. You can close this window.".to_string(),
            Err(AuthError::AuthorizationDenied(
                "no code or error received".into(),
            )),
        ),
    };

    let _ = state.tx.send(result).await;

    Html(format!(
        "<html>\
         <head><title>toolgate authentication</title></head>\
         <body><h1>{message}</h1>\
         <script>setTimeout(function() {{ window.close(); }}, 3000);</script>\
         </body></html>"
    ))
}
