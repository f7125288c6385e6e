//! Loopback redirect receiver for the authorization-code flow
//!
//! [`CallbackServer`] binds `127.0.0.1:<port>`, serves a single
//! `GET /callback` route with axum, and hands the first meaningful callback
//! to the waiting flow through a one-shot slot. The wait races that slot
//! against cancellation and a deadline; whichever fires first decides the
//! outcome.
//!
//! The `state` check happens in the handler so the browser is told right
//! away when a callback is rejected. Everything reflected into the HTML
//! response is escaped, since `error_description` is attacker-controllable.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};

/// Upper bound on graceful shutdown of the loopback server.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type CallbackOutcome = std::result::Result<String, AuthError>;

/// Query parameters of the redirect (RFC 6749 sections 4.1.2 and 4.1.2.1).
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
}

// ---------------------------------------------------------------------------
// CallbackServer
// ---------------------------------------------------------------------------

/// A running loopback server waiting for one authorization callback.
///
/// Dropping the server stops it as well, but without the bounded wait that
/// [`CallbackServer::shutdown`] provides.
pub struct CallbackServer {
    addr: SocketAddr,
    result: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Binds `127.0.0.1:<port>` (`0` picks an ephemeral port) and starts
    /// serving `/callback`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when the port cannot be bound.
    pub async fn start(port: u16, expected_state: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| {
                AuthError::Config(format!("failed to bind callback listener on port {port}: {e}"))
            })?;
        let addr = listener.local_addr().map_err(|e| {
            AuthError::Config(format!("failed to read callback listener address: {e}"))
        })?;

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            slot: Arc::new(Mutex::new(Some(result_tx))),
        };
        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state);

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!("Callback server error: {}", e);
            }
        });

        tracing::debug!(%addr, "Callback server listening");
        Ok(Self {
            addr,
            result: Some(result_rx),
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The redirect URI to send to the authorization server.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.addr.port())
    }

    /// Waits for the authorization code.
    ///
    /// # Errors
    ///
    /// - [`AuthError::StateMismatch`] when the callback's `state` differs
    ///   from the expected one.
    /// - [`AuthError::AuthorizationDenied`] when the server redirected with
    ///   an `error`.
    /// - [`AuthError::Cancelled`] when `cancel` fires first.
    /// - [`AuthError::AuthorizationTimeout`] when `timeout` elapses first.
    pub async fn wait_for_code(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<String> {
        let result = self.result.take().ok_or_else(|| {
            AuthError::Protocol("authorization callback already consumed".to_string())
        })?;

        tokio::select! {
            outcome = result => match outcome {
                Ok(Ok(code)) => Ok(code),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(AuthError::Protocol(
                    "callback server stopped before a callback arrived".to_string(),
                )
                .into()),
            },
            _ = cancel.cancelled() => Err(AuthError::Cancelled.into()),
            _ = tokio::time::sleep(timeout) => Err(AuthError::AuthorizationTimeout.into()),
        }
    }

    /// Stops the server, waiting at most [`SHUTDOWN_TIMEOUT`] for open
    /// connections to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            tracing::warn!("Callback server did not stop within {:?}; aborting", SHUTDOWN_TIMEOUT);
            self.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let Some(outcome) = evaluate(&params, &state.expected_state) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("The callback did not include an authorization code.")),
        );
    };

    let page = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE.to_string())),
        Err(AuthError::StateMismatch { .. }) => (
            StatusCode::BAD_REQUEST,
            Html(error_page(
                "The state parameter did not match. Authorization was aborted.",
            )),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Html(error_page(&e.to_string()))),
    };

    let sender = state.slot.lock().ok().and_then(|mut slot| slot.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => tracing::debug!("Ignoring repeated authorization callback"),
    }
    page
}

/// Interprets callback parameters against the expected `state`.
///
/// Returns `None` for requests that carry neither a code nor an error, so a
/// stray request cannot end the wait.
fn evaluate(params: &CallbackParams, expected_state: &str) -> Option<CallbackOutcome> {
    let error = params.error.as_deref().filter(|e| !e.is_empty());
    let code = params.code.as_deref().filter(|c| !c.is_empty());
    if error.is_none() && code.is_none() {
        return None;
    }

    // Error redirects are checked too, so a forged denial cannot end the wait.
    let received = params.state.as_deref().unwrap_or_default();
    if received != expected_state {
        return Some(Err(AuthError::StateMismatch {
            expected: expected_state.to_string(),
            received: received.to_string(),
        }));
    }

    match (error, code) {
        (Some(error), _) => {
            let message = match params.error_description.as_deref() {
                Some(description) if !description.is_empty() => format!("{error}: {description}"),
                _ => error.to_string(),
            };
            Some(Err(AuthError::AuthorizationDenied(message)))
        }
        (None, code) => code.map(|code| Ok(code.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Authorization complete</title></head>
<body>
<h1>Authorization complete</h1>
<p>You can close this window and return to the terminal.</p>
</body>
</html>"#;

fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Authorization failed</title></head>
<body>
<h1>Authorization failed</h1>
<p>{}</p>
</body>
</html>"#,
        html_escape(message)
    )
}

/// Escapes text for inclusion in HTML element content or attribute values.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
