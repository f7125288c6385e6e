//! OAuth 2.0 Device Authorization Grant (RFC 8628)
//!
//! The device flow suits terminals without a usable browser: the user is
//! shown a short code and a verification URL, and the client polls the
//! token endpoint until the user approves, denies, or the code expires.
//!
//! Polling runs on a tokio interval whose first tick fires one interval
//! after the device code is issued. `slow_down` adds five seconds to the
//! interval and restarts the ticker. A tick that lands after the code's
//! lifetime ends the flow with [`AuthError::DeviceCodeExpired`].
//!
//! # References
//!
//! - RFC 8628 <https://www.rfc-editor.org/rfc/rfc8628>

use std::time::Duration;

use colored::Colorize;
use serde::Deserialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::auth::token::{read_token_response, Token};
use crate::error::{AuthError, Result};
use crate::transport::{error_excerpt, parse_url, post_form, read_limited, HttpSend, DOCUMENT_BODY_LIMIT};

/// Upper bound on the polling interval, whatever the server asks for.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Grant type used when polling the token endpoint.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Polling interval used when the server does not specify one.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Amount added to the polling interval on `slow_down`.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Device authorization response (RFC 8628 section 3.2).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    /// Some servers (Google among them) spell this `verification_url`.
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    /// Minimum seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl DeviceAuthorization {
    /// The polling interval, falling back to the default for a zero value
    /// and capped at [`MAX_POLL_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        match self.interval {
            0 => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            secs => Duration::from_secs(secs).min(MAX_POLL_INTERVAL),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceFlow
// ---------------------------------------------------------------------------

/// Client side of the device authorization grant.
pub struct DeviceFlow<'a, S: ?Sized> {
    http: &'a S,
    client_id: &'a str,
    client_secret: Option<&'a str>,
    scopes: &'a [String],
}

impl<'a, S: HttpSend + ?Sized> DeviceFlow<'a, S> {
    pub fn new(
        http: &'a S,
        client_id: &'a str,
        client_secret: Option<&'a str>,
        scopes: &'a [String],
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            scopes,
        }
    }

    /// Requests a device and user code from `device_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Protocol`] when the endpoint rejects the request
    /// or answers with something other than a device authorization
    /// response, and [`AuthError::Http`] when it cannot be reached.
    pub async fn request_code(&self, device_url: &str, resource: &str) -> Result<DeviceAuthorization> {
        let url = parse_url(device_url, "device authorization endpoint")?;
        let scope = self.scopes.join(" ");
        let mut params = vec![("client_id", self.client_id)];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }
        if !resource.is_empty() {
            params.push(("resource", resource));
        }

        tracing::info!(endpoint = %url, "Requesting device authorization");
        let response = self.http.send(post_form(&url, &params)).await?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = error_excerpt(response).await;
            return Err(AuthError::Protocol(format!(
                "device authorization endpoint returned {status}: {excerpt}"
            ))
            .into());
        }

        let body = read_limited(response, DOCUMENT_BODY_LIMIT).await?;
        serde_json::from_slice(&body).map_err(|e| {
            AuthError::Protocol(format!("failed to parse device authorization response: {e}")).into()
        })
    }

    /// Polls `token_url` until the user approves the request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::DeviceCodeExpired`] when the code's lifetime passes,
    ///   or the server reports `expired_token`.
    /// - [`AuthError::TokenEndpoint`] for any other OAuth error, including
    ///   `access_denied`.
    /// - [`AuthError::Cancelled`] when `cancel` fires.
    pub async fn poll_for_token(
        &self,
        token_url: &str,
        authorization: &DeviceAuthorization,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        let url = parse_url(token_url, "token endpoint")?;
        let mut params = vec![
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", authorization.device_code.as_str()),
            ("client_id", self.client_id),
        ];
        if let Some(secret) = self.client_secret {
            params.push(("client_secret", secret));
        }

        let start = Instant::now();
        // A lifetime too long to represent never expires.
        let deadline = start.checked_add(Duration::from_secs(authorization.expires_in));
        let mut interval = authorization.poll_interval();
        let mut ticker = interval_at(start + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return Err(AuthError::Cancelled.into()),
            }

            if deadline.is_some_and(|deadline| Instant::now() > deadline) {
                tracing::debug!(polls, "Device code expired");
                return Err(AuthError::DeviceCodeExpired.into());
            }

            polls += 1;
            tracing::debug!(polls, "Polling token endpoint");
            let response = self.http.send(post_form(&url, &params)).await?;

            match read_token_response(response, self.scopes).await {
                Ok(token) => {
                    tracing::info!(polls, "Device authorization approved");
                    return Ok(token);
                }
                Err(err) => match err.downcast_ref::<AuthError>() {
                    Some(AuthError::TokenEndpoint { error, .. }) => match error.as_str() {
                        "authorization_pending" => {
                            tracing::debug!("authorization_pending; continuing to poll");
                        }
                        "slow_down" => {
                            interval = (interval + SLOW_DOWN_INCREMENT).min(MAX_POLL_INTERVAL);
                            tracing::debug!(?interval, "slow_down received; increasing poll interval");
                            ticker = interval_at(Instant::now() + interval, interval);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                        "expired_token" => return Err(AuthError::DeviceCodeExpired.into()),
                        _ => return Err(err),
                    },
                    _ => return Err(err),
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal prompt
// ---------------------------------------------------------------------------

/// Renders the user instructions inside a box-drawing frame.
pub fn render_device_prompt(authorization: &DeviceAuthorization) -> String {
    let mut lines = vec![
        "To authorize this device, visit:".to_string(),
        format!("  {}", authorization.verification_uri),
        String::new(),
        "and enter the code:".to_string(),
        format!("  {}", authorization.user_code),
    ];
    if let Some(complete) = &authorization.verification_uri_complete {
        lines.push(String::new());
        lines.push("Or open this link directly:".to_string());
        lines.push(format!("  {complete}"));
    }

    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let rule = "─".repeat(width + 2);

    let mut out = format!("┌{rule}┐\n");
    for line in &lines {
        let pad = width - line.chars().count();
        out.push_str(&format!("│ {line}{} │\n", " ".repeat(pad)));
    }
    out.push_str(&format!("└{rule}┘"));
    out
}

/// Prints the device prompt to stderr.
pub fn print_device_prompt(authorization: &DeviceAuthorization) {
    eprintln!();
    eprintln!("{}", "Device authorization required".bold());
    eprintln!("{}", render_device_prompt(authorization));
    eprintln!("Waiting for authorization...");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
