//! Auto-refreshing token sources
//!
//! A [`TokenSource`] hands out a usable access token on demand. The
//! [`RefreshingTokenSource`] wraps the token produced by a flow and renews it
//! with the refresh-token grant shortly before it expires.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use url::Url;

use crate::auth::resource::ResourceInjector;
use crate::auth::token::{read_token_response, Token};
use crate::error::{AuthError, Result};
use crate::transport::{post_form, HttpSend};

/// Tokens this many seconds from expiry are refreshed before use.
pub const REFRESH_WINDOW_SECS: i64 = 10;

/// Produces a currently usable access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns the current token, refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the token has expired and cannot be renewed.
    async fn token(&self) -> Result<Token>;
}

/// A token source that renews its token with the refresh-token grant.
///
/// A token without an expiry is treated as long-lived and returned as-is.
///
/// # Examples
///
/// ```
/// use mcpauth::auth::refresh::{RefreshingTokenSource, TokenSource};
/// use mcpauth::auth::Token;
///
/// # tokio_test::block_on(async {
/// let token = Token {
///     access_token: "long-lived".to_string(),
///     refresh_token: None,
///     token_type: "Bearer".to_string(),
///     expiry: None,
///     scopes: vec![],
/// };
/// let source = RefreshingTokenSource::new(
///     reqwest::Client::new(),
///     url::Url::parse("https://auth.example.com/token").unwrap(),
///     "client-1",
///     None,
///     "https://api.example.com/mcp",
///     token,
/// );
/// assert_eq!(source.token().await.unwrap().access_token, "long-lived");
/// # });
/// ```
pub struct RefreshingTokenSource<S> {
    http: ResourceInjector<S>,
    token_url: Url,
    client_id: String,
    client_secret: Option<String>,
    current: Mutex<Token>,
}

impl<S: HttpSend + 'static> RefreshingTokenSource<S> {
    /// Creates a source seeded with `token`.
    pub fn new(
        http: S,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        resource: impl Into<String>,
        token: Token,
    ) -> Self {
        Self {
            http: ResourceInjector::new(http, resource),
            token_url,
            client_id: client_id.into(),
            client_secret,
            current: Mutex::new(token),
        }
    }

    /// Boxes the source behind the [`TokenSource`] trait.
    pub fn into_shared(self) -> Arc<dyn TokenSource> {
        Arc::new(self)
    }

    async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("resource", self.http.resource()),
        ];
        if !self.client_id.is_empty() {
            params.push(("client_id", self.client_id.as_str()));
        }
        if let Some(secret) = self.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        tracing::debug!(endpoint = %self.token_url, "Refreshing access token");
        let response = self.http.send(post_form(&self.token_url, &params)).await?;
        read_token_response(response, scopes).await
    }
}

#[async_trait]
impl<S: HttpSend + 'static> TokenSource for RefreshingTokenSource<S> {
    async fn token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;

        let window = Duration::seconds(REFRESH_WINDOW_SECS);
        if current.expiry.is_none() || !current.expires_within(window, Utc::now()) {
            return Ok(current.clone());
        }

        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            AuthError::Protocol("access token expired and no refresh token is available".into())
        })?;

        let mut renewed = self.refresh(&refresh_token, &current.scopes).await?;
        // RFC 6749 section 6: the old refresh token stays valid when no new
        // one is issued.
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }

        tracing::info!("Access token refreshed");
        *current = renewed.clone();
        Ok(renewed)
    }
}
