//! End-to-end authorization for one protected resource
//!
//! [`OAuthAuthorizer`] turns a possibly incomplete [`AuthConfig`] into a
//! token. The first call resolves the configuration once: it validates it,
//! discovers missing endpoints, and registers a client when no `client_id`
//! is configured. Later calls reuse the resolved configuration. A stale
//! token that still has a refresh token is renewed before falling back to
//! the interactive flow.
//!
//! The [`Authorizer`] trait is the seam the authenticating transport
//! depends on, so tests can substitute a scripted implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::auth::browser::{system_browser, BrowserLauncher};
use crate::auth::discovery::discover;
use crate::auth::flow::FlowEngine;
use crate::auth::refresh::{RefreshingTokenSource, TokenSource};
use crate::auth::registration::ClientRegistrar;
use crate::auth::store::CredentialStore;
use crate::auth::token::Token;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::transport::{parse_url, HttpSend};

/// Obtains tokens for a protected resource.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Produces a fresh token.
    ///
    /// `previous` is the last token held for the resource, if any. An
    /// implementation may renew it instead of running an interactive flow.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the attempt; [`AuthError::Cancelled`]
    /// when `cancel` fires.
    async fn authorize(&self, previous: Option<Token>, cancel: &CancellationToken) -> Result<Token>;

    /// Wraps `token` in an auto-refreshing source, when the authorizer knows
    /// how to renew it.
    async fn token_source(&self, token: Token) -> Option<Arc<dyn TokenSource>>;
}

// ---------------------------------------------------------------------------
// OAuthAuthorizer
// ---------------------------------------------------------------------------

/// The production [`Authorizer`]: discovery, registration, and the flow
/// engine wired together.
pub struct OAuthAuthorizer<S> {
    http: S,
    config: AuthConfig,
    store: CredentialStore,
    browser: Arc<dyn BrowserLauncher>,
    resolved: Mutex<Option<AuthConfig>>,
}

impl<S: HttpSend + Clone + 'static> OAuthAuthorizer<S> {
    /// Creates an authorizer for `config`.
    ///
    /// `store` caches client registrations; token caching is the
    /// transport's concern.
    pub fn new(http: S, config: AuthConfig, store: CredentialStore) -> Self {
        Self {
            http,
            config,
            store,
            browser: system_browser(),
            resolved: Mutex::new(None),
        }
    }

    /// Replaces the browser launcher used by the authorization-code flow.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Returns the configuration with endpoints and client identity filled
    /// in, resolving it on first use.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] when the configuration is invalid, the
    ///   resource does not challenge for credentials and no endpoints are
    ///   configured, or no client identity can be obtained.
    /// - Discovery and registration errors as returned by those components.
    pub async fn resolve_config(&self) -> Result<AuthConfig> {
        let mut resolved = self.resolved.lock().await;
        if let Some(config) = resolved.as_ref() {
            return Ok(config.clone());
        }

        self.config.validate()?;
        let mut config = self.config.clone();

        if config.needs_discovery() {
            tracing::info!(resource = %config.resource_uri, "Discovering OAuth endpoints");
            match discover(&self.http, &config.resource_uri).await? {
                Some(found) => config = config.merge_discovered(&found),
                None => {
                    return Err(AuthError::Config(format!(
                        "{} did not ask for OAuth credentials and no endpoints are configured",
                        config.resource_uri
                    ))
                    .into())
                }
            }
        }

        if config.client_id.is_empty() {
            if !config.allow_dynamic_registration {
                return Err(AuthError::Config(
                    "no client_id configured and dynamic registration is disabled".to_string(),
                )
                .into());
            }
            let registration = ClientRegistrar::new(&self.http, &self.store)
                .ensure_registered(
                    config.registration_endpoint(),
                    &config.resource_uri,
                    &config.requested_scopes(),
                )
                .await?;
            config = config.with_registration(&registration);
        }

        *resolved = Some(config.clone());
        Ok(config)
    }

    fn refreshing_source(&self, config: &AuthConfig, token: Token) -> Result<RefreshingTokenSource<S>> {
        let raw = config
            .token_endpoint()
            .ok_or_else(|| AuthError::Config("no token endpoint configured".to_string()))?;
        Ok(RefreshingTokenSource::new(
            self.http.clone(),
            parse_url(raw, "token endpoint")?,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.resource_uri.clone(),
            token,
        ))
    }
}

#[async_trait]
impl<S: HttpSend + Clone + 'static> Authorizer for OAuthAuthorizer<S> {
    async fn authorize(&self, previous: Option<Token>, cancel: &CancellationToken) -> Result<Token> {
        let config = self.resolve_config().await?;

        if let Some(stale) = previous.filter(|t| t.refresh_token.is_some() && t.expiry.is_some()) {
            let renewed = match self.refreshing_source(&config, stale) {
                Ok(source) => source.token().await,
                Err(e) => Err(e),
            };
            match renewed {
                Ok(token) => return Ok(token),
                Err(e) => tracing::warn!("Token refresh failed, starting a new authorization: {:#}", e),
            }
        }

        FlowEngine::new(self.http.clone(), config)
            .with_browser(Arc::clone(&self.browser))
            .run(cancel)
            .await
    }

    async fn token_source(&self, token: Token) -> Option<Arc<dyn TokenSource>> {
        let config = self.resolve_config().await.ok()?;
        match self.refreshing_source(&config, token) {
            Ok(source) => Some(source.into_shared()),
            Err(e) => {
                tracing::debug!("Token will not auto-refresh: {:#}", e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
