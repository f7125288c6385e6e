//! Interactive OAuth 2.1 flows
//!
//! [`FlowEngine`] takes a fully resolved [`AuthConfig`] (endpoints known,
//! client identity known) and runs one grant to completion:
//!
//! 1. Select the grant ([`select_flow`]): an explicit non-`auto` choice wins;
//!    otherwise a device endpoint selects the device flow and an
//!    authorization endpoint selects the authorization-code flow.
//! 2. Authorization code: generate PKCE and `state`, start the loopback
//!    callback server, open the authorization URL, wait for the code, and
//!    exchange it at the token endpoint.
//! 3. Device: request a user code, print it, and poll the token endpoint.
//!
//! All token-endpoint traffic goes through a
//! [`ResourceInjector`](crate::auth::resource::ResourceInjector), so every
//! token request carries the RFC 8707 `resource` parameter.
//!
//! # References
//!
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>
//! - RFC 8707 Resource Indicators <https://www.rfc-editor.org/rfc/rfc8707>

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::browser::{system_browser, BrowserLauncher};
use crate::auth::callback::CallbackServer;
use crate::auth::device::{print_device_prompt, DeviceFlow};
use crate::auth::pkce;
use crate::auth::resource::ResourceInjector;
use crate::auth::token::{read_token_response, Token};
use crate::config::{AuthConfig, FlowType};
use crate::error::{AuthError, Result};
use crate::transport::{parse_url, post_form, HttpSend};

/// How long to wait for the browser redirect.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Progress of a single flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    DiscoveringFlowType,
    AuthCodePending,
    DevicePending,
    Exchanging,
    Complete,
    Failed,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::DiscoveringFlowType => "discovering-flow-type",
            FlowState::AuthCodePending => "auth-code-pending",
            FlowState::DevicePending => "device-pending",
            FlowState::Exchanging => "exchanging",
            FlowState::Complete => "complete",
            FlowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(state: &mut FlowState, next: FlowState) {
    tracing::debug!(from = %state, to = %next, "OAuth flow state transition");
    *state = next;
}

/// Chooses the grant to run for `config`.
///
/// # Errors
///
/// - [`AuthError::NotImplemented`] for [`FlowType::ClientCredentials`].
/// - [`AuthError::Config`] when `auto` finds neither a device nor an
///   authorization endpoint.
pub fn select_flow(config: &AuthConfig) -> Result<FlowType> {
    match config.flow {
        FlowType::ClientCredentials => {
            Err(AuthError::NotImplemented("client-credentials".to_string()).into())
        }
        FlowType::AuthorizationCode => Ok(FlowType::AuthorizationCode),
        FlowType::Device => Ok(FlowType::Device),
        FlowType::Auto => {
            if config.device_endpoint().is_some() {
                Ok(FlowType::Device)
            } else if config.auth_endpoint().is_some() {
                Ok(FlowType::AuthorizationCode)
            } else {
                Err(AuthError::Config(
                    "no authorization or device authorization endpoint available".to_string(),
                )
                .into())
            }
        }
    }
}

/// Builds the authorization request URL (OAuth 2.1 section 4.1.1).
pub fn build_authorization_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    challenge: &pkce::PkceChallenge,
    resource: &str,
) -> Result<Url> {
    let mut url = parse_url(auth_endpoint, "authorization endpoint")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", redirect_uri);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
        query.append_pair("state", state);
        query.append_pair("code_challenge", &challenge.challenge);
        query.append_pair("code_challenge_method", challenge.method());
        query.append_pair("resource", resource);
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// Runs one interactive OAuth grant.
///
/// # Examples
///
/// ```no_run
/// use mcpauth::auth::flow::FlowEngine;
/// use mcpauth::config::AuthConfig;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> mcpauth::error::Result<()> {
/// let mut config = AuthConfig::new("https://api.example.com/mcp");
/// config.client_id = "my-client".to_string();
/// config.auth_url = Some("https://auth.example.com/authorize".to_string());
/// config.token_url = Some("https://auth.example.com/token".to_string());
///
/// let mut engine = FlowEngine::new(reqwest::Client::new(), config);
/// let token = engine.run(&CancellationToken::new()).await?;
/// println!("token expires at {:?}", token.expiry);
/// # Ok(())
/// # }
/// ```
pub struct FlowEngine<S> {
    http: ResourceInjector<S>,
    config: AuthConfig,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: Duration,
    state: FlowState,
}

impl<S: HttpSend> FlowEngine<S> {
    /// Creates an engine for `config`, sending through `http`.
    pub fn new(http: S, config: AuthConfig) -> Self {
        let resource = config.resource_uri.clone();
        Self {
            http: ResourceInjector::new(http, resource),
            config,
            browser: system_browser(),
            callback_timeout: CALLBACK_TIMEOUT,
            state: FlowState::Idle,
        }
    }

    /// Replaces the browser launcher.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Replaces the browser callback deadline.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// The current flow state.
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Runs the selected grant and returns the issued token.
    ///
    /// # Errors
    ///
    /// Returns the first error of the selected grant; the engine ends in
    /// [`FlowState::Failed`].
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Token> {
        transition(&mut self.state, FlowState::DiscoveringFlowType);

        let result = match select_flow(&self.config) {
            Ok(FlowType::Device) => self.run_device(cancel).await,
            Ok(_) => self.run_authorization_code(cancel).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                transition(&mut self.state, FlowState::Complete);
                tracing::info!(resource = %self.config.resource_uri, "OAuth flow completed");
            }
            Err(e) => {
                transition(&mut self.state, FlowState::Failed);
                tracing::debug!("OAuth flow failed: {:#}", e);
            }
        }
        result
    }

    async fn run_authorization_code(&mut self, cancel: &CancellationToken) -> Result<Token> {
        let auth_endpoint = self
            .config
            .auth_endpoint()
            .ok_or_else(|| AuthError::Config("no authorization endpoint configured".to_string()))?
            .to_string();
        let token_url = self.token_url()?;
        let client_id = self.client_id()?;
        let resource = self.config.resource_uri.clone();
        let scopes = self.config.requested_scopes();

        let challenge = pkce::generate();
        let state = pkce::generate_state();

        let mut server = CallbackServer::start(self.config.redirect_port, &state).await?;
        let redirect_uri = server.redirect_uri();

        let url = match build_authorization_url(
            &auth_endpoint,
            &client_id,
            &redirect_uri,
            &scopes,
            &state,
            &challenge,
            &resource,
        ) {
            Ok(url) => url,
            Err(e) => {
                server.shutdown().await;
                return Err(e);
            }
        };

        transition(&mut self.state, FlowState::AuthCodePending);
        tracing::info!(port = server.port(), "Starting authorization code flow");
        eprintln!("Open the following URL in your browser to authorize:\n{}", url);
        if let Err(e) = self.browser.open(url.as_str()) {
            tracing::warn!("Could not open a browser: {}", e);
        }

        let code = server.wait_for_code(cancel, self.callback_timeout).await;
        server.shutdown().await;
        let code = code?;

        transition(&mut self.state, FlowState::Exchanging);
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("code_verifier", challenge.verifier.as_str()),
            ("resource", resource.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self.http.send(post_form(&token_url, &params)).await?;
        read_token_response(response, &scopes).await
    }

    async fn run_device(&mut self, cancel: &CancellationToken) -> Result<Token> {
        let device_url = self
            .config
            .device_endpoint()
            .or_else(|| self.config.auth_endpoint())
            .ok_or_else(|| {
                AuthError::Config("no device authorization endpoint configured".to_string())
            })?
            .to_string();
        let token_url = self.token_url()?;
        let client_id = self.client_id()?;
        let scopes = self.config.requested_scopes();

        let device = DeviceFlow::new(
            &self.http,
            &client_id,
            self.config.client_secret.as_deref(),
            &scopes,
        );
        let authorization = device
            .request_code(&device_url, &self.config.resource_uri)
            .await?;

        transition(&mut self.state, FlowState::DevicePending);
        print_device_prompt(&authorization);

        device
            .poll_for_token(token_url.as_str(), &authorization, cancel)
            .await
    }

    fn token_url(&self) -> Result<Url> {
        let raw = self
            .config
            .token_endpoint()
            .ok_or_else(|| AuthError::Config("no token endpoint configured".to_string()))?;
        parse_url(raw, "token endpoint")
    }

    fn client_id(&self) -> Result<String> {
        if self.config.client_id.is_empty() {
            return Err(AuthError::Config("no client_id configured".to_string()).into());
        }
        Ok(self.config.client_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
