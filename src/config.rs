//! Configuration management for mcpauth
//!
//! This module handles loading, validating, and completing the
//! authentication configuration. Values come from a YAML file, then
//! `MCPAUTH_*` environment variables, then command-line flags, in that
//! order of increasing precedence. Endpoints left unset are filled in once
//! by discovery through [`AuthConfig::merge_discovered`]; after that the
//! configuration is not changed again.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::discovery::DiscoveredEndpoints;
use crate::auth::registration::ClientRegistration;
use crate::error::{AuthError, Result};

/// Scopes requested when neither configuration nor discovery supplies any.
pub const DEFAULT_SCOPES: &[&str] = &["openid"];

/// Default configuration file location used by the binary.
pub const DEFAULT_CONFIG_PATH: &str = "config/mcpauth.yaml";

/// OAuth grant used to obtain a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FlowType {
    /// Pick the device flow when a device endpoint is known, otherwise the
    /// authorization-code flow.
    #[default]
    Auto,
    /// Authorization code with PKCE and a loopback redirect.
    AuthorizationCode,
    /// Device authorization grant.
    Device,
    /// Client credentials grant (recognised, not implemented).
    ClientCredentials,
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowType::Auto => "auto",
            FlowType::AuthorizationCode => "authorization-code",
            FlowType::Device => "device",
            FlowType::ClientCredentials => "client-credentials",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

/// Authentication settings for one protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The protected resource; sent as the RFC 8707 `resource` parameter
    /// and used as the cache key.
    #[serde(default)]
    pub resource_uri: String,

    /// OAuth client identifier. Empty means "register dynamically".
    #[serde(default)]
    pub client_id: String,

    /// Client secret for confidential clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Requested scopes. Empty means "whatever discovery found, else the
    /// defaults".
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Loopback port for the redirect listener; `0` picks an ephemeral port.
    #[serde(default)]
    pub redirect_port: u16,

    /// Whether tokens are read from and written to the credential store.
    #[serde(default = "default_true")]
    pub use_token_cache: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_auth_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,

    /// Grant selection.
    #[serde(default)]
    pub flow: FlowType,

    /// Whether an empty `client_id` may be filled by dynamic registration.
    #[serde(default = "default_true")]
    pub allow_dynamic_registration: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl AuthConfig {
    /// Creates a configuration for `resource_uri` with every other setting
    /// at its default.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcpauth::config::{AuthConfig, FlowType};
    ///
    /// let config = AuthConfig::new("https://api.example.com/mcp");
    /// assert_eq!(config.flow, FlowType::Auto);
    /// assert!(config.needs_discovery());
    /// assert_eq!(config.requested_scopes(), vec!["openid".to_string()]);
    /// ```
    pub fn new(resource_uri: impl Into<String>) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            client_id: String::new(),
            client_secret: None,
            scopes: Vec::new(),
            redirect_port: 0,
            use_token_cache: true,
            auth_url: None,
            device_auth_url: None,
            token_url: None,
            registration_url: None,
            flow: FlowType::Auto,
            allow_dynamic_registration: true,
        }
    }

    /// Loads configuration from `path` (defaults if the file is missing),
    /// then applies environment variables and command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parses a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when the file cannot be read or parsed.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Applies `MCPAUTH_*` environment overrides. Invalid values are logged
    /// and ignored.
    pub fn apply_env_vars(&mut self) {
        if let Ok(client_id) = std::env::var("MCPAUTH_CLIENT_ID") {
            self.client_id = client_id;
        }

        if let Ok(secret) = std::env::var("MCPAUTH_CLIENT_SECRET") {
            self.client_secret = Some(secret).filter(|s| !s.is_empty());
        }

        if let Ok(scopes) = std::env::var("MCPAUTH_SCOPES") {
            self.scopes = scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(flow) = std::env::var("MCPAUTH_FLOW") {
            match FlowType::from_str(&flow, true) {
                Ok(value) => self.flow = value,
                Err(_) => tracing::warn!("Invalid MCPAUTH_FLOW: {}", flow),
            }
        }

        if let Ok(port) = std::env::var("MCPAUTH_REDIRECT_PORT") {
            if let Ok(value) = port.parse() {
                self.redirect_port = value;
            } else {
                tracing::warn!("Invalid MCPAUTH_REDIRECT_PORT: {}", port);
            }
        }

        if let Ok(url) = std::env::var("MCPAUTH_AUTH_URL") {
            self.auth_url = Some(url);
        }

        if let Ok(url) = std::env::var("MCPAUTH_DEVICE_AUTH_URL") {
            self.device_auth_url = Some(url);
        }

        if let Ok(url) = std::env::var("MCPAUTH_TOKEN_URL") {
            self.token_url = Some(url);
        }

        if let Ok(url) = std::env::var("MCPAUTH_REGISTRATION_URL") {
            self.registration_url = Some(url);
        }

        if let Ok(no_cache) = std::env::var("MCPAUTH_NO_TOKEN_CACHE") {
            match no_cache.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.use_token_cache = false,
                "0" | "false" | "no" => self.use_token_cache = true,
                _ => tracing::warn!("Invalid value for MCPAUTH_NO_TOKEN_CACHE: {}", no_cache),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(resource) = &cli.resource {
            self.resource_uri = resource.clone();
        }
        if let Some(flow) = cli.flow {
            self.flow = flow;
        }
        if let Some(client_id) = &cli.client_id {
            self.client_id = client_id.clone();
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when the resource URI is missing or not
    /// an http(s) URL, a scope is blank, or a configured endpoint is not a
    /// valid http(s) URL.
    pub fn validate(&self) -> Result<()> {
        if self.resource_uri.trim().is_empty() {
            return Err(AuthError::Config("resource_uri cannot be empty".to_string()).into());
        }
        check_http_url(&self.resource_uri, "resource_uri")?;

        if self.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(AuthError::Config("scopes cannot contain blank entries".to_string()).into());
        }

        for (name, value) in [
            ("auth_url", &self.auth_url),
            ("device_auth_url", &self.device_auth_url),
            ("token_url", &self.token_url),
            ("registration_url", &self.registration_url),
        ] {
            if let Some(url) = non_empty(value) {
                check_http_url(url, name)?;
            }
        }

        Ok(())
    }

    /// True when neither an authorization nor a device endpoint is known.
    pub fn needs_discovery(&self) -> bool {
        non_empty(&self.auth_url).is_none() && non_empty(&self.device_auth_url).is_none()
    }

    /// Fills unset endpoints and scopes from discovery. Explicitly configured
    /// values always win.
    pub fn merge_discovered(mut self, discovered: &DiscoveredEndpoints) -> Self {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if non_empty(slot).is_none() {
                if let Some(value) = non_empty(value) {
                    *slot = Some(value.to_string());
                }
            }
        }

        fill(&mut self.auth_url, &discovered.auth_url);
        fill(&mut self.device_auth_url, &discovered.device_auth_url);
        fill(&mut self.token_url, &discovered.token_url);
        fill(&mut self.registration_url, &discovered.registration_url);
        if self.scopes.is_empty() {
            self.scopes = discovered.scopes.clone();
        }

        tracing::debug!(
            issuer = ?discovered.issuer,
            auth_url = ?self.auth_url,
            device_auth_url = ?self.device_auth_url,
            token_url = ?self.token_url,
            "Merged discovered endpoints"
        );
        self
    }

    /// Adopts the client identity from a dynamic registration.
    pub fn with_registration(mut self, registration: &ClientRegistration) -> Self {
        self.client_id = registration.client_id.clone();
        self.client_secret = registration.client_secret.clone();
        self
    }

    /// The scopes to put on the wire: the configured ones, or
    /// [`DEFAULT_SCOPES`] when none are set.
    pub fn requested_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            self.scopes.clone()
        }
    }

    /// The authorization endpoint, if set and non-empty.
    pub fn auth_endpoint(&self) -> Option<&str> {
        non_empty(&self.auth_url)
    }

    /// The device authorization endpoint, if set and non-empty.
    pub fn device_endpoint(&self) -> Option<&str> {
        non_empty(&self.device_auth_url)
    }

    /// The token endpoint, if set and non-empty.
    pub fn token_endpoint(&self) -> Option<&str> {
        non_empty(&self.token_url)
    }

    /// The registration endpoint, if set and non-empty.
    pub fn registration_endpoint(&self) -> Option<&str> {
        non_empty(&self.registration_url)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn check_http_url(raw: &str, name: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| AuthError::Config(format!("{name} is not a valid URL ({raw}): {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AuthError::Config(format!(
            "{name} must use http or https, got {other}: {raw}"
        ))
        .into()),
    }
}
