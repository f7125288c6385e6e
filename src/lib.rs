//! mcpauth - OAuth 2.1 client authentication library
//!
//! This library obtains and maintains OAuth bearer tokens for HTTP
//! resources that demand them, and attaches those tokens to outgoing
//! requests.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: Discovery, client registration, the interactive flows, and
//!   the credential store
//! - `transport`: The `HttpSend` abstraction and the authenticating sender
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `logging`: Tracing subscriber setup for the binary
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcpauth::auth::{CredentialStore, OAuthAuthorizer};
//! use mcpauth::config::AuthConfig;
//! use mcpauth::transport::{get_json, AuthenticatingTransport, HttpSend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::new("https://api.example.com/mcp");
//!     config.validate()?;
//!
//!     let http = reqwest::Client::new();
//!     let store = CredentialStore::new()?;
//!     let authorizer = OAuthAuthorizer::new(http.clone(), config.clone(), store.clone());
//!     let transport =
//!         AuthenticatingTransport::new(http, Arc::new(authorizer), &config.resource_uri, Some(store));
//!
//!     let url = url::Url::parse(&config.resource_uri)?;
//!     let response = transport.send(get_json(&url)).await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod transport;

// Re-export commonly used types
pub use auth::{Authorizer, CredentialStore, OAuthAuthorizer, Token};
pub use config::{AuthConfig, FlowType};
pub use error::{AuthError, Result};
pub use transport::{AuthenticatingTransport, HttpSend};
