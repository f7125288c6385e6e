//! OAuth 2.1 client authentication
//!
//! The pieces a caller normally touches are [`OAuthAuthorizer`] (discovery,
//! registration, and the interactive flows behind one call) and the
//! [`CredentialStore`] that caches tokens and client registrations on disk.
//! The remaining modules are usable on their own:
//!
//! - [`discovery`]: RFC 9728 / RFC 8414 metadata discovery
//! - [`registration`]: RFC 7591 dynamic client registration
//! - [`flow`]: grant selection and the authorization-code flow
//! - [`device`]: RFC 8628 device authorization grant
//! - [`callback`]: loopback redirect receiver
//! - [`pkce`]: RFC 7636 S256 challenges and CSRF state
//! - [`resource`]: RFC 8707 resource indicators on token requests
//! - [`refresh`]: auto-refreshing token sources
//! - [`store`]: on-disk credential cache
//! - [`token`]: token and token-response types

pub mod authorizer;
pub mod browser;
pub mod callback;
pub mod device;
pub mod discovery;
pub mod flow;
pub mod pkce;
pub mod refresh;
pub mod registration;
pub mod resource;
pub mod store;
pub mod token;

pub use authorizer::{Authorizer, OAuthAuthorizer};
pub use browser::BrowserLauncher;
pub use discovery::{discover, DiscoveredEndpoints};
pub use flow::{FlowEngine, FlowState};
pub use refresh::TokenSource;
pub use registration::ClientRegistration;
pub use store::CredentialStore;
pub use token::Token;
