//! Error types for mcpauth
//!
//! This module defines the error taxonomy used by every authentication
//! component, using `thiserror` for ergonomic error handling.
//!
//! Variants are grouped by how callers are expected to react:
//!
//! - Configuration errors ([`AuthError::Config`], [`AuthError::NotImplemented`])
//!   are fatal and never retried.
//! - Discovery errors ([`AuthError::Discovery`]) are only produced once every
//!   discovery strategy has been exhausted.
//! - Flow errors ([`AuthError::Registration`], [`AuthError::TokenEndpoint`],
//!   [`AuthError::Protocol`], [`AuthError::Http`]) end the current flow
//!   attempt.
//! - Security errors ([`AuthError::StateMismatch`],
//!   [`AuthError::PkceUnsupported`]) are always fatal.
//!
//! The enum is `Clone` so that the outcome of a single-flight authorization
//! can be handed to every waiting caller.

use thiserror::Error;

/// Main error type for mcpauth operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or invalid configuration (endpoint, resource URI, flow)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A recognised but unimplemented grant type was selected
    #[error("OAuth flow not yet implemented: {0}")]
    NotImplemented(String),

    /// Every discovery strategy failed
    #[error("OAuth discovery failed: {0}")]
    Discovery(String),

    /// Dynamic client registration failed
    #[error("Client registration failed: {0}")]
    Registration(String),

    /// The token endpoint returned an OAuth error response
    #[error("Token endpoint error: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenEndpoint {
        /// The RFC 6749 `error` code
        error: String,
        /// The optional `error_description`
        description: Option<String>,
    },

    /// A response could not be parsed or violated the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network-level failure talking to an OAuth endpoint
    #[error("HTTP error: {0}")]
    Http(String),

    /// The `state` returned to the callback did not match the one sent
    #[error("OAuth state mismatch in callback (possible CSRF): expected {expected}, got {received}")]
    StateMismatch {
        /// The state generated for the authorization request
        expected: String,
        /// The state received on the callback
        received: String,
    },

    /// The authorization server does not advertise PKCE `S256`
    #[error("PKCE S256 not supported by authorization server")]
    PkceUnsupported,

    /// The authorization server reported an error on the redirect callback
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The device code expired before the user approved the request
    #[error("device code expired before authorization completed")]
    DeviceCodeExpired,

    /// The browser callback did not arrive in time
    #[error("timed out waiting for authorization callback")]
    AuthorizationTimeout,

    /// The caller cancelled the operation
    #[error("authorization cancelled")]
    Cancelled,

    /// Credential store I/O failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Extracts an [`AuthError`] from an `anyhow::Error`, wrapping any other
    /// error kind as [`AuthError::Protocol`] with its full context chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<AuthError>() {
            Some(auth) => auth.clone(),
            None => AuthError::Protocol(format!("{err:#}")),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Http(err.to_string())
    }
}

/// Result type alias for mcpauth operations
///
/// Uses `anyhow::Error` so callers can attach context while still being
/// able to `downcast_ref::<AuthError>()` for the typed cause.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = AuthError::Config("resource URI is required".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: resource URI is required"
        );
    }

    #[test]
    fn test_token_endpoint_error_display_with_description() {
        let error = AuthError::TokenEndpoint {
            error: "invalid_grant".to_string(),
            description: Some("code expired".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Token endpoint error: invalid_grant (code expired)"
        );
    }

    #[test]
    fn test_token_endpoint_error_display_without_description() {
        let error = AuthError::TokenEndpoint {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(error.to_string(), "Token endpoint error: access_denied");
    }

    #[test]
    fn test_state_mismatch_mentions_csrf() {
        let error = AuthError::StateMismatch {
            expected: "B".to_string(),
            received: "A".to_string(),
        };
        assert!(error.to_string().contains("CSRF"));
    }

    #[test]
    fn test_not_implemented_display() {
        let error = AuthError::NotImplemented("client-credentials".to_string());
        assert_eq!(
            error.to_string(),
            "OAuth flow not yet implemented: client-credentials"
        );
    }

    #[test]
    fn test_from_anyhow_preserves_typed_error() {
        let err: anyhow::Error = AuthError::DeviceCodeExpired.into();
        assert_eq!(AuthError::from_anyhow(&err), AuthError::DeviceCodeExpired);
    }

    #[test]
    fn test_from_anyhow_preserves_typed_error_under_context() {
        let err = anyhow::Error::from(AuthError::PkceUnsupported).context("discovery");
        assert_eq!(AuthError::from_anyhow(&err), AuthError::PkceUnsupported);
    }

    #[test]
    fn test_from_anyhow_wraps_foreign_errors() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(
            AuthError::from_anyhow(&err),
            AuthError::Protocol("boom".to_string())
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
