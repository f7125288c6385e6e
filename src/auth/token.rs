//! OAuth access tokens and token endpoint responses
//!
//! [`Token`] is the canonical token shape shared by the flow engine, the
//! refresh source, the credential store, and the authenticating transport.
//! Raw token endpoint JSON is parsed by [`read_token_response`], which also
//! turns RFC 6749 error bodies into [`AuthError::TokenEndpoint`] so that the
//! device flow can match on `authorization_pending` and `slow_down`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::transport::{read_limited, DOCUMENT_BODY_LIMIT, ERROR_BODY_LIMIT};

fn default_token_type() -> String {
    "Bearer".to_string()
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An OAuth access token with its optional refresh token and expiry.
///
/// Tokens are never mutated in place: a refresh produces a new `Token` that
/// supersedes the old one.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use mcpauth::auth::token::Token;
///
/// let token = Token {
///     access_token: "abc".to_string(),
///     refresh_token: None,
///     token_type: "Bearer".to_string(),
///     expiry: Some(Utc::now() + Duration::hours(1)),
///     scopes: vec!["openid".to_string()],
/// };
/// assert!(token.is_valid());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The bearer credential presented to the resource server.
    pub access_token: String,

    /// Refresh token, when the authorization server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type, normally `"Bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Absolute expiry instant (RFC 3339 on disk).
    ///
    /// `None` means the token endpoint did not say. Such a token is never
    /// considered valid by [`Token::is_valid`]; it is only used as a
    /// long-lived credential inside a refresh source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    /// Scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Token {
    /// Returns `true` when the token has a non-empty access token and an
    /// expiry strictly in the future.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Same as [`Token::is_valid`] evaluated at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expiry.is_some_and(|expiry| now < expiry)
    }

    /// Returns `true` when the token expires within `window` of `now`.
    ///
    /// Tokens without an expiry never expire by this measure.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - window <= now,
            None => false,
        }
    }

    /// Returns `true` when `other` carries a different credential, meaning
    /// the cached copy needs rewriting.
    pub fn differs_from(&self, other: &Token) -> bool {
        self.access_token != other.access_token || self.expiry != other.expiry
    }
}

// ---------------------------------------------------------------------------
// Token endpoint responses
// ---------------------------------------------------------------------------

/// Raw successful token endpoint response (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a [`Token`], anchoring `expires_in` at
    /// `now`. When the server omits `scope`, the requested scopes are
    /// assumed to have been granted.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Protocol`] when `expires_in` does not fit in a
    /// representable instant.
    pub fn into_token(self, requested_scopes: &[String], now: DateTime<Utc>) -> Result<Token> {
        let expiry = match self.expires_in {
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AuthError::Protocol(format!("expires_in out of range: {secs}"))
                    })?,
            ),
            None => None,
        };

        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => requested_scopes.to_vec(),
        };

        Ok(Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            expiry,
            scopes,
        })
    }
}

/// RFC 6749 section 5.2 error response.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Reads a token endpoint response into a [`Token`].
///
/// Some servers answer `200 OK` with an error body (GitHub does this during
/// device polling), so the body is checked for an `error` member regardless
/// of status.
///
/// # Errors
///
/// - [`AuthError::TokenEndpoint`] when the body carries an RFC 6749 error.
/// - [`AuthError::Protocol`] when the body is not a token response, quoting
///   at most 1 KiB of it.
pub async fn read_token_response(
    response: reqwest::Response,
    requested_scopes: &[String],
) -> Result<Token> {
    let status = response.status();
    let body = read_limited(response, DOCUMENT_BODY_LIMIT).await?;

    if !status.is_success() {
        if let Ok(err) = serde_json::from_slice::<TokenErrorResponse>(&body) {
            return Err(AuthError::TokenEndpoint {
                error: err.error,
                description: err.error_description,
            }
            .into());
        }
        return Err(AuthError::Protocol(format!(
            "token endpoint returned {status}: {}",
            excerpt(&body)
        ))
        .into());
    }

    let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
        AuthError::Protocol(format!(
            "failed to parse token response: {e}: {}",
            excerpt(&body)
        ))
    })?;

    if let Some(error) = parsed.error.clone() {
        return Err(AuthError::TokenEndpoint {
            error,
            description: parsed.error_description.clone(),
        }
        .into());
    }

    if parsed.access_token.is_empty() {
        return Err(
            AuthError::Protocol("token response did not include an access_token".into()).into(),
        );
    }

    parsed.into_token(requested_scopes, Utc::now())
}

fn excerpt(body: &[u8]) -> String {
    let end = body.len().min(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&body[..end]).trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
