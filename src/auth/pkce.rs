//! PKCE S256 challenges and CSRF state values
//!
//! Implements the `S256` method of RFC 7636 (the only method OAuth 2.1
//! permits) together with the random `state` value used to bind an
//! authorization callback to the request that started it.
//!
//! 1. A 32-byte random verifier is base64url-encoded without padding.
//! 2. The challenge is `BASE64URL(SHA256(ASCII(verifier)))`.
//! 3. The challenge goes to the authorization endpoint; the verifier goes to
//!    the token endpoint, proving the same client started and finished the
//!    flow.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

use crate::auth::discovery::AuthorizationServerMetadata;
use crate::error::{AuthError, Result};

/// The only PKCE method this crate speaks.
pub const S256: &str = "S256";

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE verifier and its derived S256 challenge.
///
/// # Examples
///
/// ```
/// use mcpauth::auth::pkce;
///
/// let pkce = pkce::generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_eq!(pkce.challenge, pkce::challenge_for(&pkce.verifier));
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// 43-character base64url verifier, sent to the token endpoint.
    pub verifier: String,

    /// `BASE64URL(SHA256(verifier))`, sent to the authorization endpoint.
    pub challenge: String,
}

impl PkceChallenge {
    /// The challenge method, always `"S256"`.
    pub fn method(&self) -> &'static str {
        S256
    }
}

/// Generates a fresh PKCE verifier and challenge from 32 random bytes.
pub fn generate() -> PkceChallenge {
    let verifier = random_urlsafe(32);
    let challenge = challenge_for(&verifier);
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Computes the S256 challenge for `verifier` (RFC 7636 section 4.2).
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a 32-byte random `state` value, base64url-encoded.
pub fn generate_state() -> String {
    random_urlsafe(32)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Verifies that the authorization server advertises the `S256` method.
///
/// A missing `code_challenge_methods_supported` list counts as "not
/// supported"; OAuth 2.1 gives no room for a downgrade.
///
/// # Errors
///
/// Returns [`AuthError::PkceUnsupported`] when `S256` is not listed.
pub fn verify_s256_support(metadata: &AuthorizationServerMetadata) -> Result<()> {
    let supported = metadata
        .code_challenge_methods_supported
        .as_deref()
        .unwrap_or(&[]);

    if supported.iter().any(|m| m == S256) {
        Ok(())
    } else {
        Err(AuthError::PkceUnsupported.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(methods: Option<Vec<&str>>) -> AuthorizationServerMetadata {
        AuthorizationServerMetadata {
            issuer: "https://auth.example.com".to_string(),
            authorization_endpoint: Some("https://auth.example.com/authorize".to_string()),
            token_endpoint: Some("https://auth.example.com/token".to_string()),
            code_challenge_methods_supported: methods
                .map(|m| m.into_iter().map(str::to_string).collect()),
            ..Default::default()
        }
    }

    fn is_base64url(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_generate_verifier_shape() {
        let pkce = generate();
        assert_eq!(
            pkce.verifier.len(),
            43,
            "32 random bytes in base64url without padding produces 43 chars"
        );
        assert!(is_base64url(&pkce.verifier), "got: {}", pkce.verifier);
        assert!(is_base64url(&pkce.challenge), "got: {}", pkce.challenge);
        assert_eq!(pkce.method(), "S256");
    }

    #[test]
    fn test_generate_challenge_matches_verifier() {
        let pkce = generate();
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(generate().verifier, generate().verifier);
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_state_is_32_bytes_base64url() {
        let state = generate_state();
        assert_eq!(state.len(), 43);
        assert!(is_base64url(&state));
    }

    /// RFC 7636 Appendix B test vector.
    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verify_s256_support_accepts_listed() {
        assert!(verify_s256_support(&metadata_with(Some(vec!["plain", "S256"]))).is_ok());
    }

    #[test]
    fn test_verify_s256_support_rejects_missing_list() {
        let err = verify_s256_support(&metadata_with(None)).unwrap_err();
        assert_eq!(AuthError::from_anyhow(&err), AuthError::PkceUnsupported);
    }

    #[test]
    fn test_verify_s256_support_rejects_plain_only_and_lowercase() {
        assert!(verify_s256_support(&metadata_with(Some(vec!["plain"]))).is_err());
        assert!(verify_s256_support(&metadata_with(Some(vec!["s256"]))).is_err());
        assert!(verify_s256_support(&metadata_with(Some(vec![]))).is_err());
    }
}
