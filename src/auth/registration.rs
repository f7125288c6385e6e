//! Dynamic Client Registration (RFC 7591)
//!
//! When no static `client_id` is configured, [`ClientRegistrar`] obtains one
//! from the authorization server's registration endpoint. Registrations are
//! cached per resource URI by the [`CredentialStore`] so that the client
//! registers once and reuses the identity on later runs.
//!
//! # References
//!
//! - RFC 7591 <https://www.rfc-editor.org/rfc/rfc7591>

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::transport::{
    error_excerpt, parse_url, post_json, read_limited, HttpSend, DOCUMENT_BODY_LIMIT,
};

/// Client name sent with every registration request.
pub const CLIENT_NAME: &str = "mcpauth";

/// Redirect URI registered for the public client.
pub const REGISTERED_REDIRECT_URI: &str = "http://localhost";

/// Grant types requested at registration.
pub const REGISTERED_GRANT_TYPES: &[&str] = &[
    "urn:ietf:params:oauth:grant-type:device_code",
    "refresh_token",
];

// ---------------------------------------------------------------------------
// ClientRegistration
// ---------------------------------------------------------------------------

/// A client identity issued by an authorization server for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// The resource URI this identity was registered for.
    pub resource_uri: String,

    /// The issued client identifier.
    pub client_id: String,

    /// The issued client secret, when the server treats the client as
    /// confidential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Access token for the RFC 7592 client configuration endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,

    /// When the registration was obtained.
    pub registered_at: DateTime<Utc>,
}

/// RFC 7591 client metadata sent to the registration endpoint.
#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: Vec<&'a str>,
    grant_types: Vec<&'a str>,
    token_endpoint_auth_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// RFC 7591 client information response.
#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    registration_access_token: Option<String>,
}

// ---------------------------------------------------------------------------
// ClientRegistrar
// ---------------------------------------------------------------------------

/// Registers public clients and caches the result.
pub struct ClientRegistrar<'a, S: ?Sized> {
    http: &'a S,
    store: &'a CredentialStore,
}

impl<'a, S: HttpSend + ?Sized> ClientRegistrar<'a, S> {
    /// Creates a registrar that sends through `http` and caches in `store`.
    pub fn new(http: &'a S, store: &'a CredentialStore) -> Self {
        Self { http, store }
    }

    /// Returns a client registration for `resource_uri`, registering only
    /// when no usable cached registration exists.
    ///
    /// A cached registration with a non-empty `client_id` is returned as-is
    /// without any network traffic. A failure to write the cache is logged
    /// and does not fail the call.
    ///
    /// # Arguments
    ///
    /// * `registration_url` - The registration endpoint, if known.
    /// * `resource_uri` - The protected resource the client is for.
    /// * `scopes` - Scopes to request; sent space-joined when non-empty.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Registration`] when there is no cached registration and
    ///   no registration endpoint, or when the endpoint rejects the request
    ///   or returns an unusable response.
    /// - [`AuthError::Http`] when the request cannot be delivered.
    pub async fn ensure_registered(
        &self,
        registration_url: Option<&str>,
        resource_uri: &str,
        scopes: &[String],
    ) -> Result<ClientRegistration> {
        if let Some(cached) = self.store.load_registration(resource_uri) {
            if !cached.client_id.is_empty() {
                tracing::debug!(resource = %resource_uri, "Using cached client registration");
                return Ok(cached);
            }
        }

        let endpoint = registration_url.filter(|u| !u.is_empty()).ok_or_else(|| {
            AuthError::Registration(format!(
                "no client_id configured and no registration endpoint available for {resource_uri}"
            ))
        })?;

        let registration = self.register(endpoint, resource_uri, scopes).await?;

        if let Err(e) = self.store.save_registration(&registration) {
            tracing::warn!("Failed to cache client registration: {}", e);
        }

        Ok(registration)
    }

    async fn register(
        &self,
        endpoint: &str,
        resource_uri: &str,
        scopes: &[String],
    ) -> Result<ClientRegistration> {
        let url = parse_url(endpoint, "registration endpoint")?;
        let body = RegistrationRequest {
            client_name: CLIENT_NAME,
            redirect_uris: vec![REGISTERED_REDIRECT_URI],
            grant_types: REGISTERED_GRANT_TYPES.to_vec(),
            token_endpoint_auth_method: "none",
            scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
        };

        tracing::info!(endpoint = %url, "Registering OAuth client");
        let response = self.http.send(post_json(&url, &body)?).await?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = error_excerpt(response).await;
            return Err(AuthError::Registration(format!(
                "registration endpoint returned {status}: {excerpt}"
            ))
            .into());
        }

        let bytes = read_limited(response, DOCUMENT_BODY_LIMIT).await?;
        let parsed: RegistrationResponse = serde_json::from_slice(&bytes).map_err(|e| {
            AuthError::Registration(format!("failed to parse registration response: {e}"))
        })?;

        if parsed.client_id.is_empty() {
            return Err(AuthError::Registration(
                "registration response did not include a client_id".to_string(),
            )
            .into());
        }

        Ok(ClientRegistration {
            resource_uri: resource_uri.to_string(),
            client_id: parsed.client_id,
            client_secret: parsed.client_secret,
            registration_access_token: parsed.registration_access_token,
            registered_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_request_shape() {
        let body = RegistrationRequest {
            client_name: CLIENT_NAME,
            redirect_uris: vec![REGISTERED_REDIRECT_URI],
            grant_types: REGISTERED_GRANT_TYPES.to_vec(),
            token_endpoint_auth_method: "none",
            scope: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["client_name"], "mcpauth");
        assert_eq!(json["redirect_uris"], serde_json::json!(["http://localhost"]));
        assert_eq!(
            json["grant_types"],
            serde_json::json!(["urn:ietf:params:oauth:grant-type:device_code", "refresh_token"])
        );
        assert_eq!(json["token_endpoint_auth_method"], "none");
        assert!(json.get("scope").is_none());
    }

    #[test]
    fn test_registration_file_schema() {
        let reg = ClientRegistration {
            resource_uri: "https://api.example.com".to_string(),
            client_id: "abc".to_string(),
            client_secret: None,
            registration_access_token: Some("rat".to_string()),
            registered_at: DateTime::from_timestamp(1_800_000_000, 0).unwrap(),
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["client_id"], "abc");
        assert_eq!(json["registration_access_token"], "rat");
        assert_eq!(json["registered_at"], "2027-01-15T08:00:00Z");
        assert!(json.get("client_secret").is_none());
    }
}
