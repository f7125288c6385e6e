//! OAuth endpoint discovery for a protected resource
//!
//! [`discover`] works out whether a resource needs OAuth at all and, if it
//! does, where its authorization server lives. Strategies are tried in order
//! and the first success wins:
//!
//! 1. An unauthenticated `GET` probe. Anything other than `401` means the
//!    resource is open and discovery returns `Ok(None)`.
//! 2. The `WWW-Authenticate` challenge of the `401`. Its `resource_metadata`
//!    parameter (or, failing that, `realm`) locates the RFC 9728 protected
//!    resource metadata, whose first authorization server is queried for its
//!    RFC 8414 metadata. When the authorization server publishes no metadata
//!    the result is a best-effort set of endpoints with only a guessed
//!    registration endpoint; flow selection later rejects it as a
//!    configuration error.
//! 3. A non-standard `device_flow` object in the `401` body, advertising a
//!    device authorization endpoint directly.
//! 4. RFC 8414 metadata fetched from the resource's own origin.
//!
//! Each strategy's failure is recorded and the next one attempted. A missing
//! PKCE `S256` advertisement is the exception: it aborts discovery at once.
//!
//! # References
//!
//! - RFC 9728 <https://www.rfc-editor.org/rfc/rfc9728>
//! - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>

use std::collections::HashMap;

use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::pkce;
use crate::error::{AuthError, Result};
use crate::transport::{
    error_excerpt, get_json, read_limited, HttpSend, DOCUMENT_BODY_LIMIT, PROBE_BODY_LIMIT,
};

const PROTECTED_RESOURCE_WELL_KNOWN: &str = "/.well-known/oauth-protected-resource";
const AUTHORIZATION_SERVER_WELL_KNOWN: &str = "/.well-known/oauth-authorization-server";

// ---------------------------------------------------------------------------
// Metadata documents
// ---------------------------------------------------------------------------

/// RFC 9728 protected resource metadata.
///
/// # Examples
///
/// ```
/// use mcpauth::auth::discovery::ProtectedResourceMetadata;
///
/// let json = r#"{
///     "resource": "https://api.example.com",
///     "authorization_servers": ["https://auth.example.com"]
/// }"#;
///
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.authorization_servers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The resource identifier.
    #[serde(default)]
    pub resource: String,

    /// Issuer URLs of the authorization servers protecting the resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// Scopes the resource understands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Ways the resource accepts bearer tokens (e.g. `"header"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
}

/// RFC 8414 authorization server metadata.
///
/// Endpoint fields are optional because device-only servers publish no
/// authorization endpoint and some servers omit fields they do not use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier.
    #[serde(default)]
    pub issuer: String,

    /// Authorization endpoint (RFC 6749 section 3.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint (RFC 6749 section 3.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Device authorization endpoint (RFC 8628 section 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,

    /// Dynamic client registration endpoint (RFC 7591).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// PKCE methods; must contain `"S256"` whenever an authorization
    /// endpoint is advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Endpoints and scopes learned by [`discover`].
///
/// Every field is optional: a best-effort result may carry nothing but a
/// guessed registration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveredEndpoints {
    /// Issuer of the authorization server, when one was identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// Non-standard `401` body some servers use to advertise device flow.
#[derive(Debug, Deserialize)]
struct DeviceFlowHint {
    device_flow: DeviceFlowSteps,
}

#[derive(Debug, Deserialize)]
struct DeviceFlowSteps {
    step_1: String,
    #[serde(default)]
    step_3: Option<String>,
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

/// Discovers the OAuth endpoints protecting `endpoint`.
///
/// # Returns
///
/// - `Ok(None)` when the probe is not answered with `401`, meaning the
///   resource does not require OAuth.
/// - `Ok(Some(endpoints))` from the first strategy that succeeds.
///
/// # Errors
///
/// - [`AuthError::PkceUnsupported`] as soon as an authorization server with
///   an authorization endpoint fails to advertise `S256`.
/// - [`AuthError::Discovery`] when the probe cannot be sent or every
///   strategy fails; the message names each strategy and why it failed.
///
/// # Examples
///
/// ```no_run
/// use mcpauth::auth::discovery::discover;
///
/// # async fn example() -> mcpauth::error::Result<()> {
/// let http = reqwest::Client::new();
/// match discover(&http, "https://api.example.com/mcp").await? {
///     Some(found) => println!("token endpoint: {:?}", found.token_url),
///     None => println!("no OAuth required"),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn discover<S: HttpSend + ?Sized>(
    http: &S,
    endpoint: &str,
) -> Result<Option<DiscoveredEndpoints>> {
    let endpoint_url = Url::parse(endpoint)
        .map_err(|e| AuthError::Config(format!("invalid resource endpoint '{endpoint}': {e}")))?;

    let probe = http.send(get_json(&endpoint_url)).await.map_err(|e| {
        AuthError::Discovery(format!("probe request to {endpoint} failed: {}", reason(&e)))
    })?;

    if probe.status() != StatusCode::UNAUTHORIZED {
        tracing::debug!(status = %probe.status(), "Resource did not demand authentication");
        return Ok(None);
    }

    let challenge = probe
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = read_limited(probe, PROBE_BODY_LIMIT)
        .await
        .unwrap_or_default();

    let mut failures: Vec<String> = Vec::new();

    match challenge {
        Some(header) => match from_challenge(http, &header).await {
            Ok(found) => return Ok(Some(found)),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => failures.push(format!("WWW-Authenticate challenge ({})", reason(&e))),
        },
        None => failures.push("WWW-Authenticate challenge (header absent)".to_string()),
    }

    match from_device_flow_body(&endpoint_url, &body) {
        Ok(found) => return Ok(Some(found)),
        Err(e) => failures.push(format!("device_flow response body ({})", reason(&e))),
    }

    match from_origin_metadata(http, &endpoint_url).await {
        Ok(found) => return Ok(Some(found)),
        Err(e) if is_fatal(&e) => return Err(e),
        Err(e) => failures.push(format!("origin well-known metadata ({})", reason(&e))),
    }

    Err(AuthError::Discovery(format!(
        "no OAuth metadata found for {endpoint}; tried: {}",
        failures.join("; ")
    ))
    .into())
}

/// Strategy 2: follow the `WWW-Authenticate` challenge.
async fn from_challenge<S: HttpSend + ?Sized>(
    http: &S,
    header: &str,
) -> Result<DiscoveredEndpoints> {
    let metadata_url = resource_metadata_url(header).ok_or_else(|| {
        AuthError::Discovery("challenge carries no resource_metadata or realm URL".to_string())
    })?;

    let resource = fetch_protected_resource_metadata(http, &metadata_url).await?;
    let issuer = resource.authorization_servers.first().ok_or_else(|| {
        AuthError::Discovery(format!("{metadata_url} lists no authorization servers"))
    })?;
    let issuer_url = Url::parse(issuer).map_err(|e| {
        AuthError::Discovery(format!("invalid authorization server '{issuer}': {e}"))
    })?;

    match fetch_authorization_server_metadata(http, &issuer_url).await {
        Ok(metadata) => endpoints_from_metadata(&metadata, resource.scopes_supported, None),
        Err(e) => {
            tracing::warn!(
                "Authorization server metadata unavailable for {}: {}; using best-effort endpoints",
                issuer,
                reason(&e)
            );
            Ok(DiscoveredEndpoints {
                issuer: Some(issuer.clone()),
                registration_url: Some(format!(
                    "{}/register",
                    issuer_url.origin().ascii_serialization()
                )),
                scopes: resource.scopes_supported.unwrap_or_default(),
                ..Default::default()
            })
        }
    }
}

/// Strategy 3: parse a `device_flow` hint out of the `401` body.
fn from_device_flow_body(endpoint: &Url, body: &[u8]) -> Result<DiscoveredEndpoints> {
    let hint: DeviceFlowHint = serde_json::from_slice(body).map_err(|_| {
        AuthError::Discovery("body does not contain a device_flow object".to_string())
    })?;

    let device = first_url(&hint.device_flow.step_1).ok_or_else(|| {
        AuthError::Discovery("device_flow.step_1 does not contain a URL".to_string())
    })?;
    let device = normalize_scheme(endpoint, &device);
    let token = device
        .join("/oauth/token")
        .map_err(|e| AuthError::Discovery(format!("cannot derive token endpoint: {e}")))?;

    if let Some(step_3) = &hint.device_flow.step_3 {
        tracing::debug!(step_3 = %step_3, "Ignoring device_flow poll hint in favour of /oauth/token");
    }

    Ok(DiscoveredEndpoints {
        device_auth_url: Some(device.to_string()),
        token_url: Some(token.to_string()),
        ..Default::default()
    })
}

/// Strategy 4: RFC 8414 metadata on the resource's own origin.
async fn from_origin_metadata<S: HttpSend + ?Sized>(
    http: &S,
    endpoint: &Url,
) -> Result<DiscoveredEndpoints> {
    let url = Url::parse(&format!(
        "{}{AUTHORIZATION_SERVER_WELL_KNOWN}",
        endpoint.origin().ascii_serialization()
    ))
    .map_err(|e| AuthError::Discovery(format!("cannot build well-known URL: {e}")))?;

    let metadata: AuthorizationServerMetadata =
        fetch_document(http, &url, "authorization server metadata").await?;
    endpoints_from_metadata(&metadata, None, Some(endpoint))
}

// ---------------------------------------------------------------------------
// Metadata fetching
// ---------------------------------------------------------------------------

/// Fetches RFC 9728 protected resource metadata from `metadata_url`.
///
/// # Errors
///
/// Returns [`AuthError::Discovery`] on a non-success status (quoting at most
/// 1 KiB of the body) or an unparseable document, and [`AuthError::Http`]
/// when the request cannot be sent.
pub async fn fetch_protected_resource_metadata<S: HttpSend + ?Sized>(
    http: &S,
    metadata_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    fetch_document(http, metadata_url, "protected resource metadata").await
}

/// Fetches RFC 8414 metadata from `<issuer>/.well-known/oauth-authorization-server`.
///
/// # Errors
///
/// Same as [`fetch_protected_resource_metadata`].
pub async fn fetch_authorization_server_metadata<S: HttpSend + ?Sized>(
    http: &S,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata> {
    let url = Url::parse(&format!(
        "{}{AUTHORIZATION_SERVER_WELL_KNOWN}",
        issuer.as_str().trim_end_matches('/')
    ))
    .map_err(|e| AuthError::Discovery(format!("cannot build metadata URL for {issuer}: {e}")))?;

    fetch_document(http, &url, "authorization server metadata").await
}

async fn fetch_document<T: DeserializeOwned, S: HttpSend + ?Sized>(
    http: &S,
    url: &Url,
    what: &str,
) -> Result<T> {
    let response = http.send(get_json(url)).await?;
    let status = response.status();
    if !status.is_success() {
        let excerpt = error_excerpt(response).await;
        return Err(
            AuthError::Discovery(format!("{what} at {url} returned {status}: {excerpt}")).into(),
        );
    }

    let bytes = read_limited(response, DOCUMENT_BODY_LIMIT).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AuthError::Discovery(format!("failed to parse {what} from {url}: {e}")).into()
    })
}

/// Maps authorization server metadata to endpoints, enforcing S256 and
/// optionally normalizing URLs against `reference`.
fn endpoints_from_metadata(
    metadata: &AuthorizationServerMetadata,
    resource_scopes: Option<Vec<String>>,
    reference: Option<&Url>,
) -> Result<DiscoveredEndpoints> {
    let has_auth_endpoint = metadata
        .authorization_endpoint
        .as_deref()
        .is_some_and(|e| !e.is_empty());
    if has_auth_endpoint {
        pkce::verify_s256_support(metadata)?;
    }

    let fix = |raw: &Option<String>| -> Option<String> {
        let raw = raw.as_deref().filter(|s| !s.is_empty())?;
        match (reference, Url::parse(raw)) {
            (Some(reference), Ok(url)) => Some(normalize_scheme(reference, &url).to_string()),
            _ => Some(raw.to_string()),
        }
    };

    Ok(DiscoveredEndpoints {
        issuer: Some(metadata.issuer.clone()).filter(|i| !i.is_empty()),
        auth_url: fix(&metadata.authorization_endpoint),
        device_auth_url: fix(&metadata.device_authorization_endpoint),
        token_url: fix(&metadata.token_endpoint),
        registration_url: fix(&metadata.registration_endpoint),
        scopes: resource_scopes
            .or_else(|| metadata.scopes_supported.clone())
            .unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Aligns `discovered` with the scheme of `reference` when both name the
/// same host.
///
/// Servers behind TLS-terminating proxies often advertise `http://` URLs for
/// an `https://` endpoint. When the hosts match and the schemes differ, the
/// reference's scheme and port are used. URLs on other hosts are returned
/// unchanged.
///
/// # Examples
///
/// ```
/// use mcpauth::auth::discovery::normalize_scheme;
/// use url::Url;
///
/// let reference = Url::parse("https://api.example.com").unwrap();
/// let discovered = Url::parse("http://api.example.com:80/auth").unwrap();
/// assert_eq!(
///     normalize_scheme(&reference, &discovered).as_str(),
///     "https://api.example.com/auth"
/// );
/// ```
pub fn normalize_scheme(reference: &Url, discovered: &Url) -> Url {
    if discovered.host_str() != reference.host_str() || discovered.scheme() == reference.scheme()
    {
        return discovered.clone();
    }

    let mut normalized = discovered.clone();
    if normalized.set_scheme(reference.scheme()).is_err()
        || normalized.set_port(reference.port()).is_err()
    {
        return discovered.clone();
    }
    normalized
}

/// Extracts a parameter value from a `WWW-Authenticate` challenge.
///
/// Handles both quoted (`name="value"`) and token (`name=value`) forms and
/// only matches `name` at a parameter boundary.
pub fn challenge_param(header: &str, name: &str) -> Option<String> {
    let key = format!("{name}=");
    let mut search_from = 0;

    while let Some(offset) = header[search_from..].find(&key) {
        let pos = search_from + offset;
        let at_boundary = header[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace() || c == ',');
        let rest = &header[pos + key.len()..];

        if at_boundary {
            return if let Some(inner) = rest.strip_prefix('"') {
                inner.find('"').map(|end| inner[..end].to_string())
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == ',')
                    .unwrap_or(rest.len());
                Some(rest[..end].to_string())
            };
        }
        search_from = pos + key.len();
    }
    None
}

/// Resolves the protected resource metadata URL from a challenge header.
fn resource_metadata_url(header: &str) -> Option<Url> {
    let raw = challenge_param(header, "resource_metadata")
        .or_else(|| challenge_param(header, "realm"))?;
    let mut url = Url::parse(&raw).ok()?;
    if !url.path().contains(PROTECTED_RESOURCE_WELL_KNOWN) {
        let path = format!(
            "{}{PROTECTED_RESOURCE_WELL_KNOWN}",
            url.path().trim_end_matches('/')
        );
        url.set_path(&path);
    }
    Some(url)
}

/// Returns the first `http(s)://` URL found in free text such as
/// `"POST https://host/device/code"`.
fn first_url(text: &str) -> Option<Url> {
    text.split_whitespace()
        .filter(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(|word| word.trim_end_matches([',', ';', ')']))
        .find_map(|word| Url::parse(word).ok())
}

fn is_fatal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::PkceUnsupported)
    )
}

/// Strips the variant prefix of nested discovery errors so the aggregated
/// message reads cleanly.
fn reason(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::Discovery(msg)) | Some(AuthError::Http(msg)) => msg.clone(),
        _ => format!("{err:#}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    // -----------------------------------------------------------------------
    // challenge_param
    // -----------------------------------------------------------------------

    #[test]
    fn test_challenge_param_quoted() {
        let header = r#"Bearer realm="example", resource_metadata="https://api.example.com/.well-known/oauth-protected-resource""#;
        assert_eq!(
            challenge_param(header, "resource_metadata").as_deref(),
            Some("https://api.example.com/.well-known/oauth-protected-resource")
        );
        assert_eq!(challenge_param(header, "realm").as_deref(), Some("example"));
    }

    #[test]
    fn test_challenge_param_unquoted() {
        let header = "Bearer resource_metadata=https://api.example.com/meta, error=invalid_token";
        assert_eq!(
            challenge_param(header, "resource_metadata").as_deref(),
            Some("https://api.example.com/meta")
        );
        assert_eq!(
            challenge_param(header, "error").as_deref(),
            Some("invalid_token")
        );
    }

    #[test]
    fn test_challenge_param_requires_boundary() {
        let header = r#"Bearer xrealm="nope", realm="yes""#;
        assert_eq!(challenge_param(header, "realm").as_deref(), Some("yes"));
    }

    #[test]
    fn test_challenge_param_absent() {
        assert!(challenge_param(r#"Bearer error="invalid_token""#, "realm").is_none());
        assert!(challenge_param("", "realm").is_none());
    }

    // -----------------------------------------------------------------------
    // resource_metadata_url
    // -----------------------------------------------------------------------

    #[test]
    fn test_resource_metadata_url_keeps_well_known_path() {
        let found = resource_metadata_url(
            r#"Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource/mcp""#,
        )
        .unwrap();
        assert_eq!(
            found.as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource/mcp"
        );
    }

    #[test]
    fn test_resource_metadata_url_appends_well_known_to_realm() {
        let found = resource_metadata_url(r#"Bearer realm="https://api.example.com/""#).unwrap();
        assert_eq!(
            found.as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn test_resource_metadata_url_rejects_non_url_realm() {
        assert!(resource_metadata_url(r#"Bearer realm="example""#).is_none());
    }

    // -----------------------------------------------------------------------
    // normalize_scheme
    // -----------------------------------------------------------------------

    #[test]
    fn test_normalize_scheme_corrects_scheme_and_strips_port() {
        let out = normalize_scheme(
            &url("https://api.example.com"),
            &url("http://api.example.com:80/auth"),
        );
        assert_eq!(out.as_str(), "https://api.example.com/auth");
    }

    #[test]
    fn test_normalize_scheme_takes_reference_port() {
        let out = normalize_scheme(
            &url("https://api.example.com:8443/mcp"),
            &url("http://api.example.com:8080/token"),
        );
        assert_eq!(out.as_str(), "https://api.example.com:8443/token");
    }

    #[test]
    fn test_normalize_scheme_leaves_other_hosts_alone() {
        let discovered = url("http://auth.example.com/token");
        assert_eq!(
            normalize_scheme(&url("https://api.example.com"), &discovered),
            discovered
        );
    }

    #[test]
    fn test_normalize_scheme_leaves_matching_scheme_alone() {
        let discovered = url("https://api.example.com:9000/token");
        assert_eq!(
            normalize_scheme(&url("https://api.example.com"), &discovered),
            discovered
        );
    }

    // -----------------------------------------------------------------------
    // device_flow body
    // -----------------------------------------------------------------------

    #[test]
    fn test_device_flow_body_yields_device_and_token_urls() {
        let body = br#"{"device_flow":{"step_1":"POST http://host/dev/auth","step_3":"Poll http://host/dev/poll with device_code"}}"#;
        let found = from_device_flow_body(&url("http://host/api"), body).unwrap();
        assert_eq!(found.device_auth_url.as_deref(), Some("http://host/dev/auth"));
        assert_eq!(found.token_url.as_deref(), Some("http://host/oauth/token"));
        assert!(found.auth_url.is_none());
    }

    #[test]
    fn test_device_flow_body_normalizes_scheme() {
        let body = br#"{"device_flow":{"step_1":"POST http://api.example.com/device"}}"#;
        let found = from_device_flow_body(&url("https://api.example.com/mcp"), body).unwrap();
        assert_eq!(
            found.device_auth_url.as_deref(),
            Some("https://api.example.com/device")
        );
        assert_eq!(
            found.token_url.as_deref(),
            Some("https://api.example.com/oauth/token")
        );
    }

    #[test]
    fn test_device_flow_body_rejects_other_json() {
        assert!(from_device_flow_body(&url("http://host"), br#"{"error":"unauthorized"}"#).is_err());
        assert!(from_device_flow_body(&url("http://host"), b"not json").is_err());
        assert!(
            from_device_flow_body(&url("http://host"), br#"{"device_flow":{"step_1":"POST"}}"#)
                .is_err()
        );
    }

    // -----------------------------------------------------------------------
    // endpoints_from_metadata
    // -----------------------------------------------------------------------

    #[test]
    fn test_endpoints_from_metadata_requires_s256_with_auth_endpoint() {
        let metadata = AuthorizationServerMetadata {
            issuer: "https://auth.example.com".to_string(),
            authorization_endpoint: Some("https://auth.example.com/authorize".to_string()),
            token_endpoint: Some("https://auth.example.com/token".to_string()),
            ..Default::default()
        };
        let err = endpoints_from_metadata(&metadata, None, None).unwrap_err();
        assert!(is_fatal(&err));
    }

    #[test]
    fn test_endpoints_from_metadata_device_only_needs_no_pkce() {
        let metadata = AuthorizationServerMetadata {
            issuer: "https://auth.example.com".to_string(),
            device_authorization_endpoint: Some("https://auth.example.com/device".to_string()),
            token_endpoint: Some("https://auth.example.com/token".to_string()),
            scopes_supported: Some(vec!["read".to_string()]),
            ..Default::default()
        };
        let found = endpoints_from_metadata(&metadata, None, None).unwrap();
        assert_eq!(
            found.device_auth_url.as_deref(),
            Some("https://auth.example.com/device")
        );
        assert_eq!(found.scopes, vec!["read".to_string()]);
    }

    #[test]
    fn test_endpoints_from_metadata_prefers_resource_scopes() {
        let metadata = AuthorizationServerMetadata {
            token_endpoint: Some("https://auth.example.com/token".to_string()),
            scopes_supported: Some(vec!["server".to_string()]),
            ..Default::default()
        };
        let found =
            endpoints_from_metadata(&metadata, Some(vec!["resource".to_string()]), None).unwrap();
        assert_eq!(found.scopes, vec!["resource".to_string()]);
        assert!(found.issuer.is_none());
    }

    #[test]
    fn test_authorization_server_metadata_captures_extra_fields() {
        let json = r#"{
            "issuer": "https://auth.example.com",
            "token_endpoint": "https://auth.example.com/token",
            "custom_field": "custom_value"
        }"#;
        let meta: AuthorizationServerMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.authorization_endpoint.is_none());
        assert_eq!(meta.extra["custom_field"], "custom_value");
    }

    #[test]
    fn test_first_url_skips_verbs_and_trailing_punctuation() {
        assert_eq!(
            first_url("Poll https://host/poll, then retry").map(|u| u.to_string()),
            Some("https://host/poll".to_string())
        );
        assert!(first_url("POST somewhere").is_none());
    }
}
