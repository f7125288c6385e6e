//! HTTP sending abstraction shared by every OAuth component
//!
//! All network I/O in this crate goes through the [`HttpSend`] trait: one
//! request in, one response out. The production implementation is
//! [`reqwest::Client`]; decorators such as
//! [`ResourceInjector`](crate::auth::resource::ResourceInjector) and
//! [`AuthenticatingTransport`] wrap another sender and mutate requests or
//! responses on the way through.
//!
//! The module also carries the small request-building and body-reading
//! helpers used by discovery, registration, and the flow engine so that
//! those components never need a concrete client to construct a request.

pub mod authenticating;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, Request, Response};
use serde::Serialize;
use url::Url;

use crate::error::{AuthError, Result};

pub use authenticating::AuthenticatingTransport;

/// Cap applied to response bodies that are quoted in error messages.
pub const ERROR_BODY_LIMIT: usize = 1024;

/// Cap applied to the unauthenticated discovery probe body.
pub const PROBE_BODY_LIMIT: usize = 4 * 1024;

/// Cap applied to successful metadata and token documents.
pub const DOCUMENT_BODY_LIMIT: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// HttpSend
// ---------------------------------------------------------------------------

/// Sends one HTTP request and returns one HTTP response.
///
/// Implementations must not retry, follow streaming semantics, or interpret
/// the response status; callers decide what a non-success status means.
///
/// # Examples
///
/// ```no_run
/// use mcpauth::transport::{get_json, HttpSend};
///
/// # async fn example() -> mcpauth::error::Result<()> {
/// let client = reqwest::Client::new();
/// let request = get_json(&url::Url::parse("https://api.example.com/mcp")?);
/// let response = client.send(request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait HttpSend: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] (or a decorator-specific error) when the
    /// request could not be delivered.
    async fn send(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl HttpSend for reqwest::Client {
    async fn send(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let response = self.execute(request).await.map_err(AuthError::from)?;
        tracing::debug!(%method, %url, status = %response.status(), "HTTP request completed");
        Ok(response)
    }
}

#[async_trait]
impl<T: HttpSend + ?Sized> HttpSend for Arc<T> {
    async fn send(&self, request: Request) -> Result<Response> {
        (**self).send(request).await
    }
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Builds a `GET` request that asks for a JSON representation.
pub fn get_json(url: &Url) -> Request {
    let mut request = Request::new(Method::GET, url.clone());
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/json"));
    request
}

/// Builds a form-encoded `POST` request.
///
/// The `Content-Length` header is set explicitly so that decorators that
/// rewrite the body can keep it consistent.
pub fn post_form(url: &Url, params: &[(&str, &str)]) -> Request {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    let mut request = Request::new(Method::POST, url.clone());
    let headers = request.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    *request.body_mut() = Some(Body::from(body));
    request
}

/// Builds a JSON `POST` request from a serializable body.
///
/// # Errors
///
/// Returns [`AuthError::Protocol`] if `body` cannot be serialized.
pub fn post_json<T: Serialize + ?Sized>(url: &Url, body: &T) -> Result<Request> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| AuthError::Protocol(format!("failed to encode request body: {e}")))?;

    let mut request = Request::new(Method::POST, url.clone());
    let headers = request.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    *request.body_mut() = Some(Body::from(bytes));
    Ok(request)
}

/// Parses `raw` as an absolute URL, naming `what` in the error.
pub fn parse_url(raw: &str, what: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| AuthError::Config(format!("invalid {what} '{raw}': {e}")).into())
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Reads at most `limit` bytes of a response body.
///
/// Anything beyond `limit` is discarded without being buffered, which bounds
/// memory use against hostile or misbehaving servers.
///
/// # Errors
///
/// Returns [`AuthError::Http`] if the body stream fails mid-read.
pub async fn read_limited(mut response: Response, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(AuthError::from)? {
        let remaining = limit - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Reads a response body capped at [`ERROR_BODY_LIMIT`] as lossy UTF-8, for
/// quoting in error messages.
pub async fn error_excerpt(response: Response) -> String {
    match read_limited(response, ERROR_BODY_LIMIT).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(e) => format!("<failed to read body: {e}>"),
    }
}

/// Inserts an `Authorization: Bearer <token>` header, replacing any existing
/// authorization header.
///
/// # Errors
///
/// Returns [`AuthError::Protocol`] if the token contains bytes that are not
/// valid in an HTTP header value.
///
/// # Examples
///
/// ```
/// use mcpauth::transport::inject_bearer;
/// use reqwest::header::{HeaderMap, AUTHORIZATION};
///
/// let mut headers = HeaderMap::new();
/// inject_bearer(&mut headers, "abc123").unwrap();
/// assert_eq!(headers[AUTHORIZATION], "Bearer abc123");
/// ```
pub fn inject_bearer(headers: &mut HeaderMap, access_token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|_| {
        AuthError::Protocol("access token contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn body_text(request: &Request) -> String {
        let bytes = request
            .body()
            .and_then(|b| b.as_bytes())
            .expect("buffered body");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    #[test]
    fn test_get_json_sets_accept_header() {
        let url = Url::parse("https://api.example.com/mcp").unwrap();
        let request = get_json(&url);
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers()[ACCEPT], "application/json");
    }

    #[test]
    fn test_post_form_encodes_body_and_length() {
        let url = Url::parse("https://auth.example.com/token").unwrap();
        let request = post_form(&url, &[("grant_type", "refresh_token"), ("scope", "a b")]);

        let body = body_text(&request);
        assert_eq!(body, "grant_type=refresh_token&scope=a+b");
        assert_eq!(
            request.headers()[CONTENT_LENGTH],
            body.len().to_string().as_str()
        );
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_post_json_serializes_body() {
        let url = Url::parse("https://auth.example.com/register").unwrap();
        let request = post_json(&url, &serde_json::json!({"client_name": "x"})).unwrap();
        assert_eq!(body_text(&request), r#"{"client_name":"x"}"#);
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_parse_url_rejects_relative() {
        let err = parse_url("/relative", "token endpoint").unwrap_err();
        assert!(err.to_string().contains("invalid token endpoint"));
    }

    #[test]
    fn test_inject_bearer_replaces_existing_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        inject_bearer(&mut headers, "tok").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_inject_bearer_rejects_newlines() {
        let mut headers = HeaderMap::new();
        assert!(inject_bearer(&mut headers, "bad\ntoken").is_err());
    }

    #[tokio::test]
    async fn test_read_limited_truncates_body() {
        let response: Response = http::Response::new("0123456789").into();
        let bytes = read_limited(response, 4).await.unwrap();
        assert_eq!(bytes, b"0123");
    }

    #[tokio::test]
    async fn test_read_limited_returns_short_body_whole() {
        let response: Response = http::Response::new("abc").into();
        let bytes = read_limited(response, 1024).await.unwrap();
        assert_eq!(bytes, b"abc");
    }
}
