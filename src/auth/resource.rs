//! RFC 8707 resource indicators on token requests
//!
//! [`ResourceInjector`] wraps another [`HttpSend`] and makes sure every
//! form-encoded `POST` to a token endpoint carries `resource=<uri>`, so the
//! issued token is audience-restricted to the protected resource. The flow
//! engine sends all of its token traffic (code exchange, device polling,
//! refresh) through it.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, Request, Response};

use crate::error::Result;
use crate::transport::HttpSend;

/// Decorator that adds the `resource` parameter to token requests.
#[derive(Debug, Clone)]
pub struct ResourceInjector<S> {
    inner: S,
    resource: String,
}

impl<S> ResourceInjector<S> {
    /// Wraps `inner`, injecting `resource` into every token request.
    pub fn new(inner: S, resource: impl Into<String>) -> Self {
        Self {
            inner,
            resource: resource.into(),
        }
    }

    /// The resource URI being injected.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The wrapped sender.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: HttpSend> HttpSend for ResourceInjector<S> {
    async fn send(&self, mut request: Request) -> Result<Response> {
        inject_resource(&mut request, &self.resource);
        self.inner.send(request).await
    }
}

/// Sets `resource` on a token request's form body.
///
/// Applies only to `POST` requests whose path contains `token` and whose
/// body is fully buffered. An existing `resource` value is overwritten in
/// place; otherwise the parameter is appended. `Content-Length` is
/// recomputed. Returns whether the request was modified.
pub fn inject_resource(request: &mut Request, resource: &str) -> bool {
    if request.method() != Method::POST || !request.url().path().contains("token") {
        return false;
    }

    let existing = match request.body() {
        None => Vec::new(),
        Some(body) => match body.as_bytes() {
            Some(bytes) => bytes.to_vec(),
            None => {
                tracing::debug!(url = %request.url(), "Token request body is streamed; resource not injected");
                return false;
            }
        },
    };

    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(&existing)
        .into_owned()
        .filter_map(|(key, value)| {
            if key != "resource" {
                Some((key, value))
            } else if !replaced {
                replaced = true;
                Some((key, resource.to_string()))
            } else {
                None
            }
        })
        .collect();
    if !replaced {
        pairs.push(("resource".to_string(), resource.to_string()));
    }

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();

    let headers = request.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/x-www-form-urlencoded"));
    *request.body_mut() = Some(Body::from(encoded));
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
