//! RFC 8707 resource injection through a live HTTP round trip

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use mcpauth::auth::resource::ResourceInjector;
use mcpauth::transport::{get_json, post_form, HttpSend};

const RESOURCE: &str = "https://api.example.com/mcp";
const ENCODED_RESOURCE: &str = "resource=https%3A%2F%2Fapi.example.com%2Fmcp";

fn form_values(request: &Request, key: &str) -> Vec<String> {
    url::form_urlencoded::parse(&request.body)
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .collect()
}

#[tokio::test]
async fn test_token_request_reaches_server_with_resource() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains(ENCODED_RESOURCE))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let injector = ResourceInjector::new(reqwest::Client::new(), RESOURCE);
    let url = url::Url::parse(&format!("{}/oauth/token", server.uri())).unwrap();
    let response = injector
        .send(post_form(&url, &[("grant_type", "refresh_token")]))
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_conflicting_resource_is_overwritten_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let injector = ResourceInjector::new(reqwest::Client::new(), RESOURCE);
    let url = url::Url::parse(&format!("{}/token", server.uri())).unwrap();
    injector
        .send(post_form(
            &url,
            &[
                ("resource", "https://evil.example.com"),
                ("code", "abc"),
                ("resource", "https://other.example.com"),
            ],
        ))
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(form_values(&received[0], "resource"), vec![RESOURCE.to_string()]);
    assert_eq!(form_values(&received[0], "code"), vec!["abc".to_string()]);
}

#[tokio::test]
async fn test_non_token_requests_pass_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token/info"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let injector = ResourceInjector::new(reqwest::Client::new(), RESOURCE);
    let info = url::Url::parse(&format!("{}/token/info", server.uri())).unwrap();
    let register = url::Url::parse(&format!("{}/register", server.uri())).unwrap();
    injector.send(get_json(&info)).await.unwrap();
    injector
        .send(post_form(&register, &[("client_name", "x")]))
        .await
        .unwrap();

    for request in server.received_requests().await.unwrap() {
        assert!(
            form_values(&request, "resource").is_empty(),
            "{} {} must not carry a resource",
            request.method,
            request.url.path()
        );
    }
}
