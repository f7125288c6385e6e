use std::fs;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use mcpauth::auth::{CredentialStore, Token};

#[allow(dead_code)]
pub const RESOURCE: &str = "https://api.example.com/mcp";

/// Returns a credential store rooted in a fresh temporary directory.
#[allow(dead_code)]
pub fn temp_store() -> (TempDir, CredentialStore) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = CredentialStore::with_root(tmp.path().join("mcpauth"));
    (tmp, store)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("mcpauth.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Builds a bearer token expiring `expires_in_secs` from now.
#[allow(dead_code)]
pub fn token(access: &str, expires_in_secs: Option<i64>, refresh: Option<&str>) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        token_type: "Bearer".to_string(),
        expiry: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
        scopes: vec!["openid".to_string()],
    }
}

/// Returns an RFC 8414 metadata document for an issuer at `base_url`.
#[allow(dead_code)]
pub fn authorization_server_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{}/authorize", base_url),
        "token_endpoint": format!("{}/token", base_url),
        "registration_endpoint": format!("{}/register", base_url),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    })
}
