//! Configuration loading integration tests
//!
//! Environment variable tests are `#[serial]` because they mutate process
//! state shared by every test in the binary.

mod common;

use clap::Parser;
use serial_test::serial;

use common::temp_config_file;
use mcpauth::cli::Cli;
use mcpauth::config::{AuthConfig, FlowType};

const ENV_VARS: &[&str] = &[
    "MCPAUTH_RESOURCE",
    "MCPAUTH_CLIENT_ID",
    "MCPAUTH_CLIENT_SECRET",
    "MCPAUTH_SCOPES",
    "MCPAUTH_FLOW",
    "MCPAUTH_REDIRECT_PORT",
    "MCPAUTH_AUTH_URL",
    "MCPAUTH_DEVICE_AUTH_URL",
    "MCPAUTH_TOKEN_URL",
    "MCPAUTH_REGISTRATION_URL",
    "MCPAUTH_NO_TOKEN_CACHE",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

const YAML: &str = r#"
resource_uri: https://api.example.com/mcp
client_id: file-client
scopes:
  - openid
  - mcp
redirect_port: 8765
flow: authorization-code
token_url: https://auth.example.com/token
"#;

#[test]
#[serial]
fn test_load_reads_yaml_file() {
    clear_env();
    let (_dir, path) = temp_config_file(YAML);
    let cli = Cli::try_parse_from(["mcpauth", "login"]).unwrap();

    let config = AuthConfig::load(path.to_str().unwrap(), &cli).unwrap();
    assert_eq!(config.resource_uri, "https://api.example.com/mcp");
    assert_eq!(config.client_id, "file-client");
    assert_eq!(config.scopes, vec!["openid", "mcp"]);
    assert_eq!(config.redirect_port, 8765);
    assert_eq!(config.flow, FlowType::AuthorizationCode);
    assert_eq!(config.token_endpoint(), Some("https://auth.example.com/token"));
    assert!(config.use_token_cache, "unset booleans keep their defaults");
    assert!(config.allow_dynamic_registration);
    config.validate().unwrap();
}

#[test]
#[serial]
fn test_load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let cli = Cli::try_parse_from([
        "mcpauth",
        "--resource",
        "https://api.example.com/mcp",
        "login",
    ])
    .unwrap();

    let config = AuthConfig::load(path.to_str().unwrap(), &cli).unwrap();
    assert_eq!(config, AuthConfig::new("https://api.example.com/mcp"));
}

#[test]
#[serial]
fn test_load_rejects_malformed_yaml() {
    clear_env();
    let (_dir, path) = temp_config_file("resource_uri: [unterminated");
    let cli = Cli::try_parse_from(["mcpauth", "login"]).unwrap();

    let err = AuthConfig::load(path.to_str().unwrap(), &cli).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"), "got: {err}");
}

#[test]
#[serial]
fn test_env_overrides_file_and_cli_overrides_env() {
    clear_env();
    let (_dir, path) = temp_config_file(YAML);
    std::env::set_var("MCPAUTH_CLIENT_ID", "env-client");
    std::env::set_var("MCPAUTH_SCOPES", "read, write");
    std::env::set_var("MCPAUTH_FLOW", "device");
    std::env::set_var("MCPAUTH_NO_TOKEN_CACHE", "true");

    let cli = Cli::try_parse_from(["mcpauth", "--client-id", "cli-client", "login"]).unwrap();
    let config = AuthConfig::load(path.to_str().unwrap(), &cli).unwrap();
    clear_env();

    assert_eq!(config.client_id, "cli-client", "flags win over environment");
    assert_eq!(config.scopes, vec!["read", "write"]);
    assert_eq!(config.flow, FlowType::Device);
    assert!(!config.use_token_cache);
    assert_eq!(config.redirect_port, 8765, "untouched file values survive");
}

#[test]
#[serial]
fn test_invalid_env_values_are_ignored() {
    clear_env();
    std::env::set_var("MCPAUTH_FLOW", "carrier-pigeon");
    std::env::set_var("MCPAUTH_REDIRECT_PORT", "not-a-port");
    std::env::set_var("MCPAUTH_NO_TOKEN_CACHE", "maybe");

    let mut config = AuthConfig::new("https://api.example.com/mcp");
    config.apply_env_vars();
    clear_env();

    assert_eq!(config.flow, FlowType::Auto);
    assert_eq!(config.redirect_port, 0);
    assert!(config.use_token_cache);
}

#[test]
#[serial]
fn test_resource_flag_reads_environment() {
    clear_env();
    std::env::set_var("MCPAUTH_RESOURCE", "https://env.example.com/mcp");
    let cli = Cli::try_parse_from(["mcpauth", "discover"]).unwrap();
    clear_env();

    assert_eq!(cli.resource.as_deref(), Some("https://env.example.com/mcp"));
}
