//! mcpauth - OAuth 2.1 client authentication CLI
//!
#![doc = "mcpauth - OAuth 2.1 client authentication CLI"]
#![doc = "Main entry point for the mcpauth binary."]

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use mcpauth::auth::discovery::discover;
use mcpauth::auth::{CredentialStore, OAuthAuthorizer};
use mcpauth::cli::{Cli, Commands};
use mcpauth::config::{AuthConfig, DEFAULT_CONFIG_PATH};
use mcpauth::error::AuthError;
use mcpauth::logging::init_logging;
use mcpauth::transport::{get_json, parse_url, AuthenticatingTransport, HttpSend};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.json_logs)?;

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = AuthConfig::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let http = reqwest::Client::new();
    let store = CredentialStore::new()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted; cancelling authorization");
                cancel.cancel();
            }
        });
    }

    // Execute command
    match cli.command {
        Commands::Login => {
            tracing::info!(resource = %config.resource_uri, "Starting login");
            let transport = build_transport(http, config, store, cancel.clone());
            let token = transport.get_valid_token(&cancel).await?;
            match token.expiry {
                Some(expiry) => eprintln!("{} (expires {})", "Login successful".green().bold(), expiry),
                None => eprintln!("{}", "Login successful".green().bold()),
            }
        }
        Commands::Logout => {
            store.delete_token(&config.resource_uri)?;
            store.delete_registration(&config.resource_uri)?;
            eprintln!("Logged out of {}", config.resource_uri);
        }
        Commands::Discover => match discover(&http, &config.resource_uri).await? {
            Some(found) => println!("{}", serde_json::to_string_pretty(&found)?),
            None => eprintln!("{} does not require OAuth", config.resource_uri),
        },
        Commands::Fetch { url } => {
            let target = url.unwrap_or_else(|| config.resource_uri.clone());
            let target = parse_url(&target, "fetch URL")?;
            let transport = build_transport(http, config, store, cancel);
            let response = transport.send(get_json(&target)).await?;

            let status = response.status();
            let body = response.text().await.map_err(AuthError::from)?;
            if !status.is_success() {
                eprintln!("{} {}", "HTTP".red().bold(), status);
            }
            println!("{}", body);
        }
    }

    Ok(())
}

fn build_transport(
    http: reqwest::Client,
    config: AuthConfig,
    store: CredentialStore,
    cancel: CancellationToken,
) -> AuthenticatingTransport<reqwest::Client> {
    let resource = config.resource_uri.clone();
    let token_store = config.use_token_cache.then(|| store.clone());
    let authorizer = OAuthAuthorizer::new(http.clone(), config, store);
    AuthenticatingTransport::new(http, Arc::new(authorizer), resource, token_store)
        .with_cancellation(cancel)
}
