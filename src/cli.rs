//! Command-line interface definition for mcpauth
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for logging in, logging out, inspecting discovery,
//! and fetching a protected resource.

use clap::{Parser, Subcommand};

use crate::config::{FlowType, DEFAULT_CONFIG_PATH};

/// mcpauth - OAuth 2.1 client authentication for bearer-protected APIs
///
/// Discovers the authorization server protecting a resource, obtains a
/// token through the browser or device flow, and caches it for reuse.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcpauth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: Option<String>,

    /// Protected resource URI (overrides the config file)
    #[arg(short, long, global = true, env = "MCPAUTH_RESOURCE")]
    pub resource: Option<String>,

    /// OAuth flow to use
    #[arg(long, global = true, value_enum)]
    pub flow: Option<FlowType>,

    /// Static OAuth client ID (skips dynamic registration)
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcpauth
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authorize against the resource and cache the token
    Login,

    /// Delete the cached token and client registration for the resource
    Logout,

    /// Print the OAuth endpoints protecting the resource as JSON
    Discover,

    /// GET a URL with a bearer token and print the response body
    Fetch {
        /// URL to fetch (defaults to the resource URI)
        url: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
