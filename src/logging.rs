//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging to stderr, so that
//! command output on stdout stays machine-readable. Integrates with the
//! tracing ecosystem; `RUST_LOG` takes precedence over the defaults.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Returns the filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "mcpauth=debug"
    } else {
        "mcpauth=info"
    }
}

/// Initializes the global tracing subscriber.
///
/// # Arguments
///
/// * `verbose` - Lower the default level to `debug`
/// * `json` - Emit one JSON object per event instead of human-readable lines
///
/// # Errors
///
/// Returns an error if the filter cannot be built or a subscriber is
/// already installed.
///
/// # Examples
///
/// ```no_run
/// use mcpauth::logging::init_logging;
///
/// init_logging(false, true).expect("logging already initialized");
/// ```
pub fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()?;
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()?;
    }

    Ok(())
}
