//! Tracing infrastructure.
//!
//! Structured, async-aware logging via `tracing` and `tracing-subscriber`.
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! default level, so a deployment can re-scope logging without touching the
//! configuration file.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppResult, LogError};

/// Install the global subscriber. `default_level` is any `EnvFilter`
/// directive, typically just `"info"` or `"debug"`.
pub fn init(default_level: &str) -> AppResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(default_level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| LogError::Configuration(format!("failed to install subscriber: {e}")))?;
    Ok(())
}

fn parse_filter(directives: &str) -> AppResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| LogError::Configuration(format!("invalid log filter: {e}")))
}
