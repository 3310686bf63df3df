//! Logging set-up emitting JSON lines through `tracing-subscriber`.
//!
//! Library code only uses `tracing` macros; installing the subscriber is the
//! host's job and happens once at start.

use tracing_subscriber::EnvFilter;

use crate::common::error::{ServeError, ServeResult};

/// Translate a configured level name into a `tracing` filter directive.
///
/// Accepts the usual Rust names as well as `WARNING`/`CRITICAL` spellings.
pub fn level_directive(level: &str) -> ServeResult<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" | "fatal" => Ok("error"),
        "off" => Ok("off"),
        other => Err(ServeError::Config(format!("unknown log level '{other}'"))),
    }
}

/// Install the global JSON subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns an error if the level is unknown or a subscriber is already installed.
pub fn init(level: &str) -> ServeResult<()> {
    let directive = level_directive(level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .with_target(true)
        .try_init()
        .map_err(|e| ServeError::Config(format!("logging already initialised: {e}")))
}
