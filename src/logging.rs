//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber`: level from `MUSTER_LOG` (env
//! filter syntax) when set, otherwise the level passed by the CLI.

use crate::error::{MusterError, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding an env-filter directive.
pub const LOG_ENV_VAR: &str = "MUSTER_LOG";

/// Initialize the global tracing subscriber.
///
/// Calling twice returns an error (the subscriber is process-global).
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| MusterError::Config(format!("failed to initialize logging: {}", e)))
}
