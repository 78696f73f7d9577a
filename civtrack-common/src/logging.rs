//! Tracing subscriber setup shared by civtrack binaries

use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_level` (from config) is used.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", default_level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
