//! Shared logging utilities for tywrap binaries and tests.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tywrap=info,tywrap_bridge=info,tywrap_protocol=info";

/// Logging configuration shared by tywrap embedders.
pub struct LogConfig {
    pub verbose: bool,
}

/// Initialize tracing with a stderr writer.
///
/// The bridge is a library: file sinks belong to the embedding application,
/// so only a stderr layer is installed here. `RUST_LOG` overrides the
/// default filter.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    Ok(())
}

/// Get the tywrap home directory: ~/.tywrap
pub fn tywrap_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("TYWRAP_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".tywrap")
}

/// Get the worker shim cache directory: ~/.tywrap/shim
pub fn shim_dir() -> PathBuf {
    tywrap_home().join("shim")
}
