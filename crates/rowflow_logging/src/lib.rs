//! Shared logging setup for rowflow binaries.
//!
//! Libraries only emit `tracing` events; binaries call [`init_logging`] once
//! at startup. `RUST_LOG` overrides the default filter.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "rowflow=info,rowflow_engine=info,rowflow_db=info,rowflow_parsers=info";

/// Logging configuration shared by rowflow binaries.
pub struct LogConfig {
    pub verbose: bool,
}

/// Initialize tracing with a stderr writer. Errors if a global subscriber is
/// already set.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
