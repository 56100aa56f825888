//! speedprobe -- multi-endpoint HTTP throughput estimator.
//!
//! Runs timed downloads (and uploads) against a list of endpoints, in parallel
//! or one at a time, reports a live figure while they run, and reduces the
//! per-endpoint results to a single median.

pub mod config;
pub mod display;
pub mod probes;
pub mod session;
pub mod throughput;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured
/// level. Logs go to stderr so stdout stays clean for reports.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cfg.format {
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e)),
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e)),
    }
}
