//! # Remote Capabilities Telemetry
//!
//! Logging setup shared by node binaries and tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_telemetry::{init_logging, TelemetryConfig};
//!
//! init_logging(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `RC_JSON_LOGS` | `false` | JSON output |
//! | `RC_SERVICE_NAME` | `remote-capabilities` | Service name |
//!
//! With the `metrics` feature, `gather_text()` renders the Prometheus
//! registry the engine crates write to.

mod config;
mod logging;
#[cfg(feature = "metrics")]
mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;

#[doc(hidden)]
pub use tracing;
#[cfg(feature = "metrics")]
pub use metrics::gather_text;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),

    #[error("Failed to export metrics: {0}")]
    MetricsExport(String),
}
