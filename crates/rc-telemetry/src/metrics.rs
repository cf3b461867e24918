//! Prometheus text export.
//!
//! Engine crates register their counters in the default registry when built
//! with their `metrics` feature; this renders whatever is registered.

use crate::TelemetryError;
use prometheus::{Encoder, TextEncoder};

/// Render every metric in the default registry in the text exposition format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| TelemetryError::MetricsExport(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsExport(e.to_string()))
}
