//! # Target Metrics
//!
//! Prometheus metrics for the target client and server.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! rc-03-target = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `target_requests_started_total` - Counter of client requests started
//! - `target_requests_resolved_total` - Counter of resolved client requests (by outcome)
//! - `target_requests_expired_total` - Counter of requests timed out (by side)
//! - `target_capability_executions_total` - Counter of underlying executions (by outcome)

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref REQUESTS_STARTED: IntCounter = register_int_counter!(
        "target_requests_started_total",
        "Total number of client requests started"
    )
    .expect("Failed to create REQUESTS_STARTED metric");

    /// Resolved client requests, labeled by outcome
    pub static ref REQUESTS_RESOLVED: IntCounterVec = register_int_counter_vec!(
        "target_requests_resolved_total",
        "Total number of client requests resolved",
        &["outcome"]
    )
    .expect("Failed to create REQUESTS_RESOLVED metric");

    /// Expired requests, labeled by side (client/server)
    pub static ref REQUESTS_EXPIRED: IntCounterVec = register_int_counter_vec!(
        "target_requests_expired_total",
        "Total number of requests that timed out",
        &["side"]
    )
    .expect("Failed to create REQUESTS_EXPIRED metric");

    pub static ref CAPABILITY_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "target_capability_executions_total",
        "Total number of underlying capability executions",
        &["outcome"]
    )
    .expect("Failed to create CAPABILITY_EXECUTIONS metric");
}

#[cfg(feature = "metrics")]
pub fn record_request_started() {
    REQUESTS_STARTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_request_resolved(outcome: &str) {
    REQUESTS_RESOLVED.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_request_expired(side: &str) {
    REQUESTS_EXPIRED.with_label_values(&[side]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_capability_execution(outcome: &str) {
    CAPABILITY_EXECUTIONS.with_label_values(&[outcome]).inc();
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_request_started() {}

#[cfg(not(feature = "metrics"))]
pub fn record_request_resolved(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_request_expired(_side: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_capability_execution(_outcome: &str) {}
