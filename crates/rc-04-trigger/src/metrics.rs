//! # Trigger Metrics
//!
//! Prometheus metrics for the trigger publisher and subscriber.
//!
//! Enable with the `metrics` feature.
//!
//! ## Metrics Exported
//!
//! - `trigger_registrations_active` - Gauge of registrations forwarded to the underlying trigger
//! - `trigger_registrations_expired_total` - Counter of registrations torn down for staleness
//! - `trigger_events_aggregated_total` - Counter of events delivered to subscriber callbacks
//! - `trigger_event_messages_sent_total` - Counter of `TriggerEvent` messages sent by publishers

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref REGISTRATIONS_ACTIVE: IntGauge = register_int_gauge!(
        "trigger_registrations_active",
        "Registrations currently forwarded to the underlying trigger"
    )
    .expect("Failed to create REGISTRATIONS_ACTIVE metric");

    pub static ref REGISTRATIONS_EXPIRED: IntCounter = register_int_counter!(
        "trigger_registrations_expired_total",
        "Total number of registrations torn down for lack of fresh quorum"
    )
    .expect("Failed to create REGISTRATIONS_EXPIRED metric");

    pub static ref EVENTS_AGGREGATED: IntCounter = register_int_counter!(
        "trigger_events_aggregated_total",
        "Total number of trigger events delivered to callbacks"
    )
    .expect("Failed to create EVENTS_AGGREGATED metric");

    pub static ref EVENT_MESSAGES_SENT: IntCounter = register_int_counter!(
        "trigger_event_messages_sent_total",
        "Total number of TriggerEvent messages sent"
    )
    .expect("Failed to create EVENT_MESSAGES_SENT metric");
}

#[cfg(feature = "metrics")]
pub fn set_registrations_active(count: usize) {
    REGISTRATIONS_ACTIVE.set(count as i64);
}

#[cfg(feature = "metrics")]
pub fn record_registration_expired() {
    REGISTRATIONS_EXPIRED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_event_aggregated() {
    EVENTS_AGGREGATED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_event_messages_sent(count: usize) {
    EVENT_MESSAGES_SENT.inc_by(count as u64);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn set_registrations_active(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_registration_expired() {}

#[cfg(not(feature = "metrics"))]
pub fn record_event_aggregated() {}

#[cfg(not(feature = "metrics"))]
pub fn record_event_messages_sent(_count: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop_when_disabled() {
        set_registrations_active(3);
        record_registration_expired();
        record_event_aggregated();
        record_event_messages_sent(2);
    }
}
