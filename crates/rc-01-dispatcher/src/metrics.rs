//! # Dispatcher Metrics
//!
//! Prometheus metrics for the dispatcher.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! rc-01-dispatcher = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `dispatcher_messages_sent_total` - Counter of signed messages handed to the transport
//! - `dispatcher_messages_received_total` - Counter of messages routed to a receiver
//! - `dispatcher_messages_dropped_total` - Counter of dropped inbound messages (by reason)
//! - `dispatcher_receiver_queue_usage` - Gauge of queued messages per capability

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGaugeVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total messages sent
    pub static ref MESSAGES_SENT: IntCounter = register_int_counter!(
        "dispatcher_messages_sent_total",
        "Total number of signed messages handed to the transport"
    )
    .expect("Failed to create MESSAGES_SENT metric");

    /// Total messages routed to a receiver
    pub static ref MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        "dispatcher_messages_received_total",
        "Total number of inbound messages routed to a receiver"
    )
    .expect("Failed to create MESSAGES_RECEIVED metric");

    /// Dropped inbound messages, labeled by reason
    pub static ref MESSAGES_DROPPED: IntCounterVec = register_int_counter_vec!(
        "dispatcher_messages_dropped_total",
        "Total number of inbound messages dropped",
        &["reason"]
    )
    .expect("Failed to create MESSAGES_DROPPED metric");

    /// Messages waiting in each receiver queue
    pub static ref RECEIVER_QUEUE_USAGE: IntGaugeVec = register_int_gauge_vec!(
        "dispatcher_receiver_queue_usage",
        "Messages waiting in a receiver queue",
        &["capability_id"]
    )
    .expect("Failed to create RECEIVER_QUEUE_USAGE metric");
}

#[cfg(feature = "metrics")]
pub fn record_message_sent() {
    MESSAGES_SENT.inc();
}

#[cfg(feature = "metrics")]
pub fn record_message_received() {
    MESSAGES_RECEIVED.inc();
}

/// Record a dropped inbound message with reason
#[cfg(feature = "metrics")]
pub fn record_message_dropped(reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_receiver_queue_usage(capability_id: &str, queued: usize) {
    RECEIVER_QUEUE_USAGE
        .with_label_values(&[capability_id])
        .set(queued as i64);
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_message_sent() {}

#[cfg(not(feature = "metrics"))]
pub fn record_message_received() {}

#[cfg(not(feature = "metrics"))]
pub fn record_message_dropped(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_receiver_queue_usage(_capability_id: &str, _queued: usize) {}
