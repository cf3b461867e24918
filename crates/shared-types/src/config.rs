//! # Engine Configuration
//!
//! Configuration for the dispatcher and the protocol engines.
//!
//! Every struct has a `Default` carrying the documented defaults, an
//! `apply_defaults()` that replaces zero values, and a `from_env()` that
//! starts from the defaults and applies environment overrides.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RC_RECEIVER_BUFFER_SIZE` | `10000` | Per-receiver inbound queue |
//! | `RC_REQUEST_TIMEOUT_MS` | `120000` | Target request lifetime |
//! | `RC_REGISTRATION_REFRESH_MS` | `30000` | Subscriber re-announce period |
//! | `RC_REGISTRATION_EXPIRY_MS` | `120000` | Registration freshness window |
//! | `RC_MIN_RESPONSES_TO_AGGREGATE` | `F+1` | Trigger event quorum |
//! | `RC_MESSAGE_EXPIRY_MS` | `120000` | Message cache GC age |
//! | `RC_MAX_BATCH_SIZE` | `100` | Workflows per trigger event message |
//! | `RC_BATCH_COLLECTION_PERIOD_MS` | `100` | Publisher batching window |

use crate::TypesError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_u64(name).map(Duration::from_millis)
}

fn or_default(value: &mut Duration, default: Duration) {
    if value.is_zero() {
        *value = default;
    }
}

// =============================================================================
// TRANSMISSION
// =============================================================================

/// Shape of a transmission schedule across a DON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionSchedule {
    /// One wave containing every member.
    #[default]
    AllAtOnce,
    /// One member per wave, waves `delta_stage` apart.
    OneAtATime,
}

impl FromStr for TransmissionSchedule {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allAtOnce" => Ok(Self::AllAtOnce),
            "oneAtATime" => Ok(Self::OneAtATime),
            other => Err(TypesError::InvalidConfig(format!(
                "unknown transmission schedule: {other}"
            ))),
        }
    }
}

/// Schedule plus the spacing between its waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmissionConfig {
    pub schedule: TransmissionSchedule,
    pub delta_stage: Duration,
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Token bucket settings for inbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub global_rps: u64,
    pub global_burst: u64,
    pub per_sender_rps: u64,
    pub per_sender_burst: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rps: 800,
            global_burst: 1000,
            per_sender_rps: 10,
            per_sender_burst: 50,
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Version stamped on outbound messages.
    pub supported_version: u32,
    /// Capacity of each receiver's inbound queue.
    pub receiver_buffer_size: usize,
    pub rate_limit: RateLimitConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            supported_version: crate::PROTOCOL_VERSION,
            receiver_buffer_size: 10_000,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_u64("RC_RECEIVER_BUFFER_SIZE") {
            config.receiver_buffer_size = size as usize;
        }
        config.apply_defaults();
        config
    }

    pub fn apply_defaults(&mut self) {
        let defaults = Self::default();
        if self.supported_version == 0 {
            self.supported_version = defaults.supported_version;
        }
        if self.receiver_buffer_size == 0 {
            self.receiver_buffer_size = defaults.receiver_buffer_size;
        }
    }
}

// =============================================================================
// TARGET
// =============================================================================

/// Configuration shared by the target client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTargetConfig {
    /// Lifetime of a request on either side before it is timed out.
    pub request_timeout: Duration,
    /// Schedule used when a request's own config does not specify one.
    pub transmission: TransmissionConfig,
}

impl Default for RemoteTargetConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            transmission: TransmissionConfig::default(),
        }
    }
}

impl RemoteTargetConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = env_millis("RC_REQUEST_TIMEOUT_MS") {
            config.request_timeout = timeout;
        }
        config.apply_defaults();
        config
    }

    pub fn apply_defaults(&mut self) {
        or_default(&mut self.request_timeout, Self::default().request_timeout);
    }
}

// =============================================================================
// TRIGGER
// =============================================================================

/// Configuration shared by the trigger publisher and subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTriggerConfig {
    /// How often a subscriber re-announces its registrations.
    pub registration_refresh: Duration,
    /// Freshness window for registration quorums.
    pub registration_expiry: Duration,
    /// Trigger event quorum. Zero means `F+1` of the capability DON, resolved
    /// by the subscriber once it knows that DON.
    pub min_responses_to_aggregate: u32,
    /// Age after which message cache entries are collected.
    pub message_expiry: Duration,
    /// Maximum workflow IDs carried by one `TriggerEvent` message.
    pub max_batch_size: usize,
    /// How long the publisher collects events before sending them.
    pub batch_collection_period: Duration,
    /// Capacity of each registration's callback channel.
    pub callback_buffer_size: usize,
}

impl Default for RemoteTriggerConfig {
    fn default() -> Self {
        Self {
            registration_refresh: Duration::from_secs(30),
            registration_expiry: Duration::from_secs(120),
            min_responses_to_aggregate: 0,
            message_expiry: Duration::from_secs(120),
            max_batch_size: 100,
            batch_collection_period: Duration::from_millis(100),
            callback_buffer_size: 1000,
        }
    }
}

impl RemoteTriggerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_millis("RC_REGISTRATION_REFRESH_MS") {
            config.registration_refresh = v;
        }
        if let Some(v) = env_millis("RC_REGISTRATION_EXPIRY_MS") {
            config.registration_expiry = v;
        }
        if let Some(v) = env_u64("RC_MIN_RESPONSES_TO_AGGREGATE") {
            config.min_responses_to_aggregate = v as u32;
        }
        if let Some(v) = env_millis("RC_MESSAGE_EXPIRY_MS") {
            config.message_expiry = v;
        }
        if let Some(v) = env_u64("RC_MAX_BATCH_SIZE") {
            config.max_batch_size = v as usize;
        }
        if let Some(v) = env_millis("RC_BATCH_COLLECTION_PERIOD_MS") {
            config.batch_collection_period = v;
        }
        config.apply_defaults();
        config
    }

    /// Replace zero values with defaults. `min_responses_to_aggregate` is
    /// left alone since its default depends on the capability DON.
    pub fn apply_defaults(&mut self) {
        let defaults = Self::default();
        or_default(&mut self.registration_refresh, defaults.registration_refresh);
        or_default(&mut self.registration_expiry, defaults.registration_expiry);
        or_default(&mut self.message_expiry, defaults.message_expiry);
        or_default(
            &mut self.batch_collection_period,
            defaults.batch_collection_period,
        );
        if self.max_batch_size == 0 {
            self.max_batch_size = defaults.max_batch_size;
        }
        if self.callback_buffer_size == 0 {
            self.callback_buffer_size = defaults.callback_buffer_size;
        }
    }
}
