//! # Rate Limiter
//!
//! Token bucket limiters guarding the dispatcher's inbound path.
//!
//! ## Security
//!
//! Rate limiting prevents:
//! - a single peer starving everyone else
//! - signature verification being used to burn CPU
//!
//! A message must pass both the global bucket and its sender's bucket.

use crate::{PeerId, RateLimitConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Token bucket rate limiter.
///
/// # Algorithm
///
/// - Tokens are added continuously at `refill_rate` per second
/// - Each request consumes one token
/// - Requests are rejected when less than one token is available
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Parameters
    ///
    /// - `capacity`: Maximum burst size
    /// - `refill_rate`: Tokens per second
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            state: Mutex::new(Bucket::full(capacity as f64)),
        }
    }

    /// Try to acquire a token.
    ///
    /// Returns `true` if request is allowed, `false` if rate limited.
    pub fn try_acquire(&self) -> bool {
        self.state.lock().try_take(self.capacity, self.refill_rate)
    }

    /// Get current available whole tokens.
    pub fn available(&self) -> u64 {
        let mut bucket = self.state.lock();
        bucket.refill(self.capacity, self.refill_rate);
        bucket.tokens as u64
    }

    /// Check if rate limited without consuming token.
    pub fn is_limited(&self) -> bool {
        self.available() == 0
    }
}

/// How often `allow` drops sender buckets that have refilled completely.
pub const SENDER_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

struct SenderBuckets {
    buckets: HashMap<PeerId, Bucket>,
    last_sweep: Instant,
}

impl SenderBuckets {
    fn evict_full(&mut self, capacity: f64, refill_rate: f64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.refill(capacity, refill_rate);
            bucket.tokens < capacity
        });
        self.last_sweep = Instant::now();
        before - self.buckets.len()
    }
}

/// Global bucket plus one bucket per sender.
///
/// A full bucket behaves exactly like a missing one, so buckets of idle
/// senders are dropped every `SENDER_SWEEP_INTERVAL`.
pub struct SenderRateLimiter {
    config: RateLimitConfig,
    global: RateLimiter,
    per_sender: Mutex<SenderBuckets>,
}

impl SenderRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            global: RateLimiter::new(config.global_burst, config.global_rps),
            config,
            per_sender: Mutex::new(SenderBuckets {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Admit one message from `sender`.
    ///
    /// The sender's bucket is charged before the global one.
    pub fn allow(&self, sender: &PeerId) -> bool {
        let capacity = self.config.per_sender_burst as f64;
        let rate = self.config.per_sender_rps as f64;
        let admitted = {
            let mut senders = self.per_sender.lock();
            if senders.last_sweep.elapsed() >= SENDER_SWEEP_INTERVAL {
                senders.evict_full(capacity, rate);
            }
            senders
                .buckets
                .entry(*sender)
                .or_insert_with(|| Bucket::full(capacity))
                .try_take(capacity, rate)
        };

        admitted && self.global.try_acquire()
    }

    /// Drop the buckets of senders that have refilled completely; returns
    /// how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let capacity = self.config.per_sender_burst as f64;
        let rate = self.config.per_sender_rps as f64;
        self.per_sender.lock().evict_full(capacity, rate)
    }

    /// Number of senders with a bucket.
    pub fn tracked_senders(&self) -> usize {
        self.per_sender.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rate_limiter_allows_within_capacity() {
        let limiter = RateLimiter::new(5, 1);

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_rate_limiter_blocks_over_capacity() {
        let limiter = RateLimiter::new(3, 1);

        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert!(limiter.is_limited());
    }

    #[test]
    fn test_rate_limiter_refills() {
        let limiter = RateLimiter::new(2, 100);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        thread::sleep(Duration::from_millis(50));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_sender_buckets_are_independent() {
        let limiter = SenderRateLimiter::new(RateLimitConfig {
            global_rps: 1,
            global_burst: 100,
            per_sender_rps: 1,
            per_sender_burst: 2,
        });
        let noisy = PeerId([1u8; 32]);
        let quiet = PeerId([2u8; 32]);

        assert!(limiter.allow(&noisy));
        assert!(limiter.allow(&noisy));
        assert!(!limiter.allow(&noisy));
        assert!(limiter.allow(&quiet));
        assert_eq!(limiter.tracked_senders(), 2);
    }

    #[test]
    fn test_global_bucket_caps_all_senders() {
        let limiter = SenderRateLimiter::new(RateLimitConfig {
            global_rps: 1,
            global_burst: 3,
            per_sender_rps: 1,
            per_sender_burst: 10,
        });

        let admitted = (0..6u8)
            .filter(|i| limiter.allow(&PeerId([*i; 32])))
            .count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_idle_sender_buckets_are_evicted() {
        let limiter = SenderRateLimiter::new(RateLimitConfig {
            global_rps: 1_000,
            global_burst: 1_000,
            per_sender_rps: 1_000,
            per_sender_burst: 2,
        });
        for i in 0..50u8 {
            assert!(limiter.allow(&PeerId([i; 32])));
        }
        assert_eq!(limiter.tracked_senders(), 50);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.evict_idle(), 50);
        assert_eq!(limiter.tracked_senders(), 0);
    }

    #[test]
    fn test_throttled_sender_keeps_its_bucket() {
        let limiter = SenderRateLimiter::new(RateLimitConfig {
            global_rps: 100,
            global_burst: 100,
            per_sender_rps: 1,
            per_sender_burst: 2,
        });
        let noisy = PeerId([1u8; 32]);
        assert!(limiter.allow(&noisy));
        assert!(limiter.allow(&noisy));

        assert_eq!(limiter.evict_idle(), 0);
        assert!(!limiter.allow(&noisy));
    }
}
