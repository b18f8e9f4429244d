//! Per-principal rate limiting for expensive endpoints
//!
//! Token bucket per principal, kept in memory. Buckets refill over time and
//! idle ones are dropped by `cleanup`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::Principal;

pub struct RateLimitConfig {
    /// Maximum tokens (burst capacity)
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

pub struct PrincipalRateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<Principal, Bucket>>,
}

impl PrincipalRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// True if the request may proceed, false if `principal` is limited.
    pub fn check(&self, principal: Principal) -> bool {
        // A poisoned lock only means another request panicked mid-update
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();

        let bucket = buckets.entry(principal).or_insert_with(|| Bucket {
            tokens: self.config.max_tokens as f64,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update);
        let refill = elapsed.as_secs_f64() * self.config.refill_rate;
        bucket.tokens = (bucket.tokens + refill).min(self.config.max_tokens as f64);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget principals idle for longer than `max_age`
    pub fn cleanup(&self, max_age: Duration) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
    }
}

/// Uploads: burst of 5, then one every 30 seconds
pub fn upload_limiter() -> PrincipalRateLimiter {
    PrincipalRateLimiter::new(RateLimitConfig {
        max_tokens: 5,
        refill_rate: 1.0 / 30.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let limiter = PrincipalRateLimiter::new(RateLimitConfig {
            max_tokens: 3,
            refill_rate: 0.0,
        });
        let teacher = Principal::Teacher(1);

        for _ in 0..3 {
            assert!(limiter.check(teacher));
        }
        assert!(!limiter.check(teacher));

        // Buckets are per principal, kind included
        assert!(limiter.check(Principal::Student(1)));
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let limiter = PrincipalRateLimiter::new(RateLimitConfig {
            max_tokens: 1,
            refill_rate: 0.0,
        });
        let teacher = Principal::Teacher(1);
        assert!(limiter.check(teacher));
        assert!(!limiter.check(teacher));

        limiter.cleanup(Duration::ZERO);
        assert!(limiter.check(teacher));
    }
}
