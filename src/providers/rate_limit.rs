// =============================================================================
// Rate Limiter — per-provider token bucket
// =============================================================================
//
// Each provider gets its own bucket with a burst capacity and a sustained
// refill rate. Acquisition is non-blocking: when no token is available the
// caller receives a rate-limit failure immediately and may fall back to the
// next provider instead of queueing.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Warn once when the bucket first runs dry, not on every rejected call.
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    warned_empty: bool,
}

/// Non-blocking token bucket.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket with `burst` capacity refilling at `sustained_rps`
    /// tokens per second. The bucket starts full.
    pub fn new(burst: u32, sustained_rps: f64) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: sustained_rps.max(0.01),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                warned_empty: false,
            }),
        }
    }

    /// Take one token. Returns `false` immediately when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Clock-injected variant for deterministic tests.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.warned_empty = false;
            true
        } else {
            if !state.warned_empty {
                warn!(
                    capacity = self.capacity,
                    refill_per_sec = self.refill_per_sec,
                    "token bucket exhausted — requests will be rejected until refill"
                );
                state.warned_empty = true;
            } else {
                debug!("token bucket still empty");
            }
            false
        }
    }

    /// Tokens currently available (diagnostics only).
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        (state.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .field("available", &self.available())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_then_empty() {
        let bucket = TokenBucket::new(3, 1.0);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        // Bucket drained; same instant means no refill.
        assert!(!bucket.try_acquire_at(now));
    }

    #[test]
    fn refills_at_sustained_rate() {
        let bucket = TokenBucket::new(1, 2.0);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now));
        assert!(!bucket.try_acquire_at(now));

        // 2 rps => one token back after 500 ms.
        let later = now + Duration::from_millis(600);
        assert!(bucket.try_acquire_at(later));
        assert!(!bucket.try_acquire_at(later));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(2, 100.0);
        let now = Instant::now();

        // Long idle period: still only `capacity` tokens.
        let later = now + Duration::from_secs(60);
        assert!(bucket.try_acquire_at(later));
        assert!(bucket.try_acquire_at(later));
        assert!(!bucket.try_acquire_at(later));
    }

    #[test]
    fn zero_burst_is_clamped_to_one() {
        let bucket = TokenBucket::new(0, 1.0);
        assert!(bucket.try_acquire());
    }
}
