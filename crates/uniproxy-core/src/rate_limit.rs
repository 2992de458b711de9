//! Sliding-window rate limiting.
//!
//! Per-identifier ledgers of request instants, gated by a `(max, window)`
//! policy. Ledgers are shrunk on every check and the whole map is swept
//! opportunistically with a jittered interval, on the same piggybacked
//! pattern as the coalescer, never on a timer.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::coalesce::jittered;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Admission policy: at most `max_requests` per identifier per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request exits the window, or the
    /// full window on admission.
    pub reset_in: u64,
    /// Absolute epoch second at which the window resets.
    pub reset_at: u64,
}

struct SweepState {
    last: Instant,
    interval: Duration,
}

/// Per-identifier sliding-window request ledger.
///
/// Defense-in-depth only: state is process-local and not persisted.
pub struct SlidingWindowLimiter {
    ledgers: DashMap<String, Vec<Instant>>,
    policy: RateLimitPolicy,
    sweep: Mutex<SweepState>,
}

impl SlidingWindowLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            ledgers: DashMap::new(),
            policy,
            sweep: Mutex::new(SweepState {
                last: Instant::now(),
                interval: jittered(SWEEP_INTERVAL),
            }),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Decide whether this arrival is admitted and, if so, record it.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = Instant::now();
        self.sweep_if_due(now);

        let window = self.policy.window;
        let max = self.policy.max_requests;
        let mut ledger = self.ledgers.entry(identifier.to_string()).or_default();
        ledger.retain(|stamp| now.duration_since(*stamp) < window);

        if ledger.len() as u32 >= max {
            let oldest = ledger.first().copied().unwrap_or(now);
            let until_exit = (oldest + window).saturating_duration_since(now);
            let reset_in = ceil_secs(until_exit).max(1);
            return RateLimitDecision {
                allowed: false,
                limit: max,
                remaining: 0,
                reset_in,
                reset_at: epoch_now() + reset_in,
            };
        }

        ledger.push(now);
        let remaining = max - ledger.len() as u32;
        let reset_in = window.as_secs();
        RateLimitDecision {
            allowed: true,
            limit: max,
            remaining,
            reset_in,
            reset_at: epoch_now() + reset_in,
        }
    }

    /// Number of identifiers currently tracked. Diagnostics only.
    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }

    /// Drop all ledgers. Intended for tests.
    pub fn reset(&self) {
        self.ledgers.clear();
    }

    /// Piggybacked sweep: drop expired stamps everywhere, and ledgers that
    /// become empty.
    fn sweep_if_due(&self, now: Instant) {
        {
            let Ok(mut sweep) = self.sweep.lock() else {
                return;
            };
            if now.duration_since(sweep.last) < sweep.interval {
                return;
            }
            sweep.last = now;
            sweep.interval = jittered(SWEEP_INTERVAL);
        }

        let window = self.policy.window;
        self.ledgers.retain(|_, stamps| {
            stamps.retain(|stamp| now.duration_since(*stamp) < window);
            !stamps.is_empty()
        });
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window: Duration) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitPolicy {
            max_requests: max,
            window,
        })
    }

    #[test]
    fn admits_up_to_the_limit() {
        let limiter = limiter(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1");
            assert!(decision.allowed);
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.reset_in, 60);
        }

        let denied = limiter.check("10.0.0.1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.reset_in >= 1 && denied.reset_in <= 60);
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert_eq!(limiter.ledger_count(), 2);
    }

    #[test]
    fn window_expiry_re_admits() {
        let limiter = limiter(1, Duration::from_millis(50));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn ledger_never_exceeds_limit_and_stays_in_window() {
        let limiter = limiter(5, Duration::from_secs(60));
        for _ in 0..20 {
            limiter.check("a");
        }
        let ledger = limiter.ledgers.get("a").expect("ledger exists");
        assert!(ledger.len() <= 5);
        let now = Instant::now();
        assert!(
            ledger
                .iter()
                .all(|stamp| now.duration_since(*stamp) < Duration::from_secs(60))
        );
    }

    #[test]
    fn denial_reset_is_at_least_one_second() {
        let limiter = limiter(1, Duration::from_millis(10));
        assert!(limiter.check("a").allowed);
        let denied = limiter.check("a");
        assert!(!denied.allowed);
        assert_eq!(denied.reset_in, 1);
    }

    #[test]
    fn reset_at_is_anchored_to_epoch_now() {
        let limiter = limiter(2, Duration::from_secs(60));
        let decision = limiter.check("a");
        let now = epoch_now();
        assert!(decision.reset_at >= now + 59 && decision.reset_at <= now + 61);
    }

    #[test]
    fn reset_clears_all_ledgers() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.ledger_count(), 2);
        limiter.reset();
        assert_eq!(limiter.ledger_count(), 0);
        assert!(limiter.check("a").allowed);
    }

    #[test]
    fn first_check_on_fresh_limiter_does_not_panic() {
        let limiter = limiter(60, Duration::from_secs(60));
        let decision = limiter.check("fresh");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 59);
    }
}
