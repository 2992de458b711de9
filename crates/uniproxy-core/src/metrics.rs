//! Metric recording helpers.
//!
//! Uses the `metrics` facade; the server binary installs the Prometheus
//! recorder. When no recorder is installed these calls are no-ops.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_REVALIDATIONS_TOTAL: &str = "cache_revalidations_total";
    pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";
    pub const UPSTREAM_FETCHES_TOTAL: &str = "upstream_fetches_total";
}

/// Record a cache hit for the given tier ("edge" or "slow").
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a background revalidation attempt.
pub fn record_revalidation() {
    counter!(names::CACHE_REVALIDATIONS_TOTAL).increment(1);
}

/// Record a locally rate-limited request.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record an upstream fetch with its outcome ("ok", "rate_limited", "error").
pub fn record_upstream_fetch(outcome: &str) {
    counter!(names::UPSTREAM_FETCHES_TOTAL, "outcome" => outcome.to_string()).increment(1);
}
