pub mod cache;
pub mod coalesce;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod rate_limit;

pub use cache::{CacheLookup, CachePolicy, CacheSource, CachedPayload, SwrCache};
pub use coalesce::{Coalescer, CoalescerConfig};
pub use error::UpstreamError;
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, SlidingWindowLimiter};
