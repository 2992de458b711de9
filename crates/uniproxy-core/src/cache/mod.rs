//! Dual-tier stale-while-revalidate caching.
//!
//! ## Architecture
//!
//! - **Edge tier (DashMap)**: in-memory, per-process, probed first; keyed by
//!   a synthesized URL-form key.
//! - **Slow tier (Redis)**: shared, optionally absent; keyed by the raw
//!   cache key and surviving process restarts.
//!
//! ```text
//! GET request → edge tier → slow tier → upstream (coalesced)
//!                   │fresh → respond
//!                   │stale-serveable → respond + background revalidate
//!                   └expired → treated as absent, entry removed
//! ```
//!
//! ## Graceful degradation
//!
//! If Redis is unavailable or disabled the cache operates on the edge tier
//! alone. Tier probe and write failures never propagate: a failed probe is a
//! miss, a failed write is logged and dropped.

pub mod swr;
pub mod tiers;

pub use swr::{CacheLookup, CachePolicy, CacheSource, SwrCache};
pub use tiers::{CachedPayload, EdgeTier, Freshness, SlowTier, classify};
