//! SWR orchestration over the two tiers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;

use crate::coalesce::{CoalesceResult, Coalescer, CoalescerConfig};
use crate::error::UpstreamError;
use crate::keys;
use crate::metrics;

use super::tiers::{CachedPayload, EdgeTier, SlowTier};

/// Per-endpoint-class cache policy.
///
/// `edge_ttl` and `slow_ttl` are independent so the tiers can be tuned
/// separately; `swr_window` extends both with a stale-but-serveable period.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub edge_ttl: Duration,
    pub slow_ttl: Duration,
    pub swr_window: Duration,
    pub key_prefix: &'static str,
}

impl CachePolicy {
    /// Short-TTL dynamic class: aggregated market prices.
    pub const AGGREGATED: CachePolicy = CachePolicy {
        edge_ttl: Duration::from_secs(60),
        slow_ttl: Duration::from_secs(300),
        swr_window: Duration::from_secs(120),
        key_prefix: "aggregated",
    };

    /// Long-TTL near-static class: the datacenter list.
    pub const DATA_CENTERS: CachePolicy = CachePolicy {
        edge_ttl: Duration::from_secs(3600),
        slow_ttl: Duration::from_secs(86_400),
        swr_window: Duration::from_secs(86_400),
        key_prefix: "data-centers",
    };

    /// Long-TTL near-static class: the world list.
    pub const WORLDS: CachePolicy = CachePolicy {
        edge_ttl: Duration::from_secs(3600),
        slow_ttl: Duration::from_secs(86_400),
        swr_window: Duration::from_secs(86_400),
        key_prefix: "worlds",
    };
}

/// Which store answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Edge,
    Slow,
    Upstream,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Slow => "slow",
            Self::Upstream => "upstream",
        }
    }
}

/// A served payload with its provenance.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub payload: CachedPayload,
    pub source: CacheSource,
    pub stale: bool,
}

/// Dual-tier stale-while-revalidate cache.
///
/// Lookups never propagate tier errors; writes never block the response
/// path; upstream fetches go through the single-flight coalescer.
pub struct SwrCache {
    edge: EdgeTier,
    slow: Option<SlowTier>,
    coalescer: Arc<Coalescer<CachedPayload>>,
}

impl SwrCache {
    /// Edge-only cache (no slow tier configured or reachable).
    pub fn new_local() -> Self {
        Self {
            edge: EdgeTier::new(),
            slow: None,
            coalescer: Arc::new(Coalescer::default()),
        }
    }

    /// Dual-tier cache backed by a Redis pool.
    pub fn new_redis(pool: Pool) -> Self {
        Self {
            edge: EdgeTier::new(),
            slow: Some(SlowTier::new(pool)),
            coalescer: Arc::new(Coalescer::default()),
        }
    }

    /// Override the coalescer tuning. Intended for tests.
    pub fn with_coalescer_config(mut self, config: CoalescerConfig) -> Self {
        self.coalescer = Arc::new(Coalescer::new(config));
        self
    }

    /// Serve `key` from the tiers, or fetch it once upstream.
    ///
    /// 1. Edge probe: serveable entry wins; stale triggers a background
    ///    revalidation.
    /// 2. Slow probe: serveable entry wins and is promoted into the edge
    ///    tier with its age preserved; a stale hit, or an entry the edge
    ///    tier refuses as too old, triggers a revalidation.
    /// 3. Miss: one coalesced upstream fetch; the result is written through
    ///    both tiers with fresh metadata.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        policy: CachePolicy,
        fetch: F,
    ) -> CoalesceResult<CacheLookup>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CachedPayload, UpstreamError>> + Send + 'static,
    {
        if let Some((payload, stale)) = self.edge.lookup(key) {
            metrics::record_cache_hit("edge");
            tracing::debug!(key = %key, stale, "cache hit (edge)");
            if stale {
                self.spawn_revalidation(key, policy, fetch);
            }
            return Ok(CacheLookup {
                payload,
                source: CacheSource::Edge,
                stale,
            });
        }

        if let Some(slow) = &self.slow
            && let Some((payload, age, stale)) = slow.lookup(key).await
        {
            metrics::record_cache_hit("slow");
            tracing::debug!(key = %key, stale, "cache hit (slow)");
            let promoted =
                self.edge
                    .promote(key, payload.clone(), age, policy.edge_ttl, policy.swr_window);
            // An entry too old for the edge window can never be served
            // locally; refresh it now even though the slow tier still
            // considers it serveable.
            if stale || !promoted {
                self.spawn_revalidation(key, policy, fetch);
            }
            return Ok(CacheLookup {
                payload,
                source: CacheSource::Slow,
                stale,
            });
        }

        metrics::record_cache_miss();
        tracing::debug!(key = %key, "cache miss");

        let edge = self.edge.clone();
        let slow = self.slow.clone();
        let store_key = key.to_string();
        let payload = self
            .coalescer
            .run(key, move || async move {
                let payload = fetch().await?;
                write_through(&edge, slow, &store_key, policy, payload.clone());
                Ok(payload)
            })
            .await?;

        Ok(CacheLookup {
            payload,
            source: CacheSource::Upstream,
            stale: false,
        })
    }

    /// Remove `key` from both tiers.
    pub fn invalidate(&self, key: &str) {
        self.edge.remove(key);
        if let Some(slow) = &self.slow {
            slow.remove(key);
        }
    }

    /// "edge-only" or "dual-tier", for the identity endpoint and logs.
    pub fn mode(&self) -> &'static str {
        if self.slow.is_some() {
            "dual-tier"
        } else {
            "edge-only"
        }
    }

    /// Number of edge-tier entries. Diagnostics only.
    pub fn edge_len(&self) -> usize {
        self.edge.len()
    }

    /// Number of tracked in-flight fetches. Diagnostics only.
    pub fn in_flight_count(&self) -> usize {
        self.coalescer.in_flight_count()
    }

    /// Drop edge-tier entries and coalescer tracking. Intended for tests.
    pub fn reset(&self) {
        self.edge.clear();
        self.coalescer.reset();
    }

    /// Fire-and-forget revalidation under the `revalidate:` key namespace.
    ///
    /// Failures leave the existing stale data to age out naturally.
    fn spawn_revalidation<F, Fut>(&self, key: &str, policy: CachePolicy, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CachedPayload, UpstreamError>> + Send + 'static,
    {
        metrics::record_revalidation();
        let coalescer = Arc::clone(&self.coalescer);
        let edge = self.edge.clone();
        let slow = self.slow.clone();
        let reval_key = keys::revalidation_key(key);
        let store_key = key.to_string();

        tokio::spawn(async move {
            let outcome = coalescer
                .run(&reval_key, move || async move {
                    let payload = fetch().await?;
                    write_through(&edge, slow, &store_key, policy, payload.clone());
                    Ok(payload)
                })
                .await;
            if let Err(e) = outcome {
                tracing::debug!(key = %reval_key, error = %e, "background revalidation failed");
            }
        });
    }
}

/// Write a fetched payload through both tiers with fresh metadata.
///
/// The edge write is synchronous (an in-process map insert); the slow write
/// is detached from the response path and swallowed on failure.
fn write_through(
    edge: &EdgeTier,
    slow: Option<SlowTier>,
    key: &str,
    policy: CachePolicy,
    payload: CachedPayload,
) {
    edge.store(key, payload.clone(), policy.edge_ttl, policy.swr_window);
    if let Some(slow) = slow {
        let key = key.to_string();
        tokio::spawn(async move {
            slow.store(&key, payload, policy.slow_ttl, policy.swr_window)
                .await;
        });
    }
}
