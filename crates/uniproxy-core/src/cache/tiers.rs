//! The two cache tiers and per-entry freshness accounting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::keys;

/// A cached response body.
///
/// The bytes are wrapped in `Arc` so cache hits clone cheaply; the content
/// type is preserved verbatim from the upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub body: Arc<Vec<u8>>,
    pub content_type: String,
}

impl CachedPayload {
    pub fn new(body: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            body: Arc::new(body),
            content_type: content_type.into(),
        }
    }
}

/// Freshness of an entry relative to its TTL and SWR window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `age <= ttl`: serve, no revalidation.
    Fresh,
    /// `ttl < age <= ttl + swr`: serve, trigger background revalidation.
    Stale,
    /// `age > ttl + swr`: never served; the entry must be removed.
    Expired,
}

/// Classify an entry's age against its policy.
pub fn classify(age: Duration, ttl: Duration, swr: Duration) -> Freshness {
    if age <= ttl {
        Freshness::Fresh
    } else if age <= ttl + swr {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

struct EdgeEntry {
    payload: CachedPayload,
    cached_at: Instant,
    ttl: Duration,
    swr: Duration,
}

/// The fast, per-process tier. Authoritative for latency.
#[derive(Clone, Default)]
pub struct EdgeTier {
    entries: Arc<DashMap<String, EdgeEntry>>,
}

impl EdgeTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe for a serveable entry. Expired entries are removed on sight.
    pub fn lookup(&self, key: &str) -> Option<(CachedPayload, bool)> {
        let url = keys::edge_url(key);
        let entry = self.entries.get(&url)?;
        match classify(entry.cached_at.elapsed(), entry.ttl, entry.swr) {
            Freshness::Fresh => Some((entry.payload.clone(), false)),
            Freshness::Stale => Some((entry.payload.clone(), true)),
            Freshness::Expired => {
                drop(entry);
                self.entries.remove(&url);
                None
            }
        }
    }

    /// Store a freshly fetched payload.
    pub fn store(&self, key: &str, payload: CachedPayload, ttl: Duration, swr: Duration) {
        self.entries.insert(
            keys::edge_url(key),
            EdgeEntry {
                payload,
                cached_at: Instant::now(),
                ttl,
                swr,
            },
        );
    }

    /// Copy a slow-tier entry into this tier, preserving its age so the
    /// freshness clock does not restart on promotion.
    ///
    /// The age was accumulated under the slow tier's (possibly longer)
    /// window, so it is reclassified against this tier's policy first.
    /// Returns `false` without inserting when the entry is already outside
    /// this tier's serveable window; the caller decides how to repair.
    pub fn promote(
        &self,
        key: &str,
        payload: CachedPayload,
        age: Duration,
        ttl: Duration,
        swr: Duration,
    ) -> bool {
        if classify(age, ttl, swr) == Freshness::Expired {
            return false;
        }
        // Instant cannot represent times before process-visible history; if
        // the entry predates it, skip and let the slow tier keep answering.
        let Some(cached_at) = Instant::now().checked_sub(age) else {
            return false;
        };
        self.entries.insert(
            keys::edge_url(key),
            EdgeEntry {
                payload,
                cached_at,
                ttl,
                swr,
            },
        );
        true
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(&keys::edge_url(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Slow-tier entry with its freshness metadata, MessagePack-encoded.
#[derive(Serialize, Deserialize)]
struct SlowEntry {
    body: Vec<u8>,
    content_type: String,
    cached_at_ts: i64,
    ttl_secs: u64,
    swr_secs: u64,
}

/// The shared, optionally-absent tier. Authoritative for reach.
#[derive(Clone)]
pub struct SlowTier {
    pool: Pool,
}

impl SlowTier {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Probe for a serveable entry.
    ///
    /// Returns the payload, its age, and whether it is stale. Any Redis or
    /// decode failure degrades to a miss; expired entries are deleted in the
    /// background.
    pub async fn lookup(&self, key: &str) -> Option<(CachedPayload, Duration, bool)> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "failed to get Redis connection");
                return None;
            }
        };

        let raw: Vec<u8> = match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis GET error");
                return None;
            }
        };

        let entry: SlowEntry = match rmp_serde::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt slow-tier entry");
                self.remove_in_background(key);
                return None;
            }
        };

        let now_ts = time::OffsetDateTime::now_utc().unix_timestamp();
        let age = Duration::from_secs((now_ts - entry.cached_at_ts).max(0) as u64);
        let ttl = Duration::from_secs(entry.ttl_secs);
        let swr = Duration::from_secs(entry.swr_secs);

        match classify(age, ttl, swr) {
            Freshness::Fresh => Some((
                CachedPayload::new(entry.body, entry.content_type),
                age,
                false,
            )),
            Freshness::Stale => Some((
                CachedPayload::new(entry.body, entry.content_type),
                age,
                true,
            )),
            Freshness::Expired => {
                self.remove_in_background(key);
                None
            }
        }
    }

    /// Store a payload with its metadata. The Redis expiry covers the full
    /// serveable window (`ttl + swr`) so entries are not evicted mid-SWR.
    pub async fn store(&self, key: &str, payload: CachedPayload, ttl: Duration, swr: Duration) {
        let entry = SlowEntry {
            body: payload.body.as_ref().clone(),
            content_type: payload.content_type,
            cached_at_ts: time::OffsetDateTime::now_utc().unix_timestamp(),
            ttl_secs: ttl.as_secs(),
            swr_secs: swr.as_secs(),
        };
        let buf = match rmp_serde::to_vec(&entry) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode slow-tier entry");
                return;
            }
        };

        let expiry = (ttl + swr).as_secs();
        match self.pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = conn.set_ex::<_, _, ()>(key, buf, expiry).await {
                    tracing::warn!(key = %key, error = %e, "Redis SET error");
                } else {
                    tracing::debug!(key = %key, expiry_secs = %expiry, "slow tier stored");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to get Redis connection");
            }
        }
    }

    /// Whether the backing Redis is reachable. Used by diagnostics.
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    /// Delete an entry. Failures are logged and dropped.
    pub fn remove(&self, key: &str) {
        self.remove_in_background(key);
    }

    fn remove_in_background(&self, key: &str) {
        let pool = self.pool.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Ok(mut conn) = pool.get().await
                && let Err(e) = conn.del::<_, ()>(&key).await
            {
                tracing::warn!(key = %key, error = %e, "Redis DEL error");
            }
        });
    }
}
