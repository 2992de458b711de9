//! Single-flight request coalescing.
//!
//! Concurrent callers for the same key share exactly one producer invocation:
//! the first caller spawns the fetch and every caller (including later
//! arrivals) awaits a shared handle to its result. The tracking map is swept
//! opportunistically on entry, never on a timer, so idle processes do no
//! background work.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::UpstreamError;

/// Result delivered to every waiter of a coalesced fetch.
///
/// The error is `Arc`-wrapped so one failure can fan out to many waiters.
pub type CoalesceResult<T> = Result<T, Arc<UpstreamError>>;

type SharedResult<T> = Shared<BoxFuture<'static, CoalesceResult<T>>>;

/// Tuning knobs for the coalescer.
#[derive(Debug, Clone, Copy)]
pub struct CoalescerConfig {
    /// How long a completed entry lingers so near-simultaneous arrivals
    /// still share the finished fetch.
    pub linger: Duration,
    /// Entries older than this are considered abandoned and detached by the
    /// sweep, whether or not their producer has completed.
    pub max_in_flight: Duration,
    /// Base interval between sweeps; jittered ±20% per sweep.
    pub sweep_interval: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            linger: Duration::from_millis(100),
            max_in_flight: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

struct InFlight<T: Clone> {
    result: SharedResult<T>,
    id: u64,
    created_at: Instant,
}

struct SweepState {
    last: Instant,
    interval: Duration,
}

/// Single-flight coalescer over string keys.
pub struct Coalescer<T: Clone + Send + Sync + 'static> {
    in_flight: Arc<DashMap<String, InFlight<T>>>,
    next_id: AtomicU64,
    sweep: Mutex<SweepState>,
    config: CoalescerConfig,
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            sweep: Mutex::new(SweepState {
                last: Instant::now(),
                interval: jittered(config.sweep_interval),
            }),
            config,
        }
    }

    /// Run `producer` for `key`, or attach to the fetch already in flight.
    ///
    /// The tracking entry is inserted while the map shard is held, before the
    /// producer future can suspend, so a second caller arriving between the
    /// membership check and the first await cannot double-fetch. The producer
    /// runs on a detached task: cancelling one waiter never cancels the fetch
    /// the other waiters depend on.
    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> CoalesceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        self.sweep_if_due();

        let shared = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().result.clone(),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fut = producer();
                let map = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let linger = self.config.linger;

                let task = tokio::spawn(async move {
                    let result = fut.await.map_err(Arc::new);
                    match &result {
                        Ok(_) => {
                            // Keep the completed entry around briefly so a
                            // burst that straddles completion still shares it.
                            let map = Arc::clone(&map);
                            let key = owned_key.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(linger).await;
                                map.remove_if(&key, |_, entry| entry.id == id);
                            });
                        }
                        Err(_) => {
                            // Drop immediately so a retry is not poisoned.
                            map.remove_if(&owned_key, |_, entry| entry.id == id);
                        }
                    }
                    result
                });

                let shared = task
                    .map(|joined| match joined {
                        Ok(result) => result,
                        Err(e) => Err(Arc::new(UpstreamError::transport(format!(
                            "fetch task aborted: {e}"
                        )))),
                    })
                    .boxed()
                    .shared();

                slot.insert(InFlight {
                    result: shared.clone(),
                    id,
                    created_at: Instant::now(),
                });
                shared
            }
        };

        shared.await
    }

    /// Whether a fetch is currently tracked for `key`. Diagnostics only.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of tracked fetches. Diagnostics only.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Drop all tracking state. Intended for tests.
    pub fn reset(&self) {
        self.in_flight.clear();
    }

    /// Piggybacked safety sweep: detach entries older than `max_in_flight`.
    ///
    /// Only the tracking is unbound; a still-running producer keeps running
    /// and its waiters keep their shared handle.
    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let Ok(mut sweep) = self.sweep.lock() else {
                return;
            };
            if now.duration_since(sweep.last) < sweep.interval {
                return;
            }
            sweep.last = now;
            sweep.interval = jittered(self.config.sweep_interval);
        }

        let max = self.config.max_in_flight;
        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, entry| now.duration_since(entry.created_at) <= max);
        let removed = before.saturating_sub(self.in_flight.len());
        if removed > 0 {
            tracing::debug!(removed, "detached abandoned in-flight entries");
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new(CoalescerConfig::default())
    }
}

/// Apply ±20% jitter to a base interval so many workers never sweep in step.
pub(crate) fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let spread = base_ms / 5;
    Duration::from_millis(base_ms - spread + fastrand::u64(0..=spread * 2))
}
