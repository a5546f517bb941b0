//! Memoized component resolution, one live cache entry per slug.

use crate::error::{Attempt, LoadFailure};
use crate::fetch::SourceFetcher;
use crate::source::{candidates, CacheKey, Candidate, ComponentRef, ResolverConfig};
use futures::future::{BoxFuture, FutureExt, Shared};
use opsdeck_types::ToolkitRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub type Resolution = Result<Arc<ComponentRef>, Arc<LoadFailure>>;

type InFlight = Shared<BoxFuture<'static, Resolution>>;

/// Observable state of a slug's live cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Pending,
    Resolved,
}

enum SlotState {
    Pending(InFlight),
    Resolved(Arc<ComponentRef>),
}

struct Slot {
    key: CacheKey,
    generation: u64,
    state: SlotState,
}

type Cache = Arc<Mutex<HashMap<String, Slot>>>;

/// Resolves toolkit UI entry points through an ordered list of candidates.
///
/// Concurrent callers with the same key share one in-flight resolution.
/// The fetch runs in its own task, so a caller that stops waiting does not
/// cancel it for the others. Failures are evicted, never cached.
pub struct ComponentResolver {
    config: ResolverConfig,
    fetcher: Arc<dyn SourceFetcher>,
    cache: Cache,
    generation: AtomicU64,
}

impl ComponentResolver {
    pub fn new(config: ResolverConfig, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            config,
            fetcher,
            cache: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve(&self, record: &ToolkitRecord) -> Resolution {
        let key = CacheKey::for_record(record);
        let in_flight = {
            let mut cache = lock(&self.cache);
            match cache.get(&key.slug) {
                Some(slot) if slot.key == key => match &slot.state {
                    SlotState::Resolved(component) => return Ok(Arc::clone(component)),
                    SlotState::Pending(in_flight) => in_flight.clone(),
                },
                stale => {
                    if let Some(slot) = stale {
                        debug!(slug = %key.slug, stale_key = %slot.key, "Evicting stale component entry");
                    }
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let in_flight = self.start(record, key.clone(), generation);
                    cache.insert(
                        key.slug.clone(),
                        Slot {
                            key,
                            generation,
                            state: SlotState::Pending(in_flight.clone()),
                        },
                    );
                    in_flight
                }
            }
        };
        in_flight.await
    }

    /// State of the live entry for `slug`, if any.
    pub fn cache_state(&self, slug: &str) -> Option<CacheState> {
        lock(&self.cache).get(slug).map(|slot| match slot.state {
            SlotState::Pending(_) => CacheState::Pending,
            SlotState::Resolved(_) => CacheState::Resolved,
        })
    }

    /// Drops the entry for `slug`. An in-flight fetch still completes for
    /// its current waiters but is not stored.
    pub fn invalidate(&self, slug: &str) -> bool {
        let removed = lock(&self.cache).remove(slug).is_some();
        if removed {
            debug!(slug, "Component entry invalidated");
        }
        removed
    }

    /// Spawns the resolution task. Called with the cache locked, so the task's
    /// own bookkeeping always runs after its slot is inserted.
    fn start(&self, record: &ToolkitRecord, key: CacheKey, generation: u64) -> InFlight {
        let candidates = candidates(record, &self.config);
        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let slug = key.slug.clone();

        let task = tokio::spawn(async move {
            let result = try_candidates(fetcher.as_ref(), &key, candidates).await;
            let mut cache = lock(&cache);
            if cache.get(&key.slug).is_some_and(|s| s.generation == generation) {
                match &result {
                    Ok(component) => {
                        if let Some(slot) = cache.get_mut(&key.slug) {
                            slot.state = SlotState::Resolved(Arc::clone(component));
                        }
                    }
                    Err(_) => {
                        cache.remove(&key.slug);
                    }
                }
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(LoadFailure {
                    slug,
                    attempts: vec![Attempt {
                        source: "resolver".into(),
                        error: e.to_string(),
                    }],
                })),
            }
        }
        .boxed()
        .shared()
    }
}

async fn try_candidates(
    fetcher: &dyn SourceFetcher,
    key: &CacheKey,
    candidates: Vec<Candidate>,
) -> Resolution {
    let mut attempts = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match fetcher.fetch(&candidate.source).await {
            Ok(bytes) => {
                info!(slug = %key.slug, source = %candidate.source, bytes = bytes.len(), "Component resolved");
                return Ok(Arc::new(ComponentRef {
                    key: key.clone(),
                    source: candidate.source,
                    entry_path: candidate.entry_path,
                    bytes,
                }));
            }
            Err(e) => {
                warn!(slug = %key.slug, source = %candidate.source, error = %e, "Component candidate failed");
                attempts.push(Attempt {
                    source: candidate.source.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    Err(Arc::new(LoadFailure {
        slug: key.slug.clone(),
        attempts,
    }))
}

fn lock(cache: &Cache) -> MutexGuard<'_, HashMap<String, Slot>> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}
