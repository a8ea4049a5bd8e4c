use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use foyer::{BlockEngineBuilder, DeviceBuilder, FsDeviceBuilder, HybridCache, HybridCacheBuilder};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::{CacheControl, CompletionBackend, CompletionRequest, LmError, Response, settings};

const MEMORY_CAPACITY: usize = 256 * 1024 * 1024;
const DISK_CAPACITY: usize = 1024 * 1024 * 1024;

type Slot = Arc<OnceCell<Response>>;

static SHARED_MEMORY_CACHE: LazyLock<Arc<MemoryCache>> =
    LazyLock::new(|| Arc::new(MemoryCache::new()));

/// Whether [`MemoryCache::get_or_compute`] ran the computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a previously stored response.
    Hit,
    /// This caller computed and stored the response.
    Miss,
}

/// Process-local memo table from canonical request key to response.
///
/// Unbounded; entries live until [`clear`](MemoryCache::clear). Each key owns a [`OnceCell`], so
/// concurrent callers with the same key share a single computation; a failed
/// computation leaves the key empty for the next caller.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance every [`LM`](crate::LM) uses unless given its own.
    pub fn shared() -> Arc<Self> {
        SHARED_MEMORY_CACHE.clone()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    #[tracing::instrument(
        name = "dspy_lm.cache.get_or_compute",
        level = "trace",
        skip(self, key, compute),
        fields(key_len = key.len())
    )]
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(Response, CacheOutcome), LmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response, LmError>>,
    {
        let slot = self.slot(key);
        let mut computed = false;
        let response = match slot
            .get_or_try_init(|| {
                computed = true;
                compute()
            })
            .await
        {
            Ok(response) => response.clone(),
            Err(err) => {
                self.evict_empty(key, &slot);
                return Err(err);
            }
        };

        let outcome = if computed {
            CacheOutcome::Miss
        } else {
            CacheOutcome::Hit
        };
        trace!(hit = outcome == CacheOutcome::Hit, "memory cache lookup complete");
        Ok((response, outcome))
    }

    /// Drops `slot` from the table if it is still the entry for `key` and empty.
    fn evict_empty(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            slots.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<Response> {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of keys holding a response.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        debug!("memory cache cleared");
    }
}

/// Durable response storage keyed by canonical request.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Response>, LmError>;
    async fn insert(&self, key: &str, response: &Response) -> Result<(), LmError>;
}

/// Hybrid memory + disk response cache shared across processes.
///
/// Uses [foyer](https://docs.rs/foyer) with 256MB memory and 1GB disk. Entries
/// are stored as JSON text; an entry that no longer parses is reported as
/// [`LmError::CacheUnavailable`] rather than as a miss.
#[derive(Clone)]
pub struct PersistentCache {
    handler: HybridCache<String, String>,
    dir: PathBuf,
}

impl PersistentCache {
    /// Opens the cache under [`settings::cache_dir`].
    pub async fn open_default() -> Result<Self, LmError> {
        Self::open(settings::cache_dir()).await
    }

    #[tracing::instrument(name = "dspy_lm.cache.open", level = "debug")]
    pub async fn open(dir: &Path) -> Result<Self, LmError> {
        let unavailable =
            |err: &dyn std::fmt::Display| LmError::cache_unavailable(format!("{}: {err}", dir.display()));

        std::fs::create_dir_all(dir).map_err(|err| unavailable(&err))?;

        let device = FsDeviceBuilder::new(dir)
            .with_capacity(DISK_CAPACITY)
            .build()
            .map_err(|err| unavailable(&err))?;

        let handler: HybridCache<String, String> = HybridCacheBuilder::new()
            .memory(MEMORY_CAPACITY)
            .storage()
            .with_engine_config(BlockEngineBuilder::new(device))
            .build()
            .await
            .map_err(|err| unavailable(&err))?;

        debug!(dir = %dir.display(), "persistent cache opened");
        Ok(Self {
            handler,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ResponseStore for PersistentCache {
    #[tracing::instrument(name = "dspy_lm.cache.disk_get", level = "trace", skip(self, key))]
    async fn get(&self, key: &str) -> Result<Option<Response>, LmError> {
        let key = key.to_string();
        let entry = self
            .handler
            .get(&key)
            .await
            .map_err(|err| LmError::cache_unavailable(err.to_string()))?;
        trace!(hit = entry.is_some(), "disk cache lookup complete");

        match entry {
            Some(entry) => serde_json::from_str(entry.value())
                .map(Some)
                .map_err(|err| LmError::cache_unavailable(format!("corrupt cache entry: {err}"))),
            None => Ok(None),
        }
    }

    #[tracing::instrument(name = "dspy_lm.cache.disk_insert", level = "trace", skip_all)]
    async fn insert(&self, key: &str, response: &Response) -> Result<(), LmError> {
        let value = serde_json::to_string(response)
            .map_err(|err| LmError::cache_unavailable(format!("unencodable response: {err}")))?;
        self.handler.insert(key.to_string(), value);
        Ok(())
    }
}

/// Gives any [`CompletionBackend`] a durable cache that honors [`CacheControl`].
///
/// The inner backend is always called with [`CacheControl::Bypass`]; responses
/// served from the store carry no cost since no request was made.
pub struct CachedBackend<B, S = PersistentCache> {
    inner: B,
    store: S,
}

impl<B, S> CachedBackend<B, S> {
    pub fn new(inner: B, store: S) -> Self {
        Self { inner, store }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B, S> CompletionBackend for CachedBackend<B, S>
where
    B: CompletionBackend,
    S: ResponseStore,
{
    async fn complete(
        &self,
        request: &CompletionRequest,
        cache: CacheControl,
    ) -> Result<Response, LmError> {
        if cache == CacheControl::Bypass {
            return self.inner.complete(request, CacheControl::Bypass).await;
        }

        let key = request.canonical_key()?;
        if let Some(mut response) = self.store.get(&key).await? {
            debug!(model = %request.model, "served from persistent cache");
            response.hidden_params.response_cost = None;
            return Ok(response);
        }

        let response = self.inner.complete(request, CacheControl::Bypass).await?;
        self.store.insert(&key, &response).await?;
        Ok(response)
    }
}
