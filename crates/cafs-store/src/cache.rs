use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cafs_types::Key;
use tracing::{debug, warn};

use crate::adder::Adder;
use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};
use crate::file::File;
use crate::traits::{Cache, ExpiringCache, Filestore};

/// Decides, before a put, whether the file should be mirrored.
pub type CachePredicate = Arc<dyn Fn(&dyn File) -> bool + Send + Sync>;

/// Builds a cache around a store; lets callers configure a cache once and
/// apply it to whichever store they end up with.
pub type NewCacheFn = Box<dyn Fn(Arc<dyn Filestore>) -> CacheStore + Send + Sync>;

/// Store decorator that mirrors selected puts into a secondary store.
///
/// Every operation is served by the inner store. The secondary store is only
/// ever written to: by `put` when the predicate accepts the file, and by
/// explicit [`Cache::cache`] calls. Entries cached with
/// [`ExpiringCache::cache_for`] are removed from the secondary store by the
/// first eviction sweep after their deadline.
pub struct CacheStore {
    inner: Arc<dyn Filestore>,
    secondary: Option<Arc<dyn Filestore>>,
    config: CacheConfig,
    predicate: CachePredicate,
    expiries: Mutex<HashMap<Key, Instant>>,
}

impl CacheStore {
    /// Wrap `inner`. Without a predicate, every put is mirrored when
    /// `config.full` is set and none otherwise.
    pub fn new(
        inner: Arc<dyn Filestore>,
        secondary: Option<Arc<dyn Filestore>>,
        config: CacheConfig,
    ) -> Self {
        let full = config.full;
        Self {
            inner,
            secondary,
            config,
            predicate: Arc::new(move |_: &dyn File| full),
            expiries: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the mirroring predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&dyn File) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// A factory producing caches that share `secondary` and `config`.
    pub fn factory(secondary: Option<Arc<dyn Filestore>>, config: CacheConfig) -> NewCacheFn {
        Box::new(move |inner: Arc<dyn Filestore>| {
            CacheStore::new(inner, secondary.clone(), config.clone())
        })
    }

    /// The store that mirrored content is written to, if any.
    pub fn secondary(&self) -> Option<&Arc<dyn Filestore>> {
        self.secondary.as_ref()
    }

    /// The mirroring configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Uncache every entry whose time to expiry has passed.
    ///
    /// Runs at the start of every put and cache call; returns the number of
    /// entries removed.
    pub fn evict_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let expired: Vec<Key> = {
            let mut expiries = self.expiries.lock().expect("lock poisoned");
            let keys: Vec<Key> = expiries
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                expiries.remove(key);
            }
            keys
        };
        if expired.is_empty() {
            return Ok(0);
        }
        let secondary = self.secondary_or_err()?;
        for key in &expired {
            secondary.delete(key)?;
            debug!(%key, "expired from cache");
        }
        Ok(expired.len())
    }

    fn secondary_or_err(&self) -> StoreResult<&Arc<dyn Filestore>> {
        self.secondary.as_ref().ok_or(StoreError::CacheUnavailable)
    }

    fn mirror_in_background(&self, secondary: &Arc<dyn Filestore>, key: &Key) {
        let inner = Arc::clone(&self.inner);
        let secondary = Arc::clone(secondary);
        let key = key.clone();
        let spawned = thread::Builder::new()
            .name("cafs-cache-write".to_string())
            .spawn(move || {
                if let Err(err) = mirror(inner.as_ref(), secondary.as_ref(), &key) {
                    warn!(%key, error = %err, "error placing file in cache");
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "could not start cache writer");
        }
    }
}

/// Copy the content under `key` from `from` into `to`.
fn mirror(from: &dyn Filestore, to: &dyn Filestore, key: &Key) -> StoreResult<()> {
    let mut file = from.get(key)?;
    let cached = to.put(file.as_mut(), false)?;
    debug!(%key, %cached, "mirrored into cache");
    Ok(())
}

impl Filestore for CacheStore {
    fn path_prefix(&self) -> &str {
        self.inner.path_prefix()
    }

    fn put(&self, file: &mut dyn File, pin: bool) -> StoreResult<Key> {
        self.evict_expired()?;
        let wanted = (self.predicate)(&*file);
        let key = self.inner.put(file, pin)?;

        if let (true, Some(secondary)) = (wanted, &self.secondary) {
            if self.config.async_write {
                self.mirror_in_background(secondary, &key);
            } else {
                mirror(self.inner.as_ref(), secondary.as_ref(), &key)?;
            }
        }
        Ok(key)
    }

    fn get(&self, key: &Key) -> StoreResult<Box<dyn File>> {
        self.inner.get(key)
    }

    fn has(&self, key: &Key) -> StoreResult<bool> {
        self.inner.has(key)
    }

    fn delete(&self, key: &Key) -> StoreResult<()> {
        self.inner.delete(key)
    }

    fn new_adder(&self, pin: bool, wrap: bool) -> StoreResult<Adder> {
        self.inner.new_adder(pin, wrap)
    }
}

impl Cache for CacheStore {
    fn filestore(&self) -> Arc<dyn Filestore> {
        Arc::clone(&self.inner)
    }

    fn cache(&self, key: &Key) -> StoreResult<()> {
        self.evict_expired()?;
        let secondary = self.secondary_or_err()?;
        mirror(self.inner.as_ref(), secondary.as_ref(), key)?;
        self.expiries.lock().expect("lock poisoned").remove(key);
        Ok(())
    }

    fn uncache(&self, key: &Key) -> StoreResult<()> {
        self.secondary_or_err()?.delete(key)?;
        self.expiries.lock().expect("lock poisoned").remove(key);
        Ok(())
    }
}

impl ExpiringCache for CacheStore {
    fn cache_for(&self, key: &Key, ttl: Duration) -> StoreResult<()> {
        self.cache(key)?;
        // A ttl past the end of the clock never expires.
        if let Some(deadline) = Instant::now().checked_add(ttl) {
            self.expiries
                .lock()
                .expect("lock poisoned")
                .insert(key.clone(), deadline);
        }
        Ok(())
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("prefix", &self.inner.path_prefix())
            .field("has_secondary", &self.secondary.is_some())
            .field(
                "expiring",
                &self.expiries.lock().expect("lock poisoned").len(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
