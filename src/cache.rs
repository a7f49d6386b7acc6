use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;

use r2d2_redis::r2d2;
use r2d2_redis::redis::Commands;
use r2d2_redis::RedisConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CatalogError;
use crate::models;

pub(crate) type RedisPool = r2d2::Pool<RedisConnectionManager>;

const CACHE_POOL_MAX_OPEN: u32 = 16;
const CACHE_POOL_MIN_IDLE: u32 = 8;
const CACHE_POOL_EXPIRE_SECONDS: u64 = 60;
const CACHE_CONNECT_TIMEOUT_SECONDS: u64 = 2;
const CACHE_TTL_SECONDS: usize = 60;

pub(crate) const INGREDIENTES_KEY: &str = "catalog:ingredientes";
pub(crate) const MAKIS_KEY: &str = "catalog:makis";

/// Key/value operations the listing cache needs from its store.
pub(crate) trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CatalogError>;
    fn set_ex(&self, key: &str, value: Vec<u8>, ttl_seconds: usize) -> Result<(), CatalogError>;
    fn incr(&self, key: &str) -> Result<i64, CatalogError>;
    fn del(&self, key: &str) -> Result<(), CatalogError>;
}

struct RedisBackend {
    pool: RedisPool,
}

impl RedisBackend {
    fn conn(&self) -> Result<r2d2::PooledConnection<RedisConnectionManager>, CatalogError> {
        self.pool
            .get()
            .map_err(|err| CatalogError::Cache(err.to_string()))
    }
}

fn redis_err(err: r2d2_redis::redis::RedisError) -> CatalogError {
    CatalogError::Cache(err.to_string())
}

impl CacheBackend for RedisBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CatalogError> {
        self.conn()?.deref_mut().get(key).map_err(redis_err)
    }

    fn set_ex(&self, key: &str, value: Vec<u8>, ttl_seconds: usize) -> Result<(), CatalogError> {
        self.conn()?
            .deref_mut()
            .set_ex(key, value, ttl_seconds)
            .map_err(redis_err)
    }

    fn incr(&self, key: &str) -> Result<i64, CatalogError> {
        self.conn()?.deref_mut().incr(key, 1).map_err(redis_err)
    }

    fn del(&self, key: &str) -> Result<(), CatalogError> {
        self.conn()?.deref_mut().del(key).map_err(redis_err)
    }
}

/// Generation of a listing as seen before loading it from the store. `None`
/// when the cache is off or unreadable, in which case nothing gets stored.
pub(crate) type Generation = Option<i64>;

fn generation_key(key: &str) -> String {
    format!("{}:gen", key)
}

fn data_key(key: &str, generation: i64) -> String {
    format!("{}:{}", key, generation)
}

/// Read-through cache for full listings. A disabled cache, or one whose Redis
/// is down, behaves as a permanent miss.
///
/// Each listing lives under `<key>:<generation>`. Invalidation bumps the
/// generation, so a fill computed from rows read before a write lands under
/// a generation nobody reads anymore.
#[derive(Clone)]
pub(crate) struct MenuCache {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl MenuCache {
    pub(crate) fn disabled() -> Self {
        MenuCache { backend: None }
    }

    pub(crate) fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        MenuCache {
            backend: Some(backend),
        }
    }

    /// Connects to Redis, falling back to a disabled cache when unreachable.
    pub(crate) fn connect(redis_url: Option<&str>) -> Self {
        let url = match redis_url {
            Some(url) => url,
            None => {
                log::info!("REDIS_URL not set, listing cache disabled");
                return Self::disabled();
            }
        };
        let manager = match RedisConnectionManager::new(url) {
            Ok(manager) => manager,
            Err(err) => {
                log::warn!("invalid redis url {}: {}, listing cache disabled", url, err);
                return Self::disabled();
            }
        };
        match r2d2::Pool::builder()
            .max_size(CACHE_POOL_MAX_OPEN)
            .max_lifetime(Some(Duration::from_secs(CACHE_POOL_EXPIRE_SECONDS)))
            .min_idle(Some(CACHE_POOL_MIN_IDLE))
            .connection_timeout(Duration::from_secs(CACHE_CONNECT_TIMEOUT_SECONDS))
            .build(manager)
        {
            Ok(pool) => {
                log::info!("listing cache connected to {}", url);
                Self::with_backend(Arc::new(RedisBackend { pool }))
            }
            Err(err) => {
                log::warn!("redis unreachable at {}: {}, listing cache disabled", url, err);
                Self::disabled()
            }
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn generation(backend: &dyn CacheBackend, key: &str) -> Result<i64, CatalogError> {
        match backend.get(&generation_key(key))? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| CatalogError::Cache(format!("corrupt generation for {}", key))),
            None => Ok(0),
        }
    }

    /// Returns the cached rows if present, plus the generation to hand back to
    /// `store` after loading on a miss.
    pub(crate) fn lookup<T>(&self, key: &str) -> (Option<Vec<T>>, Generation)
    where
        T: DeserializeOwned,
    {
        let backend = match self.backend.as_deref() {
            Some(backend) => backend,
            None => return (None, None),
        };
        let generation = match Self::generation(backend, key) {
            Ok(generation) => generation,
            Err(err) => {
                log::warn!("cache generation read of {} failed: {}", key, err);
                return (None, None);
            }
        };
        let data_key = data_key(key, generation);
        match backend.get(&data_key) {
            Ok(Some(bytes)) => match models::from_u8(&bytes) {
                Ok(rows) => (Some(rows), Some(generation)),
                Err(err) => {
                    log::warn!("dropping undecodable cache entry {}: {}", data_key, err);
                    if let Err(err) = backend.del(&data_key) {
                        log::warn!("cache eviction of {} failed: {}", data_key, err);
                    }
                    (None, Some(generation))
                }
            },
            Ok(None) => (None, Some(generation)),
            Err(err) => {
                log::warn!("cache read of {} failed: {}", data_key, err);
                (None, None)
            }
        }
    }

    pub(crate) fn store<T>(&self, key: &str, generation: Generation, rows: &[T])
    where
        T: Serialize,
    {
        let (backend, generation) = match (self.backend.as_deref(), generation) {
            (Some(backend), Some(generation)) => (backend, generation),
            _ => return,
        };
        let bytes = match bincode::serialize(rows) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("cannot encode {} for cache: {}", key, err);
                return;
            }
        };
        if let Err(err) = backend.set_ex(&data_key(key, generation), bytes, CACHE_TTL_SECONDS) {
            log::warn!("cache write of {} failed: {}", key, err);
        }
    }

    pub(crate) fn invalidate(&self, keys: &[&str]) {
        if keys.is_empty() {
            return;
        }
        let backend = match self.backend.as_deref() {
            Some(backend) => backend,
            None => return,
        };
        for key in keys {
            if let Err(err) = backend.incr(&generation_key(key)) {
                log::warn!("cache invalidation of {} failed: {}", key, err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Maki;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-process stand-in for Redis. TTLs are ignored.
    #[derive(Default)]
    pub(crate) struct MemoryBackend {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl MemoryBackend {
        pub(crate) fn raw(&self, key: &str) -> Option<Vec<u8>> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        pub(crate) fn put_raw(&self, key: &str, value: Vec<u8>) {
            self.entries.lock().unwrap().insert(key.to_string(), value);
        }
    }

    impl CacheBackend for MemoryBackend {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.raw(key))
        }

        fn set_ex(&self, key: &str, value: Vec<u8>, _ttl: usize) -> Result<(), CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.put_raw(key, value);
            Ok(())
        }

        fn incr(&self, key: &str) -> Result<i64, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            let next = entries
                .get(key)
                .and_then(|raw| String::from_utf8(raw.clone()).ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
                + 1;
            entries.insert(key.to_string(), next.to_string().into_bytes());
            Ok(next)
        }

        fn del(&self, key: &str) -> Result<(), CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn maki(id: i64, nombre: &str) -> Maki {
        Maki {
            id,
            nombre: nombre.to_string(),
            descripcion: String::new(),
            precio: 12.0,
        }
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = MenuCache::disabled();
        assert!(!cache.is_enabled());
        let (rows, generation) = cache.lookup::<Maki>(MAKIS_KEY);
        assert!(rows.is_none());
        cache.store(MAKIS_KEY, generation, &[maki(1, "Rainbow Roll")]);
        assert!(cache.lookup::<Maki>(MAKIS_KEY).0.is_none());
        cache.invalidate(&[MAKIS_KEY, INGREDIENTES_KEY]);
    }

    #[test]
    fn test_connect_without_url_is_disabled() {
        assert!(!MenuCache::connect(None).is_enabled());
        assert!(!MenuCache::connect(Some("not a redis url")).is_enabled());
    }

    #[test]
    fn test_read_through_and_invalidate() {
        let cache = MenuCache::with_backend(Arc::new(MemoryBackend::default()));
        let (rows, generation) = cache.lookup::<Maki>(MAKIS_KEY);
        assert!(rows.is_none());
        assert_eq!(generation, Some(0));

        cache.store(MAKIS_KEY, generation, &[maki(1, "Rainbow Roll")]);
        let (rows, _) = cache.lookup::<Maki>(MAKIS_KEY);
        assert_eq!(rows.unwrap()[0].nombre, "Rainbow Roll");

        cache.invalidate(&[MAKIS_KEY]);
        let (rows, generation) = cache.lookup::<Maki>(MAKIS_KEY);
        assert!(rows.is_none());
        assert_eq!(generation, Some(1));
    }

    #[test]
    fn test_fill_from_before_a_write_is_never_served() {
        let cache = MenuCache::with_backend(Arc::new(MemoryBackend::default()));
        // reader misses and loads the old rows
        let (_, seen) = cache.lookup::<Maki>(MAKIS_KEY);
        // a writer commits and invalidates before the reader stores
        cache.invalidate(&[MAKIS_KEY]);
        cache.store(MAKIS_KEY, seen, &[maki(1, "Old name")]);

        let (rows, generation) = cache.lookup::<Maki>(MAKIS_KEY);
        assert!(rows.is_none());
        cache.store(MAKIS_KEY, generation, &[maki(1, "New name")]);
        assert_eq!(
            cache.lookup::<Maki>(MAKIS_KEY).0.unwrap()[0].nombre,
            "New name"
        );
    }

    #[test]
    fn test_undecodable_entry_is_evicted() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = MenuCache::with_backend(backend.clone());
        backend.put_raw(&data_key(MAKIS_KEY, 0), vec![0xff; 3]);

        let (rows, generation) = cache.lookup::<Maki>(MAKIS_KEY);
        assert!(rows.is_none());
        assert_eq!(generation, Some(0));
        assert!(backend.raw(&data_key(MAKIS_KEY, 0)).is_none());
    }

    #[test]
    fn test_empty_invalidation_skips_backend() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = MenuCache::with_backend(backend.clone());
        cache.invalidate(&[]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
