//! Bounded statement cache.
//!
//! Maps a stable fingerprint (a hash of raw SQL, dialect, target parameter
//! style, transformation flags, and filter fingerprints, never parameter
//! values) to a compiled statement. LRU eviction, optional soft TTL, and
//! single-flight misses: concurrent lookups of a cold key run the compiler
//! exactly once, with the losers blocking on the winner's cell. A failed
//! compilation leaves the cell empty so a later caller retries.

mod fingerprint;
pub use fingerprint::{compute_hash, short};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use crate::compile::CompiledStatement;
use crate::error::Result;

/// Cache sizing and expiry policy.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of compiled statements held.
    pub capacity: usize,
    /// Entries older than this are recompiled on next access.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: None,
        }
    }
}

/// Cache counters, cumulative since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Entry {
    value: Arc<CompiledStatement>,
    tick: u64,
    inserted: Instant,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    /// Recency index: lowest tick is least recently used.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.map.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.map.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }
}

/// Process-wide, thread-safe store of compiled statements.
pub struct StatementCache {
    inner: Mutex<Inner>,
    flights: Mutex<HashMap<String, Arc<OnceCell<Arc<CompiledStatement>>>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatementCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            flights: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a compiled statement without compiling.
    pub fn get(&self, key: &str) -> Option<Arc<CompiledStatement>> {
        let result = self.lookup(key);
        match result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Insert a compiled statement, evicting the least recently used entry
    /// when over capacity.
    pub fn put(&self, key: &str, compiled: Arc<CompiledStatement>) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.remove(key);
        inner.tick += 1;
        let tick = inner.tick;
        inner.recency.insert(tick, key.to_string());
        inner.map.insert(
            key.to_string(),
            Entry {
                value: compiled,
                tick,
                inserted: Instant::now(),
            },
        );
        while inner.map.len() > self.config.capacity {
            let oldest = match inner.recency.iter().next() {
                Some((&tick, _)) => tick,
                None => break,
            };
            if let Some(victim) = inner.recency.remove(&oldest) {
                inner.map.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                log::debug!("statement cache evicted {}", short(&victim));
            }
        }
    }

    /// Fetch `key`, compiling on a miss. Concurrent misses for the same key
    /// invoke `compile` exactly once; the other callers receive the same
    /// compiled artifact and count as hits.
    pub fn get_or_compile(
        &self,
        key: &str,
        compile: impl FnOnce() -> Result<CompiledStatement>,
    ) -> Result<Arc<CompiledStatement>> {
        if let Some(value) = self.lookup(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let cell = {
            let mut flights = self.flights.lock().expect("flights lock");
            flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut compiled_here = false;
        let outcome = cell.get_or_try_init(|| {
            compiled_here = true;
            compile().map(Arc::new)
        });

        match outcome {
            Ok(value) => {
                let value = value.clone();
                if compiled_here {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    self.put(key, value.clone());
                    self.flights.lock().expect("flights lock").remove(key);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(value)
            }
            Err(err) => {
                self.flights.lock().expect("flights lock").remove(key);
                Err(err)
            }
        }
    }

    /// Drop every entry. Test hook and dialect hot-swap support.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.map.clear();
        inner.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.inner.lock().expect("cache lock").map.len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<CompiledStatement>> {
        let mut inner = self.inner.lock().expect("cache lock");
        let expired = match (self.config.ttl, inner.map.get(key)) {
            (Some(ttl), Some(entry)) => entry.inserted.elapsed() > ttl,
            _ => false,
        };
        if expired {
            inner.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let value = inner.map.get(key).map(|entry| entry.value.clone())?;
        inner.touch(key);
        Some(value)
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompiledStatement;
    use crate::params::ParameterStyle;

    fn fake_compiled(sql: &str) -> CompiledStatement {
        CompiledStatement::for_tests(sql, ParameterStyle::Qmark)
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = StatementCache::default();
        assert!(cache.get("k1").is_none());
        cache.put("k1", Arc::new(fake_compiled("SELECT 1")));
        let found = cache.get("k1").unwrap();
        assert_eq!(found.sql, "SELECT 1");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = StatementCache::new(CacheConfig {
            capacity: 2,
            ttl: None,
        });
        cache.put("a", Arc::new(fake_compiled("A")));
        cache.put("b", Arc::new(fake_compiled("B")));
        // Touch `a` so `b` becomes the eviction victim.
        cache.get("a");
        cache.put("c", Arc::new(fake_compiled("C")));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_expiry_counts_as_miss() {
        let cache = StatementCache::new(CacheConfig {
            capacity: 8,
            ttl: Some(Duration::from_millis(0)),
        });
        cache.put("k", Arc::new(fake_compiled("X")));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_invalidate_clears() {
        let cache = StatementCache::default();
        cache.put("k", Arc::new(fake_compiled("X")));
        cache.invalidate();
        assert_eq!(cache.stats().size, 0);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_single_flight_compiles_once() {
        use std::sync::atomic::AtomicUsize;

        let cache = Arc::new(StatementCache::default());
        let compile_calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let compile_calls = compile_calls.clone();
            handles.push(std::thread::spawn(move || {
                cache
                    .get_or_compile("hot", || {
                        compile_calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open long enough for others to pile up.
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(fake_compiled("SELECT 1"))
                    })
                    .unwrap()
            }));
        }
        for handle in handles {
            let compiled = handle.join().unwrap();
            assert_eq!(compiled.sql, "SELECT 1");
        }
        assert_eq!(compile_calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
    }

    #[test]
    fn test_failed_compile_retries() {
        let cache = StatementCache::default();
        let err = cache.get_or_compile("bad", || {
            Err(crate::error::SqlSpecError::Compile("boom".into()))
        });
        assert!(err.is_err());
        // The flight was cleared; a later call succeeds.
        let ok = cache.get_or_compile("bad", || Ok(fake_compiled("SELECT 2")));
        assert!(ok.is_ok());
    }
}
