//! Registry: configuration handles and session provisioning.
//!
//! The registry maps opaque [`Handle`]s to database configurations and
//! their (lazily started) pools. There is no process-wide singleton; every
//! consumer receives a registry reference and a handle explicitly. All
//! pools under one registry share one statement cache.
//!
//! Scoped provisioning (`with_session`) wraps the scope in an implicit
//! transaction: commit when the closure succeeds, rollback when it fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::cache::{CacheStats, StatementCache};
use crate::config::DatabaseConfig;
use crate::driver::{
    AsyncDriver, AsyncPool, AsyncSession, Driver, Pool, PooledConnection, Session,
};
use crate::error::{Result, SqlSpecError};

/// Opaque ticket for a registered configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Entry<P> {
    config: DatabaseConfig,
    pool: Option<P>,
}

/// Registry for a synchronous driver.
pub struct Registry<D: Driver> {
    driver: Arc<D>,
    cache: Arc<StatementCache>,
    entries: Mutex<HashMap<u64, Entry<Pool<D>>>>,
    next_id: AtomicU64,
}

impl<D: Driver> Registry<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
            cache: Arc::new(StatementCache::default()),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a configuration. No I/O happens until the first session.
    pub fn add_config(&self, config: DatabaseConfig) -> Result<Handle> {
        config.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("registry lock")
            .insert(id, Entry { config, pool: None });
        Ok(Handle(id))
    }

    /// Registered configurations, for enumeration.
    pub fn configs(&self) -> Vec<(Handle, String)> {
        let entries = self.entries.lock().expect("registry lock");
        let mut out: Vec<(Handle, String)> = entries
            .iter()
            .map(|(id, entry)| (Handle(*id), entry.config.display_name().to_string()))
            .collect();
        out.sort_by_key(|(handle, _)| handle.0);
        out
    }

    /// Statement-cache counters shared by every pool in this registry.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// A session over a pooled connection for `handle`.
    pub fn provide_session(&self, handle: Handle) -> Result<Session<D>> {
        self.pool(handle)?.session()
    }

    /// A bare pooled connection for `handle`.
    pub fn provide_connection(&self, handle: Handle) -> Result<PooledConnection<D>> {
        self.pool(handle)?.acquire()
    }

    /// Scoped session with an implicit transaction: commit on success,
    /// rollback on any error. The connection returns to the pool on every
    /// exit path.
    pub fn with_session<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut Session<D>) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.provide_session(handle)?;
        session.transaction(f)
    }

    /// Shut down every started pool.
    pub fn close_all_pools(&self) {
        let pools: Vec<Pool<D>> = {
            let mut entries = self.entries.lock().expect("registry lock");
            entries
                .values_mut()
                .filter_map(|entry| entry.pool.take())
                .collect()
        };
        for pool in pools {
            pool.shutdown();
        }
    }

    fn pool(&self, handle: Handle) -> Result<Pool<D>> {
        let mut entries = self.entries.lock().expect("registry lock");
        let entry = entries
            .get_mut(&handle.0)
            .ok_or_else(|| SqlSpecError::Config(format!("unknown registry handle {:?}", handle)))?;
        if let Some(pool) = &entry.pool {
            return Ok(pool.clone());
        }
        let pool = Pool::start_shared(
            self.driver.clone(),
            entry.config.clone(),
            self.cache.clone(),
        )?;
        entry.pool = Some(pool.clone());
        Ok(pool)
    }
}

/// Registry for an asynchronous driver. Same shape; provisioning suspends.
pub struct AsyncRegistry<D: AsyncDriver> {
    driver: Arc<D>,
    cache: Arc<StatementCache>,
    entries: Mutex<HashMap<u64, Entry<AsyncPool<D>>>>,
    next_id: AtomicU64,
}

impl<D: AsyncDriver> AsyncRegistry<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
            cache: Arc::new(StatementCache::default()),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_config(&self, config: DatabaseConfig) -> Result<Handle> {
        config.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("registry lock")
            .insert(id, Entry { config, pool: None });
        Ok(Handle(id))
    }

    pub fn configs(&self) -> Vec<(Handle, String)> {
        let entries = self.entries.lock().expect("registry lock");
        let mut out: Vec<(Handle, String)> = entries
            .iter()
            .map(|(id, entry)| (Handle(*id), entry.config.display_name().to_string()))
            .collect();
        out.sort_by_key(|(handle, _)| handle.0);
        out
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn provide_session(&self, handle: Handle) -> Result<AsyncSession<D>> {
        self.pool(handle).await?.session().await
    }

    /// A bare pooled connection for `handle`.
    pub async fn provide_connection(
        &self,
        handle: Handle,
    ) -> Result<crate::driver::AsyncPooledConnection<D>> {
        self.pool(handle).await?.acquire().await
    }

    /// Scoped session with an implicit transaction.
    pub async fn with_session<T, F>(&self, handle: Handle, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut AsyncSession<D>) -> BoxFuture<'a, Result<T>>,
    {
        let mut session = self.provide_session(handle).await?;
        session.transaction(f).await
    }

    pub async fn close_all_pools(&self) {
        let pools: Vec<AsyncPool<D>> = {
            let mut entries = self.entries.lock().expect("registry lock");
            entries
                .values_mut()
                .filter_map(|entry| entry.pool.take())
                .collect()
        };
        for pool in pools {
            pool.shutdown().await;
        }
    }

    async fn pool(&self, handle: Handle) -> Result<AsyncPool<D>> {
        let config = {
            let entries = self.entries.lock().expect("registry lock");
            let entry = entries.get(&handle.0).ok_or_else(|| {
                SqlSpecError::Config(format!("unknown registry handle {:?}", handle))
            })?;
            if let Some(pool) = &entry.pool {
                return Ok(pool.clone());
            }
            entry.config.clone()
        };
        let pool =
            AsyncPool::start_shared(self.driver.clone(), config, self.cache.clone()).await?;
        let mut entries = self.entries.lock().expect("registry lock");
        if let Some(entry) = entries.get_mut(&handle.0) {
            // Another task may have raced us; prefer the stored pool.
            if let Some(existing) = &entry.pool {
                return Ok(existing.clone());
            }
            entry.pool = Some(pool.clone());
        }
        Ok(pool)
    }
}
