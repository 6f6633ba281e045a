//! Cooperative connection pool for async drivers.
//!
//! A tokio semaphore bounds live connections at `max_size`; acquisition
//! suspends until a permit or the wait budget runs out (`PoolExhausted`).
//! Idle connections are kept in a plain mutex (never held across an
//! await) and recycled past their TTL. Shutdown stops new acquires,
//! waits out the grace period for borrowed connections, then drops
//! whatever remains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cache::StatementCache;
use crate::config::DatabaseConfig;
use crate::error::{Result, SqlSpecError};

use super::async_session::AsyncSession;
use super::observer::{LifecycleEvent, ObserverRegistry};
use super::AsyncDriver;

struct IdleConn<C> {
    conn: C,
    idle_since: Instant,
}

pub(crate) struct AsyncPoolShared<D: AsyncDriver> {
    pub(crate) driver: Arc<D>,
    pub(crate) config: DatabaseConfig,
    pub(crate) cache: Arc<StatementCache>,
    pub(crate) observers: ObserverRegistry,
    idle: Mutex<Vec<IdleConn<D::Connection>>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

/// Pool of connections for a cooperative async driver.
pub struct AsyncPool<D: AsyncDriver> {
    shared: Arc<AsyncPoolShared<D>>,
}

impl<D: AsyncDriver> Clone for AsyncPool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: AsyncDriver> AsyncPool<D> {
    pub async fn start(driver: D, config: DatabaseConfig) -> Result<Self> {
        Self::start_with_cache(driver, config, Arc::new(StatementCache::default())).await
    }

    pub async fn start_with_cache(
        driver: D,
        config: DatabaseConfig,
        cache: Arc<StatementCache>,
    ) -> Result<Self> {
        Self::start_shared(Arc::new(driver), config, cache).await
    }

    /// Start a pool over an already-shared driver.
    pub async fn start_shared(
        driver: Arc<D>,
        config: DatabaseConfig,
        cache: Arc<StatementCache>,
    ) -> Result<Self> {
        config.validate()?;
        let observers = ObserverRegistry::new();

        let mut idle = Vec::with_capacity(config.pool.min_size);
        for _ in 0..config.pool.min_size {
            let conn = driver.connect(&config.connection).await?;
            observers.emit(LifecycleEvent::ConnectionCreated {
                backend: driver.capabilities().name,
            });
            idle.push(IdleConn {
                conn,
                idle_since: Instant::now(),
            });
        }

        Ok(Self {
            shared: Arc::new(AsyncPoolShared {
                permits: Arc::new(Semaphore::new(config.pool.max_size)),
                driver,
                config,
                cache,
                observers,
                idle: Mutex::new(idle),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.shared.observers
    }

    pub fn cache(&self) -> &Arc<StatementCache> {
        &self.shared.cache
    }

    /// Borrow a connection, suspending up to the configured wait budget.
    pub async fn acquire(&self) -> Result<AsyncPooledConnection<D>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SqlSpecError::Config("pool is shut down".into()));
        }
        let started = Instant::now();
        let permit = tokio::time::timeout(
            self.shared.config.pool.acquire_timeout(),
            self.shared.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| SqlSpecError::PoolExhausted {
            waited_ms: started.elapsed().as_millis() as u64,
        })?
        .map_err(|_| SqlSpecError::Config("pool is shut down".into()))?;

        let ttl = self.shared.config.pool.idle_ttl();
        loop {
            let candidate = self.shared.idle.lock().expect("pool lock").pop();
            let Some(entry) = candidate else {
                break;
            };
            if ttl.is_some_and(|ttl| entry.idle_since.elapsed() > ttl) {
                log::debug!("recycling idle connection past its TTL");
                self.shared.observers.emit(LifecycleEvent::ConnectionRecycled {
                    backend: self.shared.driver.capabilities().name,
                });
                drop(entry.conn);
                continue;
            }
            if self.shared.config.pool.health_check {
                let mut conn = entry.conn;
                match self.shared.driver.ping(&mut conn).await {
                    Ok(()) => return Ok(self.guard(conn, permit)),
                    Err(_) => {
                        self.shared.observers.emit(LifecycleEvent::ConnectionDestroyed {
                            backend: self.shared.driver.capabilities().name,
                        });
                        drop(conn);
                        continue;
                    }
                }
            }
            return Ok(self.guard(entry.conn, permit));
        }

        let conn = self
            .shared
            .driver
            .connect(&self.shared.config.connection)
            .await?;
        self.shared.observers.emit(LifecycleEvent::ConnectionCreated {
            backend: self.shared.driver.capabilities().name,
        });
        Ok(self.guard(conn, permit))
    }

    /// Acquire a connection wrapped in a session.
    pub async fn session(&self) -> Result<AsyncSession<D>> {
        let conn = self.acquire().await?;
        Ok(AsyncSession::new(self.shared.clone(), conn))
    }

    /// Stop accepting acquires, wait out the grace period for borrowed
    /// connections, then drop everything idle.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let max = self.shared.config.pool.max_size as u32;
        // Owning every permit means every borrowed connection came home.
        let all = tokio::time::timeout(
            self.shared.config.pool.shutdown_grace(),
            self.shared.permits.clone().acquire_many_owned(max),
        )
        .await;
        if all.is_err() {
            log::warn!("pool shutdown grace expired with connections still borrowed");
        }
        self.shared.permits.close();
        let idle = std::mem::take(&mut *self.shared.idle.lock().expect("pool lock"));
        for entry in idle {
            self.shared.driver.close(entry.conn).await;
            self.shared.observers.emit(LifecycleEvent::ConnectionDestroyed {
                backend: self.shared.driver.capabilities().name,
            });
        }
        self.shared.observers.emit(LifecycleEvent::PoolShutdown);
    }

    fn guard(
        &self,
        conn: D::Connection,
        permit: OwnedSemaphorePermit,
    ) -> AsyncPooledConnection<D> {
        AsyncPooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
            _permit: permit,
            recyclable: true,
        }
    }
}

/// A borrowed async connection; returned (or dropped, when poisoned) on
/// guard drop.
pub struct AsyncPooledConnection<D: AsyncDriver> {
    conn: Option<D::Connection>,
    shared: Arc<AsyncPoolShared<D>>,
    _permit: OwnedSemaphorePermit,
    recyclable: bool,
}

impl<D: AsyncDriver> std::fmt::Debug for AsyncPooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPooledConnection")
            .field("recyclable", &self.recyclable)
            .finish()
    }
}

impl<D: AsyncDriver> AsyncPooledConnection<D> {
    pub fn connection(&self) -> &D::Connection {
        self.conn.as_ref().expect("connection present")
    }

    pub fn connection_mut(&mut self) -> &mut D::Connection {
        self.conn.as_mut().expect("connection present")
    }

    pub fn poison(&mut self) {
        self.recyclable = false;
    }
}

impl<D: AsyncDriver> Drop for AsyncPooledConnection<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.recyclable && !self.shared.closed.load(Ordering::SeqCst) {
            self.shared.idle.lock().expect("pool lock").push(IdleConn {
                conn,
                idle_since: Instant::now(),
            });
        } else {
            // Synchronous drop; the async close hook only runs on explicit
            // shutdown.
            drop(conn);
            self.shared.observers.emit(LifecycleEvent::ConnectionDestroyed {
                backend: self.shared.driver.capabilities().name,
            });
        }
    }
}
