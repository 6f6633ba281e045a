//! Thread-blocking connection pool.
//!
//! `min_size` connections are created eagerly; up to `max_size` on demand.
//! Acquire blocks on a condition variable within the configured wait
//! budget, then fails with `PoolExhausted`. Idle connections past their
//! TTL are recycled on the next acquire, and an optional health check
//! pings a connection before handing it out. Every guard returns its
//! connection on drop: to the idle set when clean, to destruction when
//! poisoned or when the pool has shut down.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::cache::StatementCache;
use crate::config::DatabaseConfig;
use crate::error::{Result, SqlSpecError};

use super::observer::{LifecycleEvent, ObserverRegistry};
use super::session::Session;
use super::Driver;

struct IdleConn<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: Vec<IdleConn<C>>,
    total: usize,
    closed: bool,
}

pub(crate) struct PoolShared<D: Driver> {
    pub(crate) driver: Arc<D>,
    pub(crate) config: DatabaseConfig,
    pub(crate) cache: Arc<StatementCache>,
    pub(crate) observers: ObserverRegistry,
    state: Mutex<PoolState<D::Connection>>,
    available: Condvar,
}

/// Pool of thread-affine connections for a sync driver.
pub struct Pool<D: Driver> {
    shared: Arc<PoolShared<D>>,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: Driver> Pool<D> {
    /// Start a pool with its own statement cache.
    pub fn start(driver: D, config: DatabaseConfig) -> Result<Self> {
        Self::start_with_cache(driver, config, Arc::new(StatementCache::default()))
    }

    /// Start a pool sharing an existing statement cache (the registry path).
    pub fn start_with_cache(
        driver: D,
        config: DatabaseConfig,
        cache: Arc<StatementCache>,
    ) -> Result<Self> {
        Self::start_shared(Arc::new(driver), config, cache)
    }

    /// Start a pool over an already-shared driver.
    pub fn start_shared(
        driver: Arc<D>,
        config: DatabaseConfig,
        cache: Arc<StatementCache>,
    ) -> Result<Self> {
        config.validate()?;
        let observers = ObserverRegistry::new();

        let mut idle = Vec::with_capacity(config.pool.min_size);
        for _ in 0..config.pool.min_size {
            let conn = driver.connect(&config.connection)?;
            observers.emit(LifecycleEvent::ConnectionCreated {
                backend: driver.capabilities().name,
            });
            idle.push(IdleConn {
                conn,
                idle_since: Instant::now(),
            });
        }
        let total = idle.len();

        Ok(Self {
            shared: Arc::new(PoolShared {
                driver,
                config,
                cache,
                observers,
                state: Mutex::new(PoolState {
                    idle,
                    total,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.shared.observers
    }

    pub fn cache(&self) -> &Arc<StatementCache> {
        &self.shared.cache
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// (idle, total) connection counts.
    pub fn size(&self) -> (usize, usize) {
        let state = self.shared.state.lock().expect("pool lock");
        (state.idle.len(), state.total)
    }

    /// Borrow a connection, waiting up to the configured budget.
    pub fn acquire(&self) -> Result<PooledConnection<D>> {
        let started = Instant::now();
        let deadline = started + self.shared.config.pool.acquire_timeout();
        let ttl = self.shared.config.pool.idle_ttl();
        let health_check = self.shared.config.pool.health_check;

        let mut state = self.shared.state.lock().expect("pool lock");
        loop {
            if state.closed {
                return Err(SqlSpecError::Config("pool is shut down".into()));
            }

            if let Some(idle) = state.idle.pop() {
                let expired = ttl.is_some_and(|ttl| idle.idle_since.elapsed() > ttl);
                if expired {
                    state.total -= 1;
                    drop(state);
                    log::debug!("recycling idle connection past its TTL");
                    self.destroy(idle.conn, LifecycleEvent::ConnectionRecycled {
                        backend: self.shared.driver.capabilities().name,
                    });
                    self.shared.available.notify_one();
                    state = self.shared.state.lock().expect("pool lock");
                    continue;
                }
                if health_check {
                    drop(state);
                    let mut conn = idle.conn;
                    match self.shared.driver.ping(&mut conn) {
                        Ok(()) => return Ok(self.guard(conn)),
                        Err(_) => {
                            self.destroy(conn, LifecycleEvent::ConnectionDestroyed {
                                backend: self.shared.driver.capabilities().name,
                            });
                            let mut relocked = self.shared.state.lock().expect("pool lock");
                            relocked.total -= 1;
                            self.shared.available.notify_one();
                            state = relocked;
                            continue;
                        }
                    }
                }
                return Ok(self.guard(idle.conn));
            }

            if state.total < self.shared.config.pool.max_size {
                state.total += 1;
                drop(state);
                match self.shared.driver.connect(&self.shared.config.connection) {
                    Ok(conn) => {
                        self.shared.observers.emit(LifecycleEvent::ConnectionCreated {
                            backend: self.shared.driver.capabilities().name,
                        });
                        return Ok(self.guard(conn));
                    }
                    Err(err) => {
                        let mut relocked = self.shared.state.lock().expect("pool lock");
                        relocked.total -= 1;
                        self.shared.available.notify_one();
                        drop(relocked);
                        return Err(err);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SqlSpecError::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            let (relocked, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .expect("pool lock");
            state = relocked;
        }
    }

    /// Acquire a connection wrapped in a session.
    pub fn session(&self) -> Result<Session<D>> {
        let conn = self.acquire()?;
        Ok(Session::new(self.shared.clone(), conn))
    }

    /// Stop accepting acquires, destroy idle connections, and wait up to
    /// the shutdown grace period for borrowed ones to come home.
    pub fn shutdown(&self) {
        let grace = self.shared.config.pool.shutdown_grace();
        let deadline = Instant::now() + grace;

        let mut state = self.shared.state.lock().expect("pool lock");
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.total -= idle.len();
        drop(state);

        for entry in idle {
            self.destroy(entry.conn, LifecycleEvent::ConnectionDestroyed {
                backend: self.shared.driver.capabilities().name,
            });
        }

        let mut state = self.shared.state.lock().expect("pool lock");
        while state.total > 0 {
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "pool shutdown grace expired with {} connections still borrowed",
                    state.total
                );
                break;
            }
            let (relocked, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .expect("pool lock");
            state = relocked;
        }
        drop(state);
        self.shared.observers.emit(LifecycleEvent::PoolShutdown);
    }

    fn guard(&self, conn: D::Connection) -> PooledConnection<D> {
        PooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
            recyclable: true,
        }
    }

    fn destroy(&self, conn: D::Connection, event: LifecycleEvent) {
        self.shared.driver.close(conn);
        self.shared.observers.emit(event);
    }
}

/// A borrowed connection. Returned to the pool on drop, or destroyed when
/// poisoned or when the pool is closed.
pub struct PooledConnection<D: Driver> {
    conn: Option<D::Connection>,
    shared: Arc<PoolShared<D>>,
    recyclable: bool,
}

impl<D: Driver> PooledConnection<D> {
    pub fn connection(&self) -> &D::Connection {
        self.conn.as_ref().expect("connection present")
    }

    pub fn connection_mut(&mut self) -> &mut D::Connection {
        self.conn.as_mut().expect("connection present")
    }

    /// Mark this connection unfit for reuse; it is destroyed on return.
    pub fn poison(&mut self) {
        self.recyclable = false;
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.shared.state.lock().expect("pool lock");
        if self.recyclable && !state.closed {
            state.idle.push(IdleConn {
                conn,
                idle_since: Instant::now(),
            });
            drop(state);
        } else {
            state.total -= 1;
            drop(state);
            self.shared.driver.close(conn);
            self.shared.observers.emit(LifecycleEvent::ConnectionDestroyed {
                backend: self.shared.driver.capabilities().name,
            });
        }
        self.shared.available.notify_one();
    }
}
