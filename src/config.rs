//! Connection and pool configuration.
//!
//! Plain serde-derived values; nothing here touches the network. A
//! [`DatabaseConfig`] is what the registry accepts, and what a driver's
//! `build_connection_config` helper consumes to produce its client
//! library's native options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Result, SqlSpecError};

/// Where and how to connect. `database` is a path, DSN, or `:memory:`
/// depending on the backend; `options` carries driver-specific knobs
/// (pragmas, session settings) as plain strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub database: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ConnectionConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// An in-memory database, where the backend supports one.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

/// Pool sizing and lifecycle policy. Durations are carried as
/// milliseconds so configs serialize flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections created eagerly at pool start.
    pub min_size: usize,
    /// Upper bound on live connections.
    pub max_size: usize,
    /// How long an acquire may wait before `PoolExhausted`.
    pub acquire_timeout_ms: u64,
    /// Idle connections older than this are recycled on next acquire.
    pub idle_ttl_ms: Option<u64>,
    /// Ping idle connections before handing them out.
    pub health_check: bool,
    /// Grace period for in-flight work during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 8,
            acquire_timeout_ms: 5_000,
            idle_ttl_ms: None,
            health_check: false,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(SqlSpecError::Config("pool max_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(SqlSpecError::Config(format!(
                "pool min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Everything the registry needs to provision sessions for one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Display name for enumeration; defaults to the connection string.
    #[serde(default)]
    pub name: Option<String>,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Dialect override; defaults to the driver's own dialect.
    #[serde(default)]
    pub dialect: Option<Dialect>,
}

impl DatabaseConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            name: None,
            connection,
            pool: PoolConfig::default(),
            dialect: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.connection.database)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.database.is_empty() {
            return Err(SqlSpecError::Config("connection.database is empty".into()));
        }
        self.pool.validate()
    }
}
