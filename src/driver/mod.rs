//! The driver contract.
//!
//! An adapter is a thin shim mapping a backend client library onto one of
//! two parallel traits: [`Driver`] for thread-blocking backends and
//! [`AsyncDriver`] for cooperatively scheduled ones. Both expose the same
//! verbs; only the suspension discipline differs. Data shapes
//! (`DriverParams`, `ResultSet`, `StackOutcome`) are shared.
//!
//! Variation between backends is a capability record, not a subclass
//! hierarchy: [`DriverCapabilities`] declares the dialect, the placeholder
//! styles, and the optional fast paths (native pipeline, Arrow). Each
//! adapter also supplies the fixed helper set (row collection, rowcount
//! resolution, parameter normalization, connection-config building, error
//! mapping): the first three as trait methods, the last two as adapter
//! functions over its own cursor and config types.

mod observer;
mod pool;
mod session;
mod sqlite;
mod sync_pool;

pub use observer::{LifecycleEvent, LifecycleObserver, ObserverRegistry};
pub use pool::{AsyncPool, AsyncPooledConnection};
pub use session::{Session, TransactionState};
pub use sqlite::{build_connection_config, SqliteConnectOptions, SqliteDriver};
pub use sync_pool::{Pool, PooledConnection};

mod async_session;
pub use async_session::AsyncSession;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use crate::compile::CompileTarget;
use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::error::{Result, SqlSpecError};
use crate::params::{DriverParams, ParameterStyle};
use crate::result::ResultSet;
use crate::stack::{PreparedOperation, StackOutcome};

/// What a backend can do, declared once at adapter construction. The core
/// never probes the environment; absent capabilities mean the generic path.
#[derive(Debug, Clone)]
pub struct DriverCapabilities {
    pub name: &'static str,
    pub dialect: Dialect,
    /// The style compiled SQL is rendered to for this driver.
    pub preferred_style: ParameterStyle,
    pub supported_styles: &'static [ParameterStyle],
    pub allows_mixed_parameters: bool,
    /// Backend can run a statement stack in a single round trip.
    pub supports_pipeline: bool,
    /// Backend produces Arrow batches natively.
    pub supports_arrow: bool,
    /// Scripts may carry positional parameters.
    pub supports_script_parameters: bool,
    /// Cursors can be rewound; results stay restartable.
    pub rewindable_cursors: bool,
}

impl DriverCapabilities {
    /// Capabilities derived entirely from a dialect's defaults.
    pub fn for_dialect(name: &'static str, dialect: Dialect) -> Self {
        Self {
            name,
            dialect,
            preferred_style: dialect.preferred_style(),
            supported_styles: dialect.supported_styles(),
            allows_mixed_parameters: dialect.allows_mixed_parameters(),
            supports_pipeline: false,
            supports_arrow: false,
            supports_script_parameters: false,
            rewindable_cursors: true,
        }
    }

    /// The compile target a session derives for a statement: the
    /// statement's dialect hint wins for parsing, the driver's preferred
    /// style always wins for placeholder rendering.
    pub fn compile_target(&self, statement_dialect: Option<Dialect>) -> CompileTarget {
        CompileTarget {
            dialect: statement_dialect.unwrap_or(self.dialect),
            style: self.preferred_style,
            allows_mixed: self.allows_mixed_parameters,
        }
    }
}

/// A cancel primitive usable from another thread or task while the
/// connection is busy.
pub type CancelHandle = Box<dyn Fn() + Send + 'static>;

/// Outcome of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptResult {
    pub statements: usize,
    pub rows_affected: u64,
}

/// Clamp a driver-reported rowcount to the non-negative contract. `-1`
/// sentinels (common for DDL) become 0 with a warning.
pub fn coerce_rowcount(raw: i64) -> u64 {
    if raw < 0 {
        log::warn!("driver reported rowcount {raw}; coercing to 0");
        0
    } else {
        raw as u64
    }
}

/// Thread-blocking driver contract. Connections are thread-affine: a
/// connection is used by one thread at a time, enforced by `&mut`.
pub trait Driver: Send + Sync + 'static {
    type Connection: Send;

    fn capabilities(&self) -> &DriverCapabilities;

    fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection>;

    /// Liveness probe used by pool health checks.
    fn ping(&self, conn: &mut Self::Connection) -> Result<()>;

    fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<ResultSet>;

    fn execute_many(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        batches: &[DriverParams],
    ) -> Result<u64>;

    fn execute_script(&self, conn: &mut Self::Connection, sql: &str) -> Result<u64>;

    fn execute_arrow(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<RecordBatch> {
        self.execute(conn, sql, params)?.arrow()
    }

    /// Native pipeline execution: all operations in one round trip, one
    /// outcome per operation in order. Only called when the capability
    /// record advertises pipeline support.
    fn execute_pipeline(
        &self,
        _conn: &mut Self::Connection,
        _operations: &[PreparedOperation],
    ) -> Result<Vec<std::result::Result<StackOutcome, SqlSpecError>>> {
        Err(SqlSpecError::Unsupported(
            "driver does not implement a native pipeline".into(),
        ))
    }

    fn begin(&self, conn: &mut Self::Connection) -> Result<()>;
    fn commit(&self, conn: &mut Self::Connection) -> Result<()>;
    fn rollback(&self, conn: &mut Self::Connection) -> Result<()>;

    /// A handle that can interrupt work on this connection from another
    /// thread. `None` when the backend has no cancel primitive.
    fn cancel_handle(&self, _conn: &Self::Connection) -> Option<CancelHandle> {
        None
    }

    /// Adapter hook to reshape parameters right before the wire.
    fn normalize_execute_parameters(&self, params: DriverParams) -> Result<DriverParams> {
        Ok(params)
    }

    fn normalize_execute_many_parameters(
        &self,
        batches: Vec<DriverParams>,
    ) -> Result<Vec<DriverParams>> {
        Ok(batches)
    }

    /// Tear down a connection. The default drop is fine for most clients.
    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Cooperatively scheduled driver contract. Identical verbs; every I/O
/// boundary may suspend. Pure CPU work (parse, compile, cache) never
/// suspends, so the compiler is shared between both worlds untouched.
#[async_trait]
pub trait AsyncDriver: Send + Sync + 'static {
    type Connection: Send;

    fn capabilities(&self) -> &DriverCapabilities;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection>;

    async fn ping(&self, conn: &mut Self::Connection) -> Result<()>;

    async fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<ResultSet>;

    async fn execute_many(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        batches: &[DriverParams],
    ) -> Result<u64>;

    async fn execute_script(&self, conn: &mut Self::Connection, sql: &str) -> Result<u64>;

    async fn execute_arrow(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<RecordBatch> {
        self.execute(conn, sql, params).await?.arrow()
    }

    async fn execute_pipeline(
        &self,
        _conn: &mut Self::Connection,
        _operations: &[PreparedOperation],
    ) -> Result<Vec<std::result::Result<StackOutcome, SqlSpecError>>> {
        Err(SqlSpecError::Unsupported(
            "driver does not implement a native pipeline".into(),
        ))
    }

    async fn begin(&self, conn: &mut Self::Connection) -> Result<()>;
    async fn commit(&self, conn: &mut Self::Connection) -> Result<()>;
    async fn rollback(&self, conn: &mut Self::Connection) -> Result<()>;

    fn cancel_handle(&self, _conn: &Self::Connection) -> Option<CancelHandle> {
        None
    }

    fn normalize_execute_parameters(&self, params: DriverParams) -> Result<DriverParams> {
        Ok(params)
    }

    fn normalize_execute_many_parameters(
        &self,
        batches: Vec<DriverParams>,
    ) -> Result<Vec<DriverParams>> {
        Ok(batches)
    }

    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}
