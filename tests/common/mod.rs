//! Shared test driver: the SQLite adapter lifted onto the async contract.
//!
//! Delegation is synchronous inside async fns; SQLite never actually
//! blocks on the network, which makes it a convenient stand-in for
//! exercising the async session, pool, and stack paths.

use async_trait::async_trait;
use rusqlite::Connection;

use sqlspec::config::ConnectionConfig;
use sqlspec::driver::{AsyncDriver, CancelHandle, Driver, DriverCapabilities, SqliteDriver};
use sqlspec::params::DriverParams;
use sqlspec::result::ResultSet;
use sqlspec::Result;

pub struct AsyncSqlite {
    inner: SqliteDriver,
    capabilities: DriverCapabilities,
}

impl AsyncSqlite {
    pub fn new() -> Self {
        let inner = SqliteDriver::new();
        let capabilities = inner.capabilities().clone();
        Self {
            inner,
            capabilities,
        }
    }

    /// Advertise pipeline support without implementing it, to exercise the
    /// sequential fallback.
    pub fn claiming_pipeline() -> Self {
        let mut driver = Self::new();
        driver.capabilities.supports_pipeline = true;
        driver
    }
}

#[async_trait]
impl AsyncDriver for AsyncSqlite {
    type Connection = Connection;

    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection> {
        self.inner.connect(config)
    }

    async fn ping(&self, conn: &mut Self::Connection) -> Result<()> {
        self.inner.ping(conn)
    }

    async fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<ResultSet> {
        self.inner.execute(conn, sql, params)
    }

    async fn execute_many(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        batches: &[DriverParams],
    ) -> Result<u64> {
        self.inner.execute_many(conn, sql, batches)
    }

    async fn execute_script(&self, conn: &mut Self::Connection, sql: &str) -> Result<u64> {
        self.inner.execute_script(conn, sql)
    }

    async fn begin(&self, conn: &mut Self::Connection) -> Result<()> {
        self.inner.begin(conn)
    }

    async fn commit(&self, conn: &mut Self::Connection) -> Result<()> {
        self.inner.commit(conn)
    }

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<()> {
        self.inner.rollback(conn)
    }

    fn cancel_handle(&self, conn: &Self::Connection) -> Option<CancelHandle> {
        Driver::cancel_handle(&self.inner, conn)
    }
}
