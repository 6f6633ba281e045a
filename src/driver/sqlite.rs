//! SQLite adapter over rusqlite.
//!
//! The reference implementation of the sync driver contract, and the
//! backend the integration tests run against. Supplies the full adapter
//! helper set: `build_connection_config`, `collect_rows`,
//! `resolve_rowcount`, parameter normalization (inherited defaults), and
//! `map_error`.
//!
//! SQLite accepts several placeholder styles, but this adapter compiles
//! to `?` and binds positionally; that is the one style every SQLite
//! client library agrees on.

use rusqlite::{params_from_iter, Connection, OpenFlags};

use crate::config::ConnectionConfig;
use crate::error::{Result, SqlSpecError};
use crate::params::DriverParams;
use crate::result::{ColumnInfo, ResultSet, Row};
use crate::value::Value;

use super::{coerce_rowcount, CancelHandle, Driver, DriverCapabilities};

/// rusqlite-native connection options.
#[derive(Debug, Clone)]
pub struct SqliteConnectOptions {
    pub path: String,
    pub flags: OpenFlags,
    /// Pragmas applied right after open, in order.
    pub pragmas: Vec<(String, String)>,
}

/// Translate the generic connection config into rusqlite options.
pub fn build_connection_config(config: &ConnectionConfig) -> SqliteConnectOptions {
    let mut flags = OpenFlags::default();
    if config.read_only {
        flags.remove(OpenFlags::SQLITE_OPEN_READ_WRITE);
        flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        flags.insert(OpenFlags::SQLITE_OPEN_READ_ONLY);
    }
    SqliteConnectOptions {
        path: config.database.clone(),
        flags,
        pragmas: config
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// The SQLite driver. Stateless; all state lives in connections.
pub struct SqliteDriver {
    capabilities: DriverCapabilities,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            capabilities: DriverCapabilities::for_dialect("sqlite", crate::dialect::Dialect::Sqlite),
        }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    type Connection = Connection;

    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection> {
        let options = build_connection_config(config);
        let conn = if config.is_in_memory() {
            Connection::open_in_memory().map_err(map_error)?
        } else {
            Connection::open_with_flags(&options.path, options.flags).map_err(map_error)?
        };
        for (pragma, value) in &options.pragmas {
            conn.pragma_update(None, pragma, value.as_str())
                .map_err(map_error)?;
        }
        Ok(conn)
    }

    fn ping(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(map_error)
    }

    fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &DriverParams,
    ) -> Result<ResultSet> {
        let values = positional(params)?;
        let mut stmt = conn.prepare(sql).map_err(map_error)?;
        if stmt.column_count() == 0 {
            let changed = stmt
                .execute(params_from_iter(values.iter()))
                .map_err(map_error)?;
            Ok(ResultSet::from_rows_affected(resolve_rowcount(changed)))
        } else {
            let columns = column_info(&stmt);
            let rows = collect_rows(&mut stmt, &values)?;
            ResultSet::new(columns, rows)
        }
    }

    fn execute_many(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        batches: &[DriverParams],
    ) -> Result<u64> {
        let mut stmt = conn.prepare(sql).map_err(map_error)?;
        let mut total = 0u64;
        for batch in batches {
            let values = positional(batch)?;
            total += resolve_rowcount(
                stmt.execute(params_from_iter(values.iter()))
                    .map_err(map_error)?,
            );
        }
        Ok(total)
    }

    fn execute_script(&self, conn: &mut Self::Connection, sql: &str) -> Result<u64> {
        conn.execute_batch(sql).map_err(map_error)?;
        // SQLite reports no aggregate change count across a batch.
        Ok(0)
    }

    fn begin(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.execute_batch("BEGIN").map_err(map_error)
    }

    fn commit(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.execute_batch("ROLLBACK").map_err(map_error)
    }

    fn cancel_handle(&self, conn: &Self::Connection) -> Option<CancelHandle> {
        let handle = conn.get_interrupt_handle();
        Some(Box::new(move || handle.interrupt()))
    }
}

/// Fixed adapter helper: rows plus their values from a prepared cursor.
fn collect_rows(stmt: &mut rusqlite::Statement<'_>, values: &[rusqlite::types::Value]) -> Result<Vec<Row>> {
    let column_count = stmt.column_count();
    let mut out = Vec::new();
    let mut rows = stmt
        .query(params_from_iter(values.iter()))
        .map_err(map_error)?;
    while let Some(row) = rows.next().map_err(map_error)? {
        let mut row_values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let raw: rusqlite::types::Value = row.get(i).map_err(map_error)?;
            row_values.push(from_sqlite(raw));
        }
        out.push(Row::new(row_values));
    }
    Ok(out)
}

/// Fixed adapter helper: column descriptors from a prepared cursor.
fn column_info(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .iter()
        .map(|column| ColumnInfo {
            name: column.name().to_string(),
            decl_type: column.decl_type().map(|t| t.to_string()),
            nullable: None,
            table: None,
        })
        .collect()
}

/// Fixed adapter helper: rowcount with the non-negative coercion applied.
fn resolve_rowcount(changed: usize) -> u64 {
    coerce_rowcount(changed as i64)
}

/// Fixed adapter helper: rusqlite errors into the core taxonomy.
fn map_error(err: rusqlite::Error) -> SqlSpecError {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            use rusqlite::ErrorCode;
            let text = message.unwrap_or_else(|| code.to_string());
            match code.code {
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::SystemIoFailure => SqlSpecError::Connectivity {
                    message: text,
                    source: Some(Box::new(code)),
                },
                kind => SqlSpecError::Execution {
                    message: text,
                    fingerprint: None,
                    code: Some(format!("{kind:?}")),
                    source: Some(Box::new(code)),
                },
            }
        }
        other => SqlSpecError::Execution {
            message: other.to_string(),
            fingerprint: None,
            code: None,
            source: Some(Box::new(other)),
        },
    }
}

fn positional(params: &DriverParams) -> Result<Vec<rusqlite::types::Value>> {
    match params {
        DriverParams::None => Ok(Vec::new()),
        DriverParams::Positional(values) => Ok(values.iter().map(to_sqlite).collect()),
        DriverParams::Named(_) => Err(SqlSpecError::Unsupported(
            "the sqlite adapter binds positionally; compile to the qmark style".into(),
        )),
    }
}

fn to_sqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Int(n) => rusqlite::types::Value::Integer(*n),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_sqlite(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(n) => Value::Int(n),
        rusqlite::types::Value::Real(f) => Value::Float(f),
        rusqlite::types::Value::Text(s) => Value::Text(s),
        rusqlite::types::Value::Blob(b) => Value::Blob(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DriverParams;

    fn connect() -> Connection {
        let driver = SqliteDriver::new();
        let conn = driver.connect(&ConnectionConfig::in_memory()).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_execute_dml_reports_rowcount() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        let rs = driver
            .execute(
                &mut conn,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                &DriverParams::Positional(vec![Value::Text("Alice".into()), Value::Int(30)]),
            )
            .unwrap();
        assert_eq!(rs.rows_affected(), 1);
        assert!(rs.is_empty());
    }

    #[test]
    fn test_execute_query_collects_columns_and_rows() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        conn.execute_batch("INSERT INTO users (name, age) VALUES ('A', 1), ('B', NULL)")
            .unwrap();
        let rs = driver
            .execute(&mut conn, "SELECT id, name, age FROM users ORDER BY id", &DriverParams::None)
            .unwrap();
        assert_eq!(rs.columns().len(), 3);
        assert_eq!(rs.columns()[1].name, "name");
        assert_eq!(rs.columns()[1].decl_type.as_deref(), Some("TEXT"));
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.value(1, "age"), Some(&Value::Null));
    }

    #[test]
    fn test_execute_many_sums_counts() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        let batches = vec![
            DriverParams::Positional(vec![Value::Text("A".into()), Value::Int(1)]),
            DriverParams::Positional(vec![Value::Text("B".into()), Value::Int(2)]),
            DriverParams::Positional(vec![Value::Text("C".into()), Value::Int(3)]),
        ];
        let n = driver
            .execute_many(
                &mut conn,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                &batches,
            )
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn test_error_mapping_carries_code() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        let err = driver
            .execute(&mut conn, "SELECT * FROM missing_table", &DriverParams::None)
            .unwrap_err();
        match err {
            SqlSpecError::Execution { code, .. } => assert!(code.is_some()),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_named_params_rejected() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        let err = driver
            .execute(
                &mut conn,
                "SELECT 1",
                &DriverParams::Named(vec![("x".into(), Value::Int(1))]),
            )
            .unwrap_err();
        assert!(matches!(err, SqlSpecError::Unsupported(_)));
    }

    #[test]
    fn test_bool_round_trips_as_integer() {
        let driver = SqliteDriver::new();
        let mut conn = connect();
        let rs = driver
            .execute(
                &mut conn,
                "SELECT ? AS flag",
                &DriverParams::Positional(vec![Value::Bool(true)]),
            )
            .unwrap();
        assert_eq!(rs.scalar().unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_read_only_flag() {
        let config = ConnectionConfig::in_memory();
        let options = build_connection_config(&config);
        assert!(!options.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));

        let mut config = ConnectionConfig::new("some.db");
        config.read_only = true;
        let options = build_connection_config(&config);
        assert!(options.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
    }
}
