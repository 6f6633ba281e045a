//! SQL dialect definitions.
//!
//! Each backend family is a tagged enum variant carrying its placeholder
//! conventions and feature support. Dialects answer three questions:
//!
//! - which placeholder styles the backend accepts, and which one the
//!   executor should emit (`preferred_style`)
//! - which sqlparser dialect parses its SQL
//! - which optional constructs (MERGE, RETURNING) it can express
//!
//! A statement whose dialect hint is absent compiles with the session's
//! dialect; with neither, [`Dialect::Generic`] emits only portable syntax.

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, DuckDbDialect, GenericDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};

use crate::params::ParameterStyle;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Generic,
    Postgres,
    MySql,
    Sqlite,
    DuckDb,
    Oracle,
    BigQuery,
    Spanner,
}

impl Dialect {
    /// Dialect name for display and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Generic => "generic",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::DuckDb => "duckdb",
            Dialect::Oracle => "oracle",
            Dialect::BigQuery => "bigquery",
            Dialect::Spanner => "spanner",
        }
    }

    /// Parse a dialect name as written in loader directives and config.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "generic" | "ansi" => Some(Dialect::Generic),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "sqlite" | "sqlite3" => Some(Dialect::Sqlite),
            "duckdb" | "duck" => Some(Dialect::DuckDb),
            "oracle" => Some(Dialect::Oracle),
            "bigquery" => Some(Dialect::BigQuery),
            "spanner" => Some(Dialect::Spanner),
            _ => None,
        }
    }

    /// The sqlparser dialect used to parse SQL for this backend.
    ///
    /// Oracle and Spanner have no sqlparser dialect; GenericDialect accepts
    /// the portable subset this core emits for them.
    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
            Dialect::DuckDb => Box::new(DuckDbDialect {}),
            Dialect::BigQuery => Box::new(BigQueryDialect {}),
            Dialect::Generic | Dialect::Oracle | Dialect::Spanner => Box::new(GenericDialect {}),
        }
    }

    /// The placeholder style the executor emits for this backend.
    pub fn preferred_style(&self) -> ParameterStyle {
        match self {
            Dialect::Postgres => ParameterStyle::Numeric,
            Dialect::MySql => ParameterStyle::Format,
            Dialect::Sqlite => ParameterStyle::Qmark,
            Dialect::DuckDb => ParameterStyle::Qmark,
            Dialect::Oracle => ParameterStyle::NamedColon,
            Dialect::BigQuery => ParameterStyle::NamedAt,
            Dialect::Spanner => ParameterStyle::NamedAt,
            Dialect::Generic => ParameterStyle::Qmark,
        }
    }

    /// Placeholder styles the backend accepts on the wire.
    pub fn supported_styles(&self) -> &'static [ParameterStyle] {
        match self {
            Dialect::Postgres => &[
                ParameterStyle::Numeric,
                ParameterStyle::Format,
                ParameterStyle::PyformatNamed,
            ],
            Dialect::MySql => &[
                ParameterStyle::Format,
                ParameterStyle::PyformatNamed,
                ParameterStyle::Qmark,
            ],
            Dialect::Sqlite => &[
                ParameterStyle::Qmark,
                ParameterStyle::NamedColon,
                ParameterStyle::NamedAt,
            ],
            Dialect::DuckDb => &[
                ParameterStyle::Qmark,
                ParameterStyle::Numeric,
                ParameterStyle::NamedColon,
            ],
            Dialect::Oracle => &[ParameterStyle::NamedColon, ParameterStyle::PositionalColon],
            Dialect::BigQuery => &[ParameterStyle::NamedAt, ParameterStyle::Qmark],
            Dialect::Spanner => &[ParameterStyle::NamedAt],
            Dialect::Generic => &[ParameterStyle::Qmark, ParameterStyle::NamedColon],
        }
    }

    /// Whether one statement may mix named and positional placeholders.
    pub fn allows_mixed_parameters(&self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::DuckDb)
    }

    /// Whether the backend can express a native MERGE statement.
    pub fn supports_merge(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Oracle | Dialect::BigQuery)
    }

    /// Whether DML may carry a RETURNING clause.
    pub fn supports_returning(&self) -> bool {
        matches!(
            self,
            Dialect::Postgres | Dialect::Sqlite | Dialect::DuckDb | Dialect::Oracle
        )
    }

    /// Quote an identifier for this backend.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Dialect::MySql | Dialect::BigQuery | Dialect::Spanner => {
                format!("`{}`", ident.replace('`', "``"))
            }
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
