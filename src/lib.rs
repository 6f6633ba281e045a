//! # SQLSpec
//!
//! A database connectivity and SQL-processing core: write SQL once, as
//! strings, through the builder, or as named queries loaded from files,
//! and have it validated, compiled, parameter-bound, cached, executed,
//! and mapped back to typed records uniformly across backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │   user SQL + params  /  builder  /  named query files    │
//! └──────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [statement]
//! ┌──────────────────────────────────────────────────────────┐
//! │        Sql (raw text, params, dialect, filters)          │
//! └──────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compile: scan → parse → filter →
//!                             render → rewrite, cached + single-flight]
//! ┌──────────────────────────────────────────────────────────┐
//! │   CompiledStatement (target SQL, binding descriptor)     │
//! └──────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [session: sync or async]
//! ┌──────────────────────────────────────────────────────────┐
//! │  Driver contract (execute / many / script / arrow /      │
//! │  stack) over pooled connections with txn state machine   │
//! └──────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [result]
//! ┌──────────────────────────────────────────────────────────┐
//! │  ResultSet → rows / one / scalar / typed map / Arrow     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Compilation is pure CPU work and never touches a connection;
//! compile-phase errors surface before any driver call.

pub mod ast;
pub mod builder;
pub mod cache;
pub mod compile;
pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod filter;
pub mod loader;
pub mod params;
pub mod registry;
pub mod result;
pub mod stack;
pub mod statement;
pub mod value;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::builder::{
        col, delete, insert, merge, select, update, CompareOp, Direction, JoinKind, Predicate,
    };
    pub use crate::compile::{CompileTarget, CompiledStatement};
    pub use crate::config::{ConnectionConfig, DatabaseConfig, PoolConfig};
    pub use crate::dialect::Dialect;
    pub use crate::driver::{
        AsyncDriver, AsyncPool, AsyncSession, Driver, DriverCapabilities, Pool, Session,
        SqliteDriver,
    };
    pub use crate::error::{Result, SqlSpecError};
    pub use crate::filter::{LimitOffset, OrderByColumns, Search, StatementFilter, Tenant};
    pub use crate::loader::QueryLoader;
    pub use crate::params::{ParameterStyle, Parameters};
    pub use crate::registry::{Handle, Registry};
    pub use crate::result::{ResultSet, Row};
    pub use crate::stack::{StackResult, StatementStack};
    pub use crate::statement::Sql;
    pub use crate::value::Value;
}

// Also export the workhorse types at the crate root.
pub use dialect::Dialect;
pub use error::{Result, SqlSpecError};
pub use params::{ParameterStyle, Parameters};
pub use result::ResultSet;
pub use stack::StatementStack;
pub use statement::Sql;
pub use value::Value;
