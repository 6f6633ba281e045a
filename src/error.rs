//! Crate-wide error taxonomy.
//!
//! Module-level errors (`ParameterError`, `ParseError`, `FilterError`, ...)
//! live next to the code that raises them; everything converts into
//! [`SqlSpecError`] at the public API boundary. One error kind per failure.
//!
//! Compile-phase kinds (`Parse`, `Compile`, `Parameter`, `Unsupported`) are
//! raised before any driver call and never consume a connection. Driver-phase
//! kinds (`Connectivity`, `Execution`, `Timeout`) update the session state
//! machine and the connection disposition before returning control.

use thiserror::Error;

use crate::stack::StackResult;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SqlSpecError>;

/// Boxed driver-native error carried as a wrapped cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The one error type surfaced by every public operation.
#[derive(Debug, Error)]
pub enum SqlSpecError {
    /// Invalid configuration or registry misuse.
    #[error("configuration error: {0}")]
    Config(String),

    /// SQL could not be parsed.
    #[error("parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The AST is invalid for the target dialect or style.
    #[error("compile error: {0}")]
    Compile(String),

    /// Placeholder style mismatch, missing key, count mismatch, bad mixing.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Pool wait budget exceeded. The caller may retry later.
    #[error("connection pool exhausted after {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    /// Transport failure. The connection is destroyed, never reused.
    #[error("connectivity failure: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The backend reported a SQL-level failure.
    #[error("execution failure{}: {message}", fmt_fingerprint(.fingerprint))]
    Execution {
        message: String,
        /// Fingerprint of the offending statement, when known.
        fingerprint: Option<String>,
        /// Normalized SQLSTATE-like code, when the driver exposes one.
        code: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Mapping or conversion failed.
    #[error("data error: {0}")]
    Data(String),

    /// Session transaction state machine violation.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Deadline exceeded. The connection is either returned clean or destroyed.
    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Aggregate stack failure carrying every per-operation result.
    #[error("stack execution failed: {} of {} operations errored", .0.failed(), .0.results.len())]
    Stack(StackError),

    /// Placeholder result for operations behind a failed one in fail-fast mode.
    #[error("operation skipped after failure of operation {after}")]
    StackSkipped { after: usize },

    /// The operation is not expressible against the current driver/dialect.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

fn fmt_fingerprint(fingerprint: &Option<String>) -> String {
    match fingerprint {
        Some(fp) => format!(" for statement {fp}"),
        None => String::new(),
    }
}

/// Payload of [`SqlSpecError::Stack`].
#[derive(Debug)]
pub struct StackError {
    /// Per-operation results, in stack order. Failed operations carry their
    /// individual errors; successful ones carry their raw results.
    pub results: Vec<StackResult>,
}

impl StackError {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

impl SqlSpecError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    pub fn connectivity(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Connectivity {
            message: message.into(),
            source,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            fingerprint: None,
            code: None,
            source: None,
        }
    }

    /// Attach a statement fingerprint to driver-phase errors that lack one.
    pub fn with_fingerprint(self, fingerprint: &str) -> Self {
        match self {
            Self::Execution {
                message,
                fingerprint: None,
                code,
                source,
            } => Self::Execution {
                message,
                fingerprint: Some(fingerprint.to_string()),
                code,
                source,
            },
            other => other,
        }
    }

    /// True for errors raised at compile/prepare time, before any driver call.
    pub fn is_compile_phase(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::Compile(_) | Self::Parameter(_) | Self::Unsupported(_)
        )
    }

    /// True when the connection that produced this error must be destroyed.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

impl From<sqlparser::parser::ParserError> for SqlSpecError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Parse {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
