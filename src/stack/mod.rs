//! Statement stacks: immutable, ordered compositions of operations.
//!
//! A stack is built by pushing operations; every push returns a new stack,
//! so a stack value can be shared and re-executed freely. Execution is a
//! session concern (native pipeline where the driver supports one, a
//! sequential fallback otherwise); this module owns the data shapes and
//! the per-operation result type.

mod executor;

pub(crate) use executor::{finish_collect, skip_tail};

use arrow::record_batch::RecordBatch;

use crate::cache::compute_hash;
use crate::error::SqlSpecError;
use crate::params::{DriverParams, Parameters};
use crate::result::ResultSet;
use crate::statement::Sql;

/// Which execute verb an operation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMethod {
    Execute,
    ExecuteMany,
    ExecuteScript,
    ExecuteArrow,
}

impl StackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackMethod::Execute => "execute",
            StackMethod::ExecuteMany => "execute_many",
            StackMethod::ExecuteScript => "execute_script",
            StackMethod::ExecuteArrow => "execute_arrow",
        }
    }
}

/// One frozen (method, statement, arguments) triple.
#[derive(Debug, Clone)]
pub struct StackOperation {
    method: StackMethod,
    statement: Sql,
    /// Per-row parameter sets for `ExecuteMany`.
    batches: Vec<Parameters>,
    fingerprint: String,
}

impl StackOperation {
    fn new(method: StackMethod, statement: Sql, batches: Vec<Parameters>) -> Self {
        let fingerprint = compute_hash(&(
            method.as_str(),
            statement.fingerprint(),
            batches.len(),
        ));
        Self {
            method,
            statement,
            batches,
            fingerprint,
        }
    }

    pub fn method(&self) -> StackMethod {
        self.method
    }

    pub fn statement(&self) -> &Sql {
        &self.statement
    }

    pub fn batches(&self) -> &[Parameters] {
        &self.batches
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Append-only, immutable sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct StatementStack {
    operations: Vec<StackOperation>,
}

impl StatementStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn pushed(&self, operation: StackOperation) -> Self {
        let mut operations = self.operations.clone();
        operations.push(operation);
        Self { operations }
    }

    /// Push a single-execute operation.
    pub fn push_execute(&self, statement: Sql) -> Self {
        self.pushed(StackOperation::new(StackMethod::Execute, statement, Vec::new()))
    }

    /// Push a batch-execute operation.
    pub fn push_execute_many(&self, statement: Sql, batches: Vec<Parameters>) -> Self {
        self.pushed(StackOperation::new(StackMethod::ExecuteMany, statement, batches))
    }

    /// Push a multi-statement script.
    pub fn push_execute_script(&self, script: Sql) -> Self {
        self.pushed(StackOperation::new(
            StackMethod::ExecuteScript,
            script,
            Vec::new(),
        ))
    }

    /// Push a columnar-result operation.
    pub fn push_execute_arrow(&self, statement: Sql) -> Self {
        self.pushed(StackOperation::new(StackMethod::ExecuteArrow, statement, Vec::new()))
    }

    pub fn operations(&self) -> &[StackOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Stable identity derived from the operation fingerprints; suitable
    /// for span naming.
    pub fn fingerprint(&self) -> String {
        let fps: Vec<&str> = self.operations.iter().map(|op| op.fingerprint()).collect();
        compute_hash(&fps)
    }
}

/// Raw outcome of one successfully executed stack operation.
#[derive(Debug)]
pub enum StackOutcome {
    Rows(ResultSet),
    Affected(u64),
    Script { statements: usize, rows_affected: u64 },
    Arrow(RecordBatch),
}

impl StackOutcome {
    pub fn rows_affected(&self) -> u64 {
        match self {
            StackOutcome::Rows(rs) => rs.rows_affected(),
            StackOutcome::Affected(n) => *n,
            StackOutcome::Script { rows_affected, .. } => *rows_affected,
            StackOutcome::Arrow(_) => 0,
        }
    }
}

/// Per-operation result: either an outcome or an error, never both.
#[derive(Debug)]
pub struct StackResult {
    pub index: usize,
    pub result: Option<StackOutcome>,
    pub rows_affected: u64,
    pub warnings: Vec<String>,
    pub error: Option<SqlSpecError>,
}

impl StackResult {
    pub fn success(index: usize, outcome: StackOutcome) -> Self {
        let rows_affected = outcome.rows_affected();
        Self {
            index,
            result: Some(outcome),
            rows_affected,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failure(index: usize, error: SqlSpecError) -> Self {
        Self {
            index,
            result: None,
            rows_affected: 0,
            warnings: Vec::new(),
            error: Some(error),
        }
    }

    /// Result for an operation never attempted because operation `after`
    /// failed first.
    pub fn skipped(index: usize, after: usize) -> Self {
        Self::failure(index, SqlSpecError::StackSkipped { after })
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A compiled, parameter-normalized operation ready for a driver's native
/// pipeline. The driver receives these in stack order and must answer one
/// outcome per operation, in order.
#[derive(Debug)]
pub struct PreparedOperation {
    pub method: StackMethod,
    pub sql: String,
    /// One entry for `execute`/`execute_arrow`, many for `execute_many`,
    /// none for scripts.
    pub params: Vec<DriverParams>,
    pub fingerprint: String,
}
