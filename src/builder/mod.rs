//! Fluent query builders.
//!
//! Builders assemble SQL without caller-side string concatenation: every
//! value binds as a named parameter (`:b0`, `:b1`, ...) and every
//! identifier is quoted for the target dialect. `to_statement()` freezes
//! the build into an immutable [`Sql`] carrying the inferred dialect and
//! the bound parameters; the regular compile pipeline then parses and
//! re-renders it, so anything a builder emits is parser-checked before a
//! driver ever sees it.
//!
//! Every builder method takes and returns the builder by value; a partial
//! build can be cloned and extended in two directions without aliasing.

mod dml;
mod predicate;
mod select;

pub use dml::{delete, insert, merge, update, Delete, Insert, Merge, Update};
pub use predicate::{CompareOp, Operand, Predicate};
pub use select::{select, Direction, JoinKind, Select};

use thiserror::Error;

use crate::dialect::Dialect;
use crate::value::Value;

/// Errors raised while freezing a builder into a statement.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("unknown comparison operator '{0}'")]
    BadOperator(String),

    #[error("INSERT requires at least one VALUES row")]
    EmptyValues,

    #[error("VALUES row has {got} values but {expected} columns were named")]
    ValuesArity { expected: usize, got: usize },

    #[error("UPDATE requires at least one SET assignment")]
    EmptyAssignments,

    #[error("RETURNING is not supported by the {0} dialect")]
    ReturningUnsupported(Dialect),

    #[error("MERGE is not supported by the {0} dialect")]
    MergeUnsupported(Dialect),

    #[error("MERGE requires a USING source and an ON condition")]
    MergeIncomplete,

    #[error("vector distance is not expressible in the {0} dialect")]
    VectorDistanceUnsupported(Dialect),
}

pub type BuilderResult<T> = Result<T, BuilderError>;

impl From<BuilderError> for crate::error::SqlSpecError {
    fn from(err: BuilderError) -> Self {
        crate::error::SqlSpecError::Compile(err.to_string())
    }
}

/// A column reference: a plain name or a dotted path.
///
/// Methods on `Column` are the explicit spelling of what dynamic builders
/// do with attribute magic; `col("embedding").l2_distance(...)` reads the
/// same and type-checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    path: String,
}

/// Shorthand constructor for a column reference.
pub fn col(path: impl Into<String>) -> Column {
    Column { path: path.into() }
}

impl Column {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn eq(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Ge, value)
    }

    pub fn lt(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Operand>) -> Predicate {
        Predicate::compare(self, CompareOp::Le, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Predicate {
        Predicate::compare(self, CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull {
            column: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNull {
            column: self,
            negated: true,
        }
    }

    pub fn in_list(self, values: impl IntoIterator<Item = Value>) -> Predicate {
        Predicate::InList {
            column: self,
            values: values.into_iter().collect(),
            negated: false,
        }
    }

    /// Euclidean distance to a query vector.
    pub fn l2_distance(self, vector: Vec<f32>) -> VectorDistance {
        VectorDistance {
            column: self,
            vector,
            metric: DistanceMetric::L2,
        }
    }

    /// Cosine distance/similarity to a query vector (whichever the
    /// dialect natively offers).
    pub fn cosine_distance(self, vector: Vec<f32>) -> VectorDistance {
        VectorDistance {
            column: self,
            vector,
            metric: DistanceMetric::Cosine,
        }
    }

    pub fn inner_product(self, vector: Vec<f32>) -> VectorDistance {
        VectorDistance {
            column: self,
            vector,
            metric: DistanceMetric::InnerProduct,
        }
    }
}

/// Distance metric for vector expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    L2,
    Cosine,
    InnerProduct,
}

/// A dialect-specific vector distance expression. Renders to pgvector
/// functions on PostgreSQL and to list functions on DuckDB; other
/// dialects reject it at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDistance {
    column: Column,
    vector: Vec<f32>,
    metric: DistanceMetric,
}

impl VectorDistance {
    pub(crate) fn render(&self, writer: &mut SqlWriter) -> BuilderResult<()> {
        match writer.dialect() {
            Dialect::Postgres => {
                let function = match self.metric {
                    DistanceMetric::L2 => "l2_distance",
                    DistanceMetric::Cosine => "cosine_distance",
                    DistanceMetric::InnerProduct => "inner_product",
                };
                writer.push(function);
                writer.push("(");
                writer.ident(self.column.path());
                writer.push(", '");
                writer.push(&self.vector_literal());
                writer.push("')");
                Ok(())
            }
            Dialect::DuckDb => {
                let function = match self.metric {
                    DistanceMetric::L2 => "array_distance",
                    DistanceMetric::Cosine => "array_cosine_similarity",
                    DistanceMetric::InnerProduct => "array_inner_product",
                };
                writer.push(function);
                writer.push("(");
                writer.ident(self.column.path());
                writer.push(", ");
                writer.push(&self.vector_literal());
                writer.push(")");
                Ok(())
            }
            other => Err(BuilderError::VectorDistanceUnsupported(other)),
        }
    }

    fn vector_literal(&self) -> String {
        let mut buffer = ryu::Buffer::new();
        let parts: Vec<String> = self
            .vector
            .iter()
            .map(|f| buffer.format(*f).to_string())
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Accumulates SQL text and bound parameters for one build.
#[derive(Debug)]
pub(crate) struct SqlWriter {
    sql: String,
    dialect: Dialect,
    params: Vec<(String, Value)>,
}

impl SqlWriter {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            sql: String::new(),
            dialect,
            params: Vec::new(),
        }
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Write a dotted identifier path, quoting each segment. `*` segments
    /// pass through for qualified wildcards.
    pub(crate) fn ident(&mut self, path: &str) {
        let quoted: Vec<String> = path
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    self.dialect.quote_identifier(segment)
                }
            })
            .collect();
        self.sql.push_str(&quoted.join("."));
    }

    /// Bind a value and write its placeholder.
    pub(crate) fn bind(&mut self, value: Value) {
        let name = format!("b{}", self.params.len());
        self.sql.push(':');
        self.sql.push_str(&name);
        self.params.push((name, value));
    }

    pub(crate) fn finish(self) -> (String, Vec<(String, Value)>) {
        (self.sql, self.params)
    }
}

/// Freeze rendered SQL and bound parameters into a statement.
pub(crate) fn into_statement(
    writer: SqlWriter,
    dialect: Dialect,
) -> crate::statement::Sql {
    let (sql, params) = writer.finish();
    let mut statement = crate::statement::Sql::new(sql).with_dialect(dialect);
    for (name, value) in params {
        statement = statement.bind_named(name, value);
    }
    statement
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_quotes_paths() {
        let mut writer = SqlWriter::new(Dialect::Postgres);
        writer.ident("u.name");
        assert_eq!(writer.finish().0, "\"u\".\"name\"");

        let mut writer = SqlWriter::new(Dialect::MySql);
        writer.ident("u.*");
        assert_eq!(writer.finish().0, "`u`.*");
    }

    #[test]
    fn test_writer_binds_sequentially() {
        let mut writer = SqlWriter::new(Dialect::Postgres);
        writer.bind(Value::Int(1));
        writer.push(", ");
        writer.bind(Value::Int(2));
        let (sql, params) = writer.finish();
        assert_eq!(sql, ":b0, :b1");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_vector_distance_postgres() {
        let mut writer = SqlWriter::new(Dialect::Postgres);
        col("embedding")
            .l2_distance(vec![1.0, 2.5])
            .render(&mut writer)
            .unwrap();
        assert_eq!(writer.finish().0, "l2_distance(\"embedding\", '[1.0, 2.5]')");
    }

    #[test]
    fn test_vector_distance_duckdb() {
        let mut writer = SqlWriter::new(Dialect::DuckDb);
        col("embedding")
            .cosine_distance(vec![0.5])
            .render(&mut writer)
            .unwrap();
        assert_eq!(
            writer.finish().0,
            "array_cosine_similarity(\"embedding\", [0.5])"
        );
    }

    #[test]
    fn test_vector_distance_unsupported() {
        let mut writer = SqlWriter::new(Dialect::MySql);
        let err = col("v").l2_distance(vec![1.0]).render(&mut writer).unwrap_err();
        assert!(matches!(err, BuilderError::VectorDistanceUnsupported(_)));
    }
}
