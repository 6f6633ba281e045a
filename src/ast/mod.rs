//! SQL AST wrapper around sqlparser.
//!
//! The rest of the crate sees one contract: [`parse`] for a single
//! statement, [`parse_script`] for multi-statement scripts, [`classify`]
//! for coarse statement kinds, and the `validate` / `analyze` submodules.
//! Everything downstream of here operates on `sqlparser::ast` nodes, so no
//! other module needs to know which parser backs the core.

pub mod analyze;
pub mod validate;

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;

use crate::dialect::Dialect;
use crate::error::{Result, SqlSpecError};

/// Coarse classification of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Ddl,
    Dcl,
    Transaction,
    Other,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Merge => "merge",
            StatementKind::Ddl => "ddl",
            StatementKind::Dcl => "dcl",
            StatementKind::Transaction => "transaction",
            StatementKind::Other => "other",
        }
    }

    /// Whether this kind mutates table data.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete | StatementKind::Merge
        )
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse exactly one statement.
pub fn parse(sql: &str, dialect: Dialect) -> Result<Statement> {
    let mut statements = parse_script(sql, dialect)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(SqlSpecError::parse("empty statement")),
        n => Err(SqlSpecError::parse(format!(
            "expected a single statement, found {n}; use the script path for multi-statement SQL"
        ))),
    }
}

/// Parse a script into an ordered list of statements.
pub fn parse_script(sql: &str, dialect: Dialect) -> Result<Vec<Statement>> {
    let parser_dialect = dialect.parser_dialect();
    Ok(Parser::parse_sql(parser_dialect.as_ref(), sql)?)
}

/// Classify a parsed statement into its coarse kind.
pub fn classify(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(_) => StatementKind::Select,
        Statement::Insert { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,
        Statement::Merge { .. } => StatementKind::Merge,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. } => StatementKind::Ddl,
        Statement::Grant { .. } | Statement::Revoke { .. } => StatementKind::Dcl,
        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. } => StatementKind::Transaction,
        _ => StatementKind::Other,
    }
}

/// Render a statement back to SQL text.
///
/// sqlparser's Display output is deterministic for a given AST, which is
/// what makes compilation idempotent.
pub fn render(statement: &Statement) -> String {
    statement.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single() {
        let stmt = parse("SELECT 1", Dialect::Generic).unwrap();
        assert_eq!(classify(&stmt), StatementKind::Select);
    }

    #[test]
    fn test_parse_rejects_multi() {
        let err = parse("SELECT 1; SELECT 2", Dialect::Generic).unwrap_err();
        assert!(matches!(err, SqlSpecError::Parse { .. }));
    }

    #[test]
    fn test_parse_script_ordered() {
        let script = "CREATE TABLE t (id INT); INSERT INTO t VALUES (1); SELECT * FROM t";
        let statements = parse_script(script, Dialect::Generic).unwrap();
        assert_eq!(statements.len(), 3);
        assert_eq!(classify(&statements[0]), StatementKind::Ddl);
        assert_eq!(classify(&statements[1]), StatementKind::Insert);
        assert_eq!(classify(&statements[2]), StatementKind::Select);
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = parse("SELEKT broken", Dialect::Generic).unwrap_err();
        assert!(matches!(err, SqlSpecError::Parse { .. }));
    }

    #[test]
    fn test_classify_kinds() {
        let cases = [
            ("UPDATE t SET a = 1", StatementKind::Update),
            ("DELETE FROM t", StatementKind::Delete),
            ("DROP TABLE t", StatementKind::Ddl),
            ("BEGIN", StatementKind::Transaction),
        ];
        for (sql, kind) in cases {
            let stmt = parse(sql, Dialect::Generic).unwrap();
            assert_eq!(classify(&stmt), kind, "for {sql}");
        }
    }

    #[test]
    fn test_mutation_kinds() {
        assert!(StatementKind::Insert.is_mutation());
        assert!(StatementKind::Merge.is_mutation());
        assert!(!StatementKind::Select.is_mutation());
        assert!(!StatementKind::Ddl.is_mutation());
    }
}
