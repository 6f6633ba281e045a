//! End-to-end statement compilation.
//!
//! ```text
//! raw SQL → placeholder scan → canonical rewrite ($1..$n) → parse →
//!   validate → filter chain → render → rewrite to target style →
//!   CompiledStatement { sql, bindings, hints, fingerprint }
//! ```
//!
//! Every placeholder style, including the ones no SQL parser accepts
//! (`%s`, `%(name)s`), is first rewritten to numeric placeholders so one
//! AST path serves them all. The canonical ordinals carry a side table of
//! original sources; after filters run and the AST is rendered, a second
//! rewrite emits the driver's preferred style and composes both rewrites
//! into the final binding descriptor.
//!
//! Compilation is idempotent: the same (statement, target) pair always
//! yields byte-identical SQL and an identical placeholder order.

use serde::Serialize;
use sqlparser::ast::{Expr, SelectItem, SetExpr, Statement};

use crate::ast::{self, analyze::AnalysisReport, validate, StatementKind};
use crate::cache::compute_hash;
use crate::dialect::Dialect;
use crate::error::{Result, SqlSpecError};
use crate::filter::FilterContext;
use crate::params::{
    self, BindSource, Binding, ParameterError, ParameterStyle,
};
use crate::statement::Sql;

/// The dialect and placeholder style a statement compiles down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompileTarget {
    pub dialect: Dialect,
    pub style: ParameterStyle,
    /// Whether the backend accepts named and positional placeholders in
    /// one statement.
    pub allows_mixed: bool,
}

impl CompileTarget {
    pub fn new(dialect: Dialect, style: ParameterStyle) -> Self {
        Self {
            dialect,
            style,
            allows_mixed: dialect.allows_mixed_parameters(),
        }
    }

    /// Target a dialect with its preferred placeholder style.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self::new(dialect, dialect.preferred_style())
    }
}

/// The cacheable output of compilation.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    /// Target-dialect SQL with target-style placeholders.
    pub sql: String,
    /// Placeholder style of `sql`.
    pub style: ParameterStyle,
    /// How to assemble driver parameters from the caller's container. One
    /// entry per placeholder in `sql` (per distinct placeholder for
    /// deduplicating styles).
    pub bindings: Vec<Binding>,
    /// Coarse statement kind, used for routing and rowcount semantics.
    pub kind: StatementKind,
    /// Result column names, when derivable from the projection.
    pub column_hints: Vec<String>,
    /// Cache key this compilation was stored under.
    pub fingerprint: String,
    /// Advisory validation findings.
    pub warnings: Vec<String>,
    /// Populated when the statement's config requested analysis.
    pub analysis: Option<AnalysisReport>,
}

impl CompiledStatement {
    #[cfg(test)]
    pub(crate) fn for_tests(sql: &str, style: ParameterStyle) -> Self {
        Self {
            sql: sql.to_string(),
            style,
            bindings: Vec::new(),
            kind: StatementKind::Select,
            column_hints: Vec::new(),
            fingerprint: compute_hash(&sql),
            warnings: Vec::new(),
            analysis: None,
        }
    }
}

/// The cache key for a (statement, target) pair: hash of raw SQL, target
/// dialect, target style, transformation flags, and the ordered filter
/// fingerprints. Parameter values never participate.
pub fn cache_key(statement: &Sql, target: &CompileTarget) -> String {
    let filter_fps: Vec<String> = statement
        .filters()
        .iter()
        .map(|f| f.fingerprint())
        .collect();
    compute_hash(&(
        statement.raw(),
        target.dialect.name(),
        target.style.as_str(),
        statement.flag_bits(),
        filter_fps,
    ))
}

/// Compile a statement for a target. Pure: no I/O, no connection.
pub fn compile(statement: &Sql, target: &CompileTarget) -> Result<CompiledStatement> {
    statement.check_param_mixing()?;

    let raw = statement.raw();
    let placeholders = params::scan(raw);
    let named_in_sql = placeholders.iter().any(|p| p.name.is_some());
    let positional_in_sql = placeholders.iter().any(|p| p.name.is_none());
    if named_in_sql && positional_in_sql && !target.allows_mixed {
        return Err(ParameterError::IncompatibleMixing.into());
    }

    // Canonicalize every placeholder style to $1..$n so the parser sees
    // uniform, parseable SQL. The ordinal-indexed side table remembers where
    // each value comes from.
    let (canonical_sql, canonical_bindings) = params::rewrite(raw, ParameterStyle::Numeric)?;
    let mut sources: Vec<BindSource> = canonical_bindings.into_iter().map(|b| b.source).collect();

    let mut parsed = ast::parse(&canonical_sql, target.dialect)?;
    let kind = ast::classify(&parsed);

    if kind == StatementKind::Merge && !target.dialect.supports_merge() {
        return Err(SqlSpecError::Unsupported(format!(
            "MERGE is not expressible in the {} dialect",
            target.dialect
        )));
    }

    let mut warnings = Vec::new();
    if statement.config().validate {
        let diagnostics = validate::validate(
            &parsed,
            &validate::ValidateOptions {
                deny: statement.config().deny.clone(),
            },
        );
        if !diagnostics.is_ok() {
            return Err(SqlSpecError::Compile(diagnostics.errors.join("; ")));
        }
        warnings = diagnostics.warnings;
    }

    if statement.config().transform && !statement.filters().is_empty() {
        let query = match &mut parsed {
            Statement::Query(query) => query,
            _ => {
                return Err(SqlSpecError::Compile(
                    "filters apply only to SELECT statements".into(),
                ))
            }
        };
        let mut ctx = FilterContext::new(sources.len());
        for (index, filter) in statement.filters().iter().enumerate() {
            ctx.enter_filter(index);
            filter.rewrite(query, &mut ctx)?;
        }
        for name in ctx.bound_names() {
            sources.push(BindSource::Name(name.clone()));
        }
    }

    let analysis = statement.config().analyze.then(|| ast::analyze::analyze(&parsed));
    let column_hints = column_hints(&parsed);
    let rendered = ast::render(&parsed);

    // Second rewrite: canonical numerics (plus any named placeholders a
    // predicate filter carried through) into the target style.
    let rendered_placeholders = params::scan(&rendered);
    for ph in &rendered_placeholders {
        if let (None, Some(ordinal)) = (&ph.name, ph.index) {
            if ordinal >= sources.len() {
                return Err(SqlSpecError::Compile(format!(
                    "placeholder ${} has no bound source",
                    ordinal + 1
                )));
            }
        }
    }
    let (sql, bindings) = params::rewrite_placeholders(
        &rendered,
        &rendered_placeholders,
        target.style,
        |ph| match (&ph.name, ph.index) {
            (Some(name), _) => BindSource::Name(name.clone()),
            (None, Some(ordinal)) => sources[ordinal].clone(),
            (None, None) => BindSource::Position(0),
        },
    )?;

    Ok(CompiledStatement {
        sql,
        style: target.style,
        bindings,
        kind,
        column_hints,
        fingerprint: cache_key(statement, target),
        warnings,
        analysis,
    })
}

/// Result column names when the projection makes them obvious.
fn column_hints(statement: &Statement) -> Vec<String> {
    let Statement::Query(query) = statement else {
        return Vec::new();
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Vec::new();
    };
    let mut hints = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        let hint = match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => Some(ident.value.clone()),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
                parts.last().map(|i| i.value.clone())
            }
            SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
            _ => None,
        };
        match hint {
            Some(hint) => hints.push(hint),
            // A wildcard or computed column defeats the whole hint list.
            None => return Vec::new(),
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{LimitOffset, OrderByColumns, Search, SearchOperator, Tenant};
    use crate::params::{normalize, DriverParams, NormalizeMode, Parameters};
    use crate::value::Value;

    fn pg_numeric() -> CompileTarget {
        CompileTarget::new(Dialect::Postgres, ParameterStyle::Numeric)
    }

    #[test]
    fn test_named_to_numeric_end_to_end() {
        let stmt = Sql::new("SELECT * FROM users WHERE name = :name AND age > :age")
            .bind_named("name", "Alice")
            .bind_named("age", 25);
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM users WHERE name = $1 AND age > $2"
        );
        let driver = normalize(
            &stmt.effective_params(),
            &compiled.bindings,
            compiled.style,
            NormalizeMode::Lenient,
        )
        .unwrap();
        assert_eq!(
            driver,
            DriverParams::Positional(vec![Value::Text("Alice".into()), Value::Int(25)])
        );
    }

    #[test]
    fn test_qmark_survives_string_literal() {
        let stmt = Sql::new("SELECT 'What?' AS q, id FROM t WHERE id = ?").bind(7);
        let compiled =
            compile(&stmt, &CompileTarget::new(Dialect::Sqlite, ParameterStyle::Qmark)).unwrap();
        // Exactly one placeholder; the one inside the literal is untouched.
        assert_eq!(compiled.bindings.len(), 1);
        assert_eq!(compiled.sql.matches('?').count() , 2); // one in 'What?', one real
        assert!(compiled.sql.contains("'What?'"));
        assert!(compiled.sql.ends_with("WHERE id = ?"));
    }

    #[test]
    fn test_missing_named_parameter_fails_before_driver() {
        let stmt = Sql::new("SELECT * FROM t WHERE id = :id").bind_named("user_id", 1);
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        let err = normalize(
            &stmt.effective_params(),
            &compiled.bindings,
            compiled.style,
            NormalizeMode::Lenient,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'id'"), "got: {err}");
    }

    #[test]
    fn test_compilation_idempotent() {
        let stmt = Sql::new("SELECT a, b FROM t WHERE a = :a")
            .with_filter(OrderByColumns::asc("b"))
            .with_filter(LimitOffset::limit(5));
        let first = compile(&stmt, &pg_numeric()).unwrap();
        let second = compile(&stmt, &pg_numeric()).unwrap();
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.bindings, second.bindings);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_filter_order_observable() {
        let base = Sql::new("SELECT * FROM t");
        let a = base
            .clone()
            .with_filter(OrderByColumns::asc("x"))
            .with_filter(LimitOffset::limit(1));
        let b = base
            .with_filter(LimitOffset::limit(1))
            .with_filter(OrderByColumns::asc("x"));
        // Same rendered SQL here, but distinct cache identities: composition
        // order is part of the key.
        assert_ne!(
            cache_key(&a, &pg_numeric()),
            cache_key(&b, &pg_numeric())
        );
    }

    #[test]
    fn test_filters_bind_parameters() {
        let stmt = Sql::new("SELECT * FROM orders WHERE status = :status")
            .bind_named("status", "open")
            .with_filter(Tenant::new("tenant_id", 42))
            .with_filter(Search::new("customer", SearchOperator::Like, "%smith%"));
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        assert!(compiled.sql.contains("tenant_id = $2"), "got {}", compiled.sql);
        assert!(compiled.sql.contains("customer LIKE $3"), "got {}", compiled.sql);

        let driver = normalize(
            &stmt.effective_params(),
            &compiled.bindings,
            compiled.style,
            NormalizeMode::Lenient,
        )
        .unwrap();
        assert_eq!(
            driver,
            DriverParams::Positional(vec![
                Value::Text("open".into()),
                Value::Int(42),
                Value::Text("%smith%".into()),
            ])
        );
    }

    #[test]
    fn test_mixed_styles_rejected_for_strict_target() {
        let stmt = Sql::new("SELECT * FROM t WHERE a = :a AND b = ?");
        let err = compile(&stmt, &pg_numeric()).unwrap_err();
        assert!(matches!(err, SqlSpecError::Parameter(_)));
        // A dialect that accepts mixing compiles fine.
        compile(
            &stmt,
            &CompileTarget::new(Dialect::Sqlite, ParameterStyle::Qmark),
        )
        .unwrap();
    }

    #[test]
    fn test_merge_unsupported_dialect() {
        let stmt = Sql::new(
            "MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN UPDATE SET v = s.v",
        );
        let err = compile(
            &stmt,
            &CompileTarget::new(Dialect::Sqlite, ParameterStyle::Qmark),
        )
        .unwrap_err();
        assert!(matches!(err, SqlSpecError::Unsupported(_)));
    }

    #[test]
    fn test_deny_list_blocks_compilation() {
        let mut config = crate::statement::StatementConfig::default();
        config.deny.push(StatementKind::Ddl);
        let stmt = Sql::new("DROP TABLE t").with_config(config);
        let err = compile(&stmt, &pg_numeric()).unwrap_err();
        assert!(matches!(err, SqlSpecError::Compile(_)));
    }

    #[test]
    fn test_column_hints() {
        let stmt = Sql::new("SELECT id, name AS display_name FROM users");
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        assert_eq!(compiled.column_hints, vec!["id", "display_name"]);

        let stmt = Sql::new("SELECT * FROM users");
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        assert!(compiled.column_hints.is_empty());
    }

    #[test]
    fn test_analysis_attached_when_requested() {
        let mut config = crate::statement::StatementConfig::default();
        config.analyze = true;
        let stmt = Sql::new("SELECT a FROM t WHERE b = 1").with_config(config);
        let compiled = compile(&stmt, &pg_numeric()).unwrap();
        let analysis = compiled.analysis.expect("analysis requested");
        assert_eq!(analysis.tables_read, vec!["t"]);
    }

    #[test]
    fn test_format_style_roundtrips_through_parser() {
        let stmt = Sql::new("SELECT * FROM t WHERE a = %s AND b = %s");
        let compiled = compile(
            &stmt,
            &CompileTarget::new(Dialect::MySql, ParameterStyle::Format),
        )
        .unwrap();
        assert!(compiled.sql.contains("a = %s AND b = %s"), "got {}", compiled.sql);
        assert_eq!(compiled.bindings.len(), 2);
    }
}
