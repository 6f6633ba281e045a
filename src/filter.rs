//! Statement filters: pure AST rewrites that augment a query.
//!
//! A filter is a stateless value. Applying one never mutates the original
//! statement; `Sql::with_filter` returns a new statement whose filter chain
//! grew by one. Filters run during compilation, in insertion order, over
//! the parsed query; composition is left-to-right and not commutative.
//!
//! Filters bind runtime values through [`FilterContext::bind`], which
//! allocates a fresh placeholder and a reserved parameter name. A filter
//! that binds values must return them from `bind_values` in the same order
//! it binds them, so the executor can reconstruct the parameter set from a
//! cached compilation without re-running the rewrite.

use std::fmt;

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, OrderBy, OrderByExpr, Query, Select, SetExpr, Value as AstValue,
};
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::value::Value;

/// Errors raised while applying a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter applies only to SELECT statements")]
    NotASelect,

    #[error("filter cannot rewrite this query shape: {0}")]
    UnsupportedShape(String),

    #[error("invalid identifier in filter: '{0}'")]
    InvalidIdentifier(String),

    #[error("predicate parse error: {0}")]
    Predicate(String),
}

pub type FilterResult<T> = Result<T, FilterError>;

impl From<FilterError> for crate::error::SqlSpecError {
    fn from(err: FilterError) -> Self {
        crate::error::SqlSpecError::Compile(err.to_string())
    }
}

/// Shared state threaded through a filter chain during compilation.
///
/// Allocates placeholder ordinals past the ones already present in the
/// canonical SQL, and records the reserved parameter name behind each.
pub struct FilterContext {
    next_ordinal: usize,
    filter_index: usize,
    seq_in_filter: usize,
    bound: Vec<String>,
}

impl FilterContext {
    pub(crate) fn new(existing_placeholders: usize) -> Self {
        Self {
            next_ordinal: existing_placeholders + 1,
            filter_index: 0,
            seq_in_filter: 0,
            bound: Vec::new(),
        }
    }

    pub(crate) fn enter_filter(&mut self, index: usize) {
        self.filter_index = index;
        self.seq_in_filter = 0;
    }

    /// Reserve a placeholder for a filter-bound value. Returns the
    /// placeholder token to embed in the AST.
    pub fn bind(&mut self) -> Expr {
        let token = format!("${}", self.next_ordinal);
        self.next_ordinal += 1;
        self.bound
            .push(reserved_name(self.filter_index, self.seq_in_filter));
        self.seq_in_filter += 1;
        Expr::Value(AstValue::Placeholder(token))
    }

    /// Names allocated so far, one per bound placeholder in order.
    pub(crate) fn bound_names(&self) -> &[String] {
        &self.bound
    }
}

/// Reserved parameter name for value `seq` of filter `index`.
pub(crate) fn reserved_name(index: usize, seq: usize) -> String {
    format!("_f{index}_{seq}")
}

/// A value transforming one statement into another by AST rewriting.
pub trait StatementFilter: fmt::Debug + Send + Sync {
    /// Stable identity used in cache keys and tracing. Must cover every
    /// piece of state that changes the rewritten SQL text; values bound as
    /// parameters stay out.
    fn fingerprint(&self) -> String;

    /// Rewrite the query in place.
    fn rewrite(&self, query: &mut Query, ctx: &mut FilterContext) -> FilterResult<()>;

    /// Values this filter binds, in the order its rewrite binds them.
    fn bind_values(&self) -> Vec<Value> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Concrete filters
// ---------------------------------------------------------------------------

/// LIMIT / OFFSET pagination. Counts are inlined as literals, so they are
/// part of the filter fingerprint.
#[derive(Debug, Clone)]
pub struct LimitOffset {
    limit: Option<u64>,
    offset: Option<u64>,
}

impl LimitOffset {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { limit, offset }
    }

    pub fn limit(limit: u64) -> Self {
        Self::new(Some(limit), None)
    }

    /// One-based page of `size` rows.
    pub fn page(page: u64, size: u64) -> Self {
        Self::new(Some(size), Some(page.saturating_sub(1) * size))
    }
}

impl StatementFilter for LimitOffset {
    fn fingerprint(&self) -> String {
        format!("limit_offset:{:?}:{:?}", self.limit, self.offset)
    }

    fn rewrite(&self, query: &mut Query, _ctx: &mut FilterContext) -> FilterResult<()> {
        if let Some(limit) = self.limit {
            query.limit = Some(Expr::Value(AstValue::Number(limit.to_string(), false)));
        }
        if let Some(offset) = self.offset {
            query.offset = Some(sqlparser::ast::Offset {
                value: Expr::Value(AstValue::Number(offset.to_string(), false)),
                rows: sqlparser::ast::OffsetRows::None,
            });
        }
        Ok(())
    }
}

/// Sort direction for [`OrderByColumns`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Deterministic ordering appended to the query's ORDER BY list.
#[derive(Debug, Clone)]
pub struct OrderByColumns {
    columns: Vec<(String, SortOrder)>,
}

impl OrderByColumns {
    pub fn new(columns: impl IntoIterator<Item = (String, SortOrder)>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn asc(column: &str) -> Self {
        Self::new([(column.to_string(), SortOrder::Asc)])
    }

    pub fn desc(column: &str) -> Self {
        Self::new([(column.to_string(), SortOrder::Desc)])
    }
}

impl StatementFilter for OrderByColumns {
    fn fingerprint(&self) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|(c, o)| format!("{c}:{o:?}"))
            .collect();
        format!("order_by:{}", parts.join(","))
    }

    fn rewrite(&self, query: &mut Query, _ctx: &mut FilterContext) -> FilterResult<()> {
        let mut exprs = Vec::with_capacity(self.columns.len());
        for (column, order) in &self.columns {
            exprs.push(OrderByExpr {
                expr: column_expr(column)?,
                asc: Some(*order == SortOrder::Asc),
                nulls_first: None,
                with_fill: None,
            });
        }
        match &mut query.order_by {
            Some(order_by) => order_by.exprs.extend(exprs),
            None => {
                query.order_by = Some(OrderBy {
                    exprs,
                    interpolate: None,
                });
            }
        }
        Ok(())
    }
}

/// Match operator for [`Search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOperator {
    Equals,
    Like,
    ILike,
}

/// Column match with a bound search value. The value is a parameter, so
/// two searches over the same column share one compiled statement.
#[derive(Debug, Clone)]
pub struct Search {
    column: String,
    operator: SearchOperator,
    value: String,
}

impl Search {
    pub fn new(column: &str, operator: SearchOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn like(column: &str, pattern: impl Into<String>) -> Self {
        Self::new(column, SearchOperator::Like, pattern)
    }
}

impl StatementFilter for Search {
    fn fingerprint(&self) -> String {
        format!("search:{}:{:?}", self.column, self.operator)
    }

    fn rewrite(&self, query: &mut Query, ctx: &mut FilterContext) -> FilterResult<()> {
        let column = column_expr(&self.column)?;
        let value = ctx.bind();
        let predicate = match self.operator {
            SearchOperator::Equals => Expr::BinaryOp {
                left: Box::new(column),
                op: BinaryOperator::Eq,
                right: Box::new(value),
            },
            SearchOperator::Like => Expr::Like {
                negated: false,
                any: false,
                expr: Box::new(column),
                pattern: Box::new(value),
                escape_char: None,
            },
            SearchOperator::ILike => Expr::ILike {
                negated: false,
                any: false,
                expr: Box::new(column),
                pattern: Box::new(value),
                escape_char: None,
            },
        };
        and_selection(query, predicate)
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![Value::Text(self.value.clone())]
    }
}

/// Arbitrary boolean predicate, AND-ed onto the WHERE clause.
///
/// The predicate text may reference the statement's own named placeholders;
/// they resolve against the statement parameters at execute time.
#[derive(Debug, Clone)]
pub struct WherePredicate {
    predicate: String,
}

impl WherePredicate {
    pub fn new(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
        }
    }
}

impl StatementFilter for WherePredicate {
    fn fingerprint(&self) -> String {
        format!("where:{}", self.predicate)
    }

    fn rewrite(&self, query: &mut Query, _ctx: &mut FilterContext) -> FilterResult<()> {
        let dialect = sqlparser::dialect::GenericDialect {};
        let expr = Parser::new(&dialect)
            .try_with_sql(&self.predicate)
            .and_then(|mut parser| parser.parse_expr())
            .map_err(|e| FilterError::Predicate(e.to_string()))?;
        and_selection(query, expr)
    }
}

/// Mandatory tenant predicate. Always applied with a bound value; there is
/// no way to compile the statement without it once attached.
#[derive(Debug, Clone)]
pub struct Tenant {
    column: String,
    value: Value,
}

impl Tenant {
    pub fn new(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

impl StatementFilter for Tenant {
    fn fingerprint(&self) -> String {
        format!("tenant:{}", self.column)
    }

    fn rewrite(&self, query: &mut Query, ctx: &mut FilterContext) -> FilterResult<()> {
        let predicate = Expr::BinaryOp {
            left: Box::new(column_expr(&self.column)?),
            op: BinaryOperator::Eq,
            right: Box::new(ctx.bind()),
        };
        and_selection(query, predicate)
    }

    fn bind_values(&self) -> Vec<Value> {
        vec![self.value.clone()]
    }
}

// ---------------------------------------------------------------------------
// AST helpers
// ---------------------------------------------------------------------------

/// The single SELECT a filter may rewrite. Set operations and VALUES
/// bodies are rejected rather than silently half-filtered.
fn target_select(query: &mut Query) -> FilterResult<&mut Select> {
    match query.body.as_mut() {
        SetExpr::Select(select) => Ok(select),
        other => Err(FilterError::UnsupportedShape(format!(
            "query body is {}",
            set_expr_name(other)
        ))),
    }
}

fn set_expr_name(body: &SetExpr) -> &'static str {
    match body {
        SetExpr::Select(_) => "a select",
        SetExpr::Query(_) => "a nested query",
        SetExpr::SetOperation { .. } => "a set operation",
        SetExpr::Values(_) => "a VALUES list",
        _ => "not a select",
    }
}

fn and_selection(query: &mut Query, predicate: Expr) -> FilterResult<()> {
    let select = target_select(query)?;
    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(existing))),
            op: BinaryOperator::And,
            right: Box::new(Expr::Nested(Box::new(predicate))),
        },
        None => predicate,
    });
    Ok(())
}

/// Turn a dotted column path into an identifier expression, refusing
/// anything that is not a plain identifier path.
fn column_expr(column: &str) -> FilterResult<Expr> {
    let parts: Vec<&str> = column.split('.').collect();
    let valid = !parts.is_empty()
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(FilterError::InvalidIdentifier(column.to_string()));
    }
    if parts.len() == 1 {
        Ok(Expr::Identifier(Ident::new(parts[0])))
    } else {
        Ok(Expr::CompoundIdentifier(
            parts.into_iter().map(Ident::new).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use crate::dialect::Dialect;

    fn query_of(sql: &str) -> Query {
        match parse(sql, Dialect::Generic).unwrap() {
            sqlparser::ast::Statement::Query(query) => *query,
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_limit_offset_literal() {
        let mut query = query_of("SELECT * FROM t");
        let mut ctx = FilterContext::new(0);
        LimitOffset::new(Some(10), Some(20))
            .rewrite(&mut query, &mut ctx)
            .unwrap();
        assert_eq!(query.to_string(), "SELECT * FROM t LIMIT 10 OFFSET 20");
    }

    #[test]
    fn test_page_computes_offset() {
        let mut query = query_of("SELECT * FROM t");
        let mut ctx = FilterContext::new(0);
        LimitOffset::page(3, 25).rewrite(&mut query, &mut ctx).unwrap();
        assert_eq!(query.to_string(), "SELECT * FROM t LIMIT 25 OFFSET 50");
    }

    #[test]
    fn test_order_by_appends() {
        let mut query = query_of("SELECT * FROM t ORDER BY id ASC");
        let mut ctx = FilterContext::new(0);
        OrderByColumns::desc("created_at")
            .rewrite(&mut query, &mut ctx)
            .unwrap();
        assert_eq!(
            query.to_string(),
            "SELECT * FROM t ORDER BY id ASC, created_at DESC"
        );
    }

    #[test]
    fn test_search_binds_placeholder() {
        let mut query = query_of("SELECT * FROM users WHERE active = 1");
        let mut ctx = FilterContext::new(2);
        let filter = Search::like("name", "%ali%");
        filter.rewrite(&mut query, &mut ctx).unwrap();
        let sql = query.to_string();
        // Placeholders continue past the two that already existed.
        assert!(sql.contains("name LIKE $3"), "got {sql}");
        assert!(sql.contains("(active = 1) AND ("), "got {sql}");
        assert_eq!(filter.bind_values(), vec![Value::Text("%ali%".into())]);
        assert_eq!(ctx.bound_names(), ["_f0_0"]);
    }

    #[test]
    fn test_tenant_mandatory_predicate() {
        let mut query = query_of("SELECT * FROM orders");
        let mut ctx = FilterContext::new(0);
        ctx.enter_filter(1);
        Tenant::new("tenant_id", 42)
            .rewrite(&mut query, &mut ctx)
            .unwrap();
        assert_eq!(
            query.to_string(),
            "SELECT * FROM orders WHERE tenant_id = $1"
        );
        assert_eq!(ctx.bound_names(), ["_f1_0"]);
    }

    #[test]
    fn test_where_predicate_parses() {
        let mut query = query_of("SELECT * FROM t WHERE a = 1");
        let mut ctx = FilterContext::new(0);
        WherePredicate::new("b > 5 OR c IS NULL")
            .rewrite(&mut query, &mut ctx)
            .unwrap();
        assert_eq!(
            query.to_string(),
            "SELECT * FROM t WHERE (a = 1) AND (b > 5 OR c IS NULL)"
        );
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let mut query = query_of("SELECT * FROM t");
        let mut ctx = FilterContext::new(0);
        let err = OrderByColumns::asc("id; DROP TABLE t")
            .rewrite(&mut query, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_set_operation_rejected() {
        let mut query = query_of("SELECT a FROM t UNION SELECT a FROM u");
        let mut ctx = FilterContext::new(0);
        let err = Tenant::new("tenant_id", 1)
            .rewrite(&mut query, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedShape(_)));
    }
}
