//! Bounded statement validation.
//!
//! Runs a fixed set of checks over a parsed statement: deny-listed
//! statement kinds, DML without a WHERE clause, joins without a
//! constraint, and aggregates used without GROUP BY. The checks are
//! deliberately shallow; this is a safety net, not a semantic analyzer.

use sqlparser::ast::{
    Expr, Join, JoinConstraint, JoinOperator, Query, Select, SelectItem, SetExpr, Statement,
};

use super::{classify, StatementKind};

/// Aggregate function names the checks recognize.
const AGGREGATES: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "array_agg",
    "string_agg",
    "group_concat",
];

/// Validation policy.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Statement kinds rejected outright.
    pub deny: Vec<StatementKind>,
}

/// Outcome of validation. Errors fail compilation; warnings are advisory.
#[derive(Debug, Clone, Default)]
pub struct ValidationDiagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationDiagnostics {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a single parsed statement.
pub fn validate(statement: &Statement, options: &ValidateOptions) -> ValidationDiagnostics {
    let mut diagnostics = ValidationDiagnostics::default();
    let kind = classify(statement);

    if options.deny.contains(&kind) {
        diagnostics
            .errors
            .push(format!("statement kind '{kind}' is denied by configuration"));
    }

    match statement {
        Statement::Query(query) => check_query(query, &mut diagnostics),
        Statement::Update { selection, .. } => {
            if selection.is_none() {
                diagnostics
                    .warnings
                    .push("UPDATE without a WHERE clause affects every row".into());
            }
        }
        Statement::Delete(delete) => {
            if delete.selection.is_none() {
                diagnostics
                    .warnings
                    .push("DELETE without a WHERE clause affects every row".into());
            }
        }
        _ => {}
    }

    diagnostics
}

fn check_query(query: &Query, diagnostics: &mut ValidationDiagnostics) {
    check_set_expr(&query.body, diagnostics);
}

fn check_set_expr(body: &SetExpr, diagnostics: &mut ValidationDiagnostics) {
    match body {
        SetExpr::Select(select) => check_select(select, diagnostics),
        SetExpr::Query(query) => check_query(query, diagnostics),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left, diagnostics);
            check_set_expr(right, diagnostics);
        }
        _ => {}
    }
}

fn check_select(select: &Select, diagnostics: &mut ValidationDiagnostics) {
    for table in &select.from {
        for join in &table.joins {
            check_join(join, diagnostics);
        }
    }

    let has_aggregate = select
        .projection
        .iter()
        .any(|item| projection_expr(item).is_some_and(contains_aggregate));
    let has_plain_column = select
        .projection
        .iter()
        .any(|item| projection_expr(item).is_some_and(is_plain_column));
    let grouped = !matches!(
        &select.group_by,
        sqlparser::ast::GroupByExpr::Expressions(exprs, _) if exprs.is_empty()
    );

    if has_aggregate && has_plain_column && !grouped {
        diagnostics
            .errors
            .push("aggregate mixed with bare columns requires GROUP BY".into());
    }
}

fn check_join(join: &Join, diagnostics: &mut ValidationDiagnostics) {
    let constraint = match &join.join_operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => c,
        _ => return,
    };
    if matches!(constraint, JoinConstraint::None) {
        diagnostics
            .warnings
            .push("join without an ON or USING constraint".into());
    }
}

fn projection_expr(item: &SelectItem) -> Option<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) => Some(expr),
        SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

pub(crate) fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(function) => {
            let name = function.name.to_string().to_lowercase();
            let base = name.rsplit('.').next().unwrap_or(&name);
            AGGREGATES.contains(&base)
        }
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } => contains_aggregate(expr),
        Expr::Nested(inner) => contains_aggregate(inner),
        _ => false,
    }
}

fn is_plain_column(expr: &Expr) -> bool {
    matches!(expr, Expr::Identifier(_) | Expr::CompoundIdentifier(_))
}
