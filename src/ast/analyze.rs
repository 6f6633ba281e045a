//! Statement analysis for observability and cache-key precision.
//!
//! Reports which tables a statement reads and writes, which columns its
//! predicates filter on, which join kinds it uses, and which aggregate
//! functions appear in its projection.

use serde::Serialize;
use sqlparser::ast::{
    Expr, FromTable, Join, JoinOperator, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins,
};

use super::{classify, StatementKind};

/// What a statement touches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub kind: Option<StatementKind>,
    pub tables_read: Vec<String>,
    pub tables_written: Vec<String>,
    pub filter_columns: Vec<String>,
    pub join_kinds: Vec<String>,
    pub aggregates: Vec<String>,
}

impl AnalysisReport {
    fn add_read(&mut self, table: String) {
        if !self.tables_read.contains(&table) {
            self.tables_read.push(table);
        }
    }

    fn add_written(&mut self, table: String) {
        if !self.tables_written.contains(&table) {
            self.tables_written.push(table);
        }
    }

    fn add_filter_column(&mut self, column: String) {
        if !self.filter_columns.contains(&column) {
            self.filter_columns.push(column);
        }
    }
}

/// Analyze a parsed statement.
pub fn analyze(statement: &Statement) -> AnalysisReport {
    let mut report = AnalysisReport {
        kind: Some(classify(statement)),
        ..Default::default()
    };

    match statement {
        Statement::Query(query) => walk_query(query, &mut report),
        Statement::Insert(insert) => {
            report.add_written(insert.table_name.to_string());
            if let Some(source) = &insert.source {
                walk_query(source, &mut report);
            }
        }
        Statement::Update {
            table, selection, ..
        } => {
            collect_table(table, &mut report, true);
            if let Some(predicate) = selection {
                collect_columns(predicate, &mut report);
            }
        }
        Statement::Delete(delete) => {
            let tables = match &delete.from {
                FromTable::WithFromKeyword(tables) => tables,
                FromTable::WithoutKeyword(tables) => tables,
            };
            for table in tables {
                collect_table(table, &mut report, true);
            }
            if let Some(predicate) = &delete.selection {
                collect_columns(predicate, &mut report);
            }
        }
        Statement::Merge { table, source, .. } => {
            collect_factor(table, &mut report, true);
            collect_factor(source, &mut report, false);
        }
        _ => {}
    }

    report
}

fn walk_query(query: &Query, report: &mut AnalysisReport) {
    walk_set_expr(&query.body, report);
}

fn walk_set_expr(body: &SetExpr, report: &mut AnalysisReport) {
    match body {
        SetExpr::Select(select) => walk_select(select, report),
        SetExpr::Query(query) => walk_query(query, report),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, report);
            walk_set_expr(right, report);
        }
        _ => {}
    }
}

fn walk_select(select: &Select, report: &mut AnalysisReport) {
    for table in &select.from {
        collect_table(table, report, false);
        for join in &table.joins {
            collect_join(join, report);
        }
    }

    if let Some(predicate) = &select.selection {
        collect_columns(predicate, report);
    }

    for item in &select.projection {
        let expr = match item {
            SelectItem::UnnamedExpr(expr) => expr,
            SelectItem::ExprWithAlias { expr, .. } => expr,
            _ => continue,
        };
        collect_aggregates(expr, report);
    }
}

fn collect_table(table: &TableWithJoins, report: &mut AnalysisReport, written: bool) {
    collect_factor(&table.relation, report, written);
}

fn collect_factor(factor: &TableFactor, report: &mut AnalysisReport, written: bool) {
    match factor {
        TableFactor::Table { name, .. } => {
            if written {
                report.add_written(name.to_string());
            } else {
                report.add_read(name.to_string());
            }
        }
        TableFactor::Derived { subquery, .. } => walk_query(subquery, report),
        _ => {}
    }
}

fn collect_join(join: &Join, report: &mut AnalysisReport) {
    let kind = match &join.join_operator {
        JoinOperator::Inner(_) => "inner",
        JoinOperator::LeftOuter(_) => "left",
        JoinOperator::RightOuter(_) => "right",
        JoinOperator::FullOuter(_) => "full",
        JoinOperator::CrossJoin => "cross",
        _ => "other",
    };
    report.join_kinds.push(kind.to_string());
    collect_factor(&join.relation, report, false);
}

/// Column identifiers referenced by a predicate.
fn collect_columns(expr: &Expr, report: &mut AnalysisReport) {
    match expr {
        Expr::Identifier(ident) => report.add_filter_column(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => {
            if let Some(last) = parts.last() {
                report.add_filter_column(last.value.clone());
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_columns(left, report);
            collect_columns(right, report);
        }
        Expr::UnaryOp { expr, .. } => collect_columns(expr, report),
        Expr::Nested(inner) => collect_columns(inner, report),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => collect_columns(inner, report),
        Expr::InSubquery { expr, subquery, .. } => {
            collect_columns(expr, report);
            walk_query(subquery, report);
        }
        Expr::InList { expr, .. } => collect_columns(expr, report),
        Expr::Between { expr, .. } => collect_columns(expr, report),
        _ => {}
    }
}

fn collect_aggregates(expr: &Expr, report: &mut AnalysisReport) {
    if let Expr::Function(function) = expr {
        let name = function.name.to_string().to_lowercase();
        if super::validate::contains_aggregate(expr) && !report.aggregates.contains(&name) {
            report.aggregates.push(name);
        }
        return;
    }
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregates(left, report);
            collect_aggregates(right, report);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => collect_aggregates(expr, report),
        _ => {}
    }
}
