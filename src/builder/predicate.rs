//! The predicate DSL.
//!
//! Predicates come from tuples (`("age", ">", 25)`), raw strings,
//! `Column` methods, or sub-selects for `IN` / `EXISTS`. They render into
//! the builder's writer, binding every value as a parameter.

use super::select::Select;
use super::{BuilderError, BuilderResult, Column, SqlWriter};
use crate::value::Value;

/// Comparison operators the tuple form accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl CompareOp {
    pub fn parse(op: &str) -> BuilderResult<Self> {
        match op {
            "=" | "==" => Ok(CompareOp::Eq),
            "!=" | "<>" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "like" | "LIKE" => Ok(CompareOp::Like),
            "not like" | "NOT LIKE" => Ok(CompareOp::NotLike),
            other => Err(BuilderError::BadOperator(other.to_string())),
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
        }
    }
}

/// Right-hand side of a comparison: a bound value or another column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Column(Column),
}

impl From<Column> for Operand {
    fn from(column: Column) -> Self {
        Operand::Column(column)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),+) => {$(
        impl From<$ty> for Operand {
            fn from(value: $ty) -> Self {
                Operand::Value(value.into())
            }
        }
    )+};
}

operand_from_value!(bool, i32, i64, u32, f64, &str, String);

/// A boolean expression fragment.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        column: Column,
        op: CompareOp,
        operand: Operand,
    },
    InList {
        column: Column,
        values: Vec<Value>,
        negated: bool,
    },
    InSelect {
        column: Column,
        select: Box<Select>,
        negated: bool,
    },
    Exists {
        select: Box<Select>,
        negated: bool,
    },
    IsNull {
        column: Column,
        negated: bool,
    },
    Between {
        column: Column,
        low: Value,
        high: Value,
    },
    /// Raw SQL fragment; parser-checked at compile like everything else.
    Raw(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(column: Column, op: CompareOp, operand: impl Into<Operand>) -> Self {
        Predicate::Compare {
            column,
            op,
            operand: operand.into(),
        }
    }

    /// Tuple form: `("age", ">", 25)`.
    pub fn from_tuple(
        column: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> BuilderResult<Self> {
        Ok(Predicate::Compare {
            column: super::col(column),
            op: CompareOp::parse(op)?,
            operand: Operand::Value(value.into()),
        })
    }

    /// `column IN (sub-select)`.
    pub fn in_select(column: Column, select: Select) -> Self {
        Predicate::InSelect {
            column,
            select: Box::new(select),
            negated: false,
        }
    }

    /// `EXISTS (sub-select)`.
    pub fn exists(select: Select) -> Self {
        Predicate::Exists {
            select: Box::new(select),
            negated: false,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub(crate) fn render(&self, writer: &mut SqlWriter) -> BuilderResult<()> {
        match self {
            Predicate::Compare { column, op, operand } => {
                writer.ident(column.path());
                writer.push(" ");
                writer.push(op.as_sql());
                writer.push(" ");
                match operand {
                    Operand::Value(value) => writer.bind(value.clone()),
                    Operand::Column(other) => writer.ident(other.path()),
                }
                Ok(())
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                writer.ident(column.path());
                writer.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        writer.push(", ");
                    }
                    writer.bind(value.clone());
                }
                writer.push(")");
                Ok(())
            }
            Predicate::InSelect {
                column,
                select,
                negated,
            } => {
                writer.ident(column.path());
                writer.push(if *negated { " NOT IN (" } else { " IN (" });
                select.render(writer)?;
                writer.push(")");
                Ok(())
            }
            Predicate::Exists { select, negated } => {
                writer.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                select.render(writer)?;
                writer.push(")");
                Ok(())
            }
            Predicate::IsNull { column, negated } => {
                writer.ident(column.path());
                writer.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
            Predicate::Between { column, low, high } => {
                writer.ident(column.path());
                writer.push(" BETWEEN ");
                writer.bind(low.clone());
                writer.push(" AND ");
                writer.bind(high.clone());
                Ok(())
            }
            Predicate::Raw(sql) => {
                writer.push(sql);
                Ok(())
            }
            Predicate::And(parts) => render_composite(writer, parts, " AND "),
            Predicate::Or(parts) => render_composite(writer, parts, " OR "),
        }
    }
}

fn render_composite(
    writer: &mut SqlWriter,
    parts: &[Predicate],
    separator: &str,
) -> BuilderResult<()> {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            writer.push(separator);
        }
        writer.push("(");
        part.render(writer)?;
        writer.push(")");
    }
    Ok(())
}

impl From<&str> for Predicate {
    fn from(raw: &str) -> Self {
        Predicate::Raw(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::col;
    use crate::dialect::Dialect;

    fn render(predicate: &Predicate) -> (String, usize) {
        let mut writer = SqlWriter::new(Dialect::Postgres);
        predicate.render(&mut writer).unwrap();
        let (sql, params) = writer.finish();
        (sql, params.len())
    }

    #[test]
    fn test_compare_binds_value() {
        let (sql, params) = render(&col("age").gt(25));
        assert_eq!(sql, "\"age\" > :b0");
        assert_eq!(params, 1);
    }

    #[test]
    fn test_compare_column_operand() {
        let (sql, params) = render(&col("a").eq(col("b")));
        assert_eq!(sql, "\"a\" = \"b\"");
        assert_eq!(params, 0);
    }

    #[test]
    fn test_tuple_form() {
        let predicate = Predicate::from_tuple("name", "like", "%a%").unwrap();
        let (sql, params) = render(&predicate);
        assert_eq!(sql, "\"name\" LIKE :b0");
        assert_eq!(params, 1);

        assert!(Predicate::from_tuple("x", "~~", 1).is_err());
    }

    #[test]
    fn test_in_list() {
        let (sql, params) = render(&col("id").in_list([Value::Int(1), Value::Int(2)]));
        assert_eq!(sql, "\"id\" IN (:b0, :b1)");
        assert_eq!(params, 2);
    }

    #[test]
    fn test_composed_and_or() {
        let predicate = col("a").eq(1).and(col("b").eq(2).or(col("c").is_null()));
        let (sql, _) = render(&predicate);
        assert_eq!(sql, "(\"a\" = :b0) AND ((\"b\" = :b1) OR (\"c\" IS NULL))");
    }

    #[test]
    fn test_between() {
        let (sql, params) = render(&Predicate::Between {
            column: col("age"),
            low: Value::Int(18),
            high: Value::Int(65),
        });
        assert_eq!(sql, "\"age\" BETWEEN :b0 AND :b1");
        assert_eq!(params, 2);
    }
}
