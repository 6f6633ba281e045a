//! The SELECT builder.

use crate::dialect::Dialect;
use crate::statement::Sql;

use super::predicate::Predicate;
use super::{into_statement, BuilderResult, SqlWriter, VectorDistance};

/// Join kinds the builder renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone)]
enum SelectItem {
    Column(String),
    RawExpr(String),
    Vector { distance: VectorDistance, alias: String },
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: Option<String>,
    on: Option<String>,
}

#[derive(Debug, Clone)]
struct TableRef {
    table: String,
    alias: Option<String>,
}

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
enum OrderTarget {
    Column(String),
    Vector(VectorDistance),
}

/// Start a SELECT over the named columns. `*` selects everything.
pub fn select<const N: usize>(columns: [&str; N]) -> Select {
    let items = columns
        .iter()
        .map(|c| SelectItem::Column((*c).to_string()))
        .collect();
    Select {
        dialect: Dialect::default(),
        distinct: false,
        items,
        from: Vec::new(),
        joins: Vec::new(),
        predicates: Vec::new(),
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        limit: None,
        offset: None,
    }
}

/// Immutable SELECT builder; every method returns a new value.
#[derive(Debug, Clone)]
pub struct Select {
    dialect: Dialect,
    distinct: bool,
    items: Vec<SelectItem>,
    from: Vec<TableRef>,
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
    group_by: Vec<String>,
    having: Option<Predicate>,
    order_by: Vec<(OrderTarget, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add a raw expression to the projection (aggregates, arithmetic).
    pub fn expr(mut self, raw: impl Into<String>) -> Self {
        self.items.push(SelectItem::RawExpr(raw.into()));
        self
    }

    /// Add an aliased vector-distance expression to the projection.
    pub fn vector(mut self, distance: VectorDistance, alias: impl Into<String>) -> Self {
        self.items.push(SelectItem::Vector {
            distance,
            alias: alias.into(),
        });
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from.push(TableRef {
            table: table.into(),
            alias: None,
        });
        self
    }

    pub fn from_as(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.from.push(TableRef {
            table: table.into(),
            alias: Some(alias.into()),
        });
        self
    }

    /// Join with an ON condition given as raw SQL (parser-checked at
    /// compile along with the rest of the build).
    pub fn join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        alias: Option<&str>,
        on: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            alias: alias.map(str::to_string),
            on: Some(on.into()),
        });
        self
    }

    pub fn cross_join(mut self, table: impl Into<String>) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Cross,
            table: table.into(),
            alias: None,
            on: None,
        });
        self
    }

    /// AND a predicate onto the WHERE clause.
    pub fn filter(mut self, predicate: impl Into<Predicate>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn group_by<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.group_by
            .extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    pub fn having(mut self, predicate: impl Into<Predicate>) -> Self {
        self.having = Some(predicate.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by
            .push((OrderTarget::Column(column.into()), direction));
        self
    }

    /// Order by a vector distance (nearest-neighbor queries).
    pub fn order_by_vector(mut self, distance: VectorDistance, direction: Direction) -> Self {
        self.order_by.push((OrderTarget::Vector(distance), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Freeze into an immutable statement.
    pub fn to_statement(&self) -> BuilderResult<Sql> {
        let mut writer = SqlWriter::new(self.dialect);
        self.render(&mut writer)?;
        Ok(into_statement(writer, self.dialect))
    }

    pub(crate) fn render(&self, writer: &mut SqlWriter) -> BuilderResult<()> {
        writer.push("SELECT ");
        if self.distinct {
            writer.push("DISTINCT ");
        }
        if self.items.is_empty() {
            writer.push("*");
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            match item {
                SelectItem::Column(path) if path == "*" => writer.push("*"),
                SelectItem::Column(path) => writer.ident(path),
                SelectItem::RawExpr(raw) => writer.push(raw),
                SelectItem::Vector { distance, alias } => {
                    distance.render(writer)?;
                    writer.push(" AS ");
                    writer.ident(alias);
                }
            }
        }

        for (i, table) in self.from.iter().enumerate() {
            writer.push(if i == 0 { " FROM " } else { ", " });
            writer.ident(&table.table);
            if let Some(alias) = &table.alias {
                writer.push(" AS ");
                writer.ident(alias);
            }
        }

        for join in &self.joins {
            writer.push(" ");
            writer.push(join.kind.as_sql());
            writer.push(" ");
            writer.ident(&join.table);
            if let Some(alias) = &join.alias {
                writer.push(" AS ");
                writer.ident(alias);
            }
            if let Some(on) = &join.on {
                writer.push(" ON ");
                writer.push(on);
            }
        }

        if !self.predicates.is_empty() {
            writer.push(" WHERE ");
            for (i, predicate) in self.predicates.iter().enumerate() {
                if i > 0 {
                    writer.push(" AND ");
                }
                writer.push("(");
                predicate.render(writer)?;
                writer.push(")");
            }
        }

        if !self.group_by.is_empty() {
            writer.push(" GROUP BY ");
            for (i, column) in self.group_by.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.ident(column);
            }
        }

        if let Some(having) = &self.having {
            writer.push(" HAVING ");
            having.render(writer)?;
        }

        if !self.order_by.is_empty() {
            writer.push(" ORDER BY ");
            for (i, (target, direction)) in self.order_by.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                match target {
                    OrderTarget::Column(column) => writer.ident(column),
                    OrderTarget::Vector(distance) => distance.render(writer)?,
                }
                writer.push(match direction {
                    Direction::Asc => " ASC",
                    Direction::Desc => " DESC",
                });
            }
        }

        if let Some(limit) = self.limit {
            writer.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            writer.push(&format!(" OFFSET {offset}"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{col, Predicate};
    use crate::value::Value;

    #[test]
    fn test_basic_select() {
        let stmt = select(["id", "name"])
            .from("users")
            .filter(col("age").gt(21))
            .order_by("name", Direction::Asc)
            .limit(10)
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "SELECT \"id\", \"name\" FROM \"users\" WHERE (\"age\" > :b0) ORDER BY \"name\" ASC LIMIT 10"
        );
        assert_eq!(stmt.params().get_named("b0"), Some(&Value::Int(21)));
    }

    #[test]
    fn test_join_and_alias() {
        let stmt = select(["u.name", "o.total"])
            .from_as("users", "u")
            .join(JoinKind::Left, "orders", Some("o"), "o.user_id = u.id")
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "SELECT \"u\".\"name\", \"o\".\"total\" FROM \"users\" AS \"u\" \
             LEFT JOIN \"orders\" AS \"o\" ON o.user_id = u.id"
        );
    }

    #[test]
    fn test_group_by_having() {
        let stmt = select(["region"])
            .expr("SUM(amount) AS total")
            .from("sales")
            .group_by(["region"])
            .having(Predicate::Raw("SUM(amount) > 100".into()))
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "SELECT \"region\", SUM(amount) AS total FROM \"sales\" GROUP BY \"region\" HAVING SUM(amount) > 100"
        );
    }

    #[test]
    fn test_in_subselect() {
        let sub = select(["user_id"]).from("banned");
        let stmt = select(["*"])
            .from("users")
            .filter(Predicate::in_select(col("id"), sub))
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "SELECT * FROM \"users\" WHERE (\"id\" IN (SELECT \"user_id\" FROM \"banned\"))"
        );
    }

    #[test]
    fn test_subselect_shares_bind_counter() {
        let sub = select(["id"]).from("vips").filter(col("tier").eq(1));
        let stmt = select(["*"])
            .from("users")
            .filter(col("active").eq(true))
            .filter(Predicate::in_select(col("id"), sub))
            .to_statement()
            .unwrap();
        // Outer binds b0, inner continues with b1.
        assert!(stmt.raw().contains(":b0"));
        assert!(stmt.raw().contains(":b1"));
        assert_eq!(stmt.params().named().len(), 2);
    }

    #[test]
    fn test_vector_order_by() {
        let stmt = select(["id"])
            .dialect(Dialect::Postgres)
            .from("docs")
            .order_by_vector(col("embedding").l2_distance(vec![1.0, 2.0]), Direction::Asc)
            .limit(5)
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "SELECT \"id\" FROM \"docs\" ORDER BY l2_distance(\"embedding\", '[1.0, 2.0]') ASC LIMIT 5"
        );
        assert_eq!(stmt.dialect(), Some(Dialect::Postgres));
    }

    #[test]
    fn test_compiles_through_pipeline() {
        use crate::compile::CompileTarget;
        let stmt = select(["id", "name"])
            .dialect(Dialect::Postgres)
            .from("users")
            .filter(col("name").like("%a%"))
            .to_statement()
            .unwrap();
        let compiled = stmt
            .compile(&CompileTarget::for_dialect(Dialect::Postgres))
            .unwrap();
        assert!(compiled.sql.contains("name\" LIKE $1"), "got {}", compiled.sql);
    }
}
