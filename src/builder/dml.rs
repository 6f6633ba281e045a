//! INSERT / UPDATE / DELETE / MERGE builders.

use crate::dialect::Dialect;
use crate::statement::Sql;
use crate::value::Value;

use super::predicate::Predicate;
use super::{into_statement, BuilderError, BuilderResult, SqlWriter};

/// Start an INSERT into `table`.
pub fn insert(table: impl Into<String>) -> Insert {
    Insert {
        dialect: Dialect::default(),
        table: table.into(),
        columns: Vec::new(),
        rows: Vec::new(),
        returning: Vec::new(),
    }
}

/// Start an UPDATE of `table`.
pub fn update(table: impl Into<String>) -> Update {
    Update {
        dialect: Dialect::default(),
        table: table.into(),
        assignments: Vec::new(),
        predicates: Vec::new(),
        returning: Vec::new(),
    }
}

/// Start a DELETE from `table`.
pub fn delete(table: impl Into<String>) -> Delete {
    Delete {
        dialect: Dialect::default(),
        table: table.into(),
        predicates: Vec::new(),
        returning: Vec::new(),
    }
}

/// Start a MERGE into `table`.
pub fn merge(table: impl Into<String>) -> Merge {
    Merge {
        dialect: Dialect::default(),
        target: table.into(),
        source: None,
        on: None,
        when_matched: Vec::new(),
        when_not_matched: None,
        delete_unmatched_by_source: false,
    }
}

/// INSERT builder.
#[derive(Debug, Clone)]
pub struct Insert {
    dialect: Dialect,
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    returning: Vec<String>,
}

impl Insert {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn columns<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Append one VALUES row. Call repeatedly for multi-row inserts.
    pub fn values(mut self, row: impl IntoIterator<Item = Value>) -> Self {
        self.rows.push(row.into_iter().collect());
        self
    }

    pub fn returning<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.returning = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn to_statement(&self) -> BuilderResult<Sql> {
        if self.rows.is_empty() {
            return Err(BuilderError::EmptyValues);
        }
        if !self.columns.is_empty() {
            for row in &self.rows {
                if row.len() != self.columns.len() {
                    return Err(BuilderError::ValuesArity {
                        expected: self.columns.len(),
                        got: row.len(),
                    });
                }
            }
        }
        check_returning(&self.returning, self.dialect)?;

        let mut writer = SqlWriter::new(self.dialect);
        writer.push("INSERT INTO ");
        writer.ident(&self.table);
        if !self.columns.is_empty() {
            writer.push(" (");
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.ident(column);
            }
            writer.push(")");
        }
        writer.push(" VALUES ");
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push("(");
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    writer.push(", ");
                }
                writer.bind(value.clone());
            }
            writer.push(")");
        }
        render_returning(&mut writer, &self.returning);
        Ok(into_statement(writer, self.dialect))
    }
}

/// UPDATE builder.
#[derive(Debug, Clone)]
pub struct Update {
    dialect: Dialect,
    table: String,
    assignments: Vec<(String, Value)>,
    predicates: Vec<Predicate>,
    returning: Vec<String>,
}

impl Update {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, predicate: impl Into<Predicate>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn returning<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.returning = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn to_statement(&self) -> BuilderResult<Sql> {
        if self.assignments.is_empty() {
            return Err(BuilderError::EmptyAssignments);
        }
        check_returning(&self.returning, self.dialect)?;

        let mut writer = SqlWriter::new(self.dialect);
        writer.push("UPDATE ");
        writer.ident(&self.table);
        writer.push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.ident(column);
            writer.push(" = ");
            writer.bind(value.clone());
        }
        render_where(&mut writer, &self.predicates)?;
        render_returning(&mut writer, &self.returning);
        Ok(into_statement(writer, self.dialect))
    }
}

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct Delete {
    dialect: Dialect,
    table: String,
    predicates: Vec<Predicate>,
    returning: Vec<String>,
}

impl Delete {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn filter(mut self, predicate: impl Into<Predicate>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn returning<const N: usize>(mut self, columns: [&str; N]) -> Self {
        self.returning = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn to_statement(&self) -> BuilderResult<Sql> {
        check_returning(&self.returning, self.dialect)?;
        let mut writer = SqlWriter::new(self.dialect);
        writer.push("DELETE FROM ");
        writer.ident(&self.table);
        render_where(&mut writer, &self.predicates)?;
        render_returning(&mut writer, &self.returning);
        Ok(into_statement(writer, self.dialect))
    }
}

/// MERGE builder. Only dialects with native MERGE accept it; everything
/// else fails at build time, before any driver involvement.
#[derive(Debug, Clone)]
pub struct Merge {
    dialect: Dialect,
    target: String,
    source: Option<String>,
    on: Option<String>,
    when_matched: Vec<(String, Value)>,
    when_not_matched: Option<(Vec<String>, Vec<Value>)>,
    delete_unmatched_by_source: bool,
}

impl Merge {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// The source table and the join condition (raw SQL).
    pub fn using(mut self, source: impl Into<String>, on: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self.on = Some(on.into());
        self
    }

    /// WHEN MATCHED THEN UPDATE SET column = value.
    pub fn when_matched_update(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.when_matched.push((column.into(), value.into()));
        self
    }

    /// WHEN NOT MATCHED THEN INSERT (columns) VALUES (values).
    pub fn when_not_matched_insert<const N: usize>(
        mut self,
        columns: [&str; N],
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.when_not_matched = Some((
            columns.iter().map(|c| (*c).to_string()).collect(),
            values.into_iter().collect(),
        ));
        self
    }

    /// WHEN NOT MATCHED BY SOURCE THEN DELETE.
    pub fn when_not_matched_by_source_delete(mut self) -> Self {
        self.delete_unmatched_by_source = true;
        self
    }

    pub fn to_statement(&self) -> BuilderResult<Sql> {
        if !self.dialect.supports_merge() {
            return Err(BuilderError::MergeUnsupported(self.dialect));
        }
        let (Some(source), Some(on)) = (&self.source, &self.on) else {
            return Err(BuilderError::MergeIncomplete);
        };
        if let Some((columns, values)) = &self.when_not_matched {
            if columns.len() != values.len() {
                return Err(BuilderError::ValuesArity {
                    expected: columns.len(),
                    got: values.len(),
                });
            }
        }

        let mut writer = SqlWriter::new(self.dialect);
        writer.push("MERGE INTO ");
        writer.ident(&self.target);
        writer.push(" USING ");
        writer.ident(source);
        writer.push(" ON ");
        writer.push(on);

        if !self.when_matched.is_empty() {
            writer.push(" WHEN MATCHED THEN UPDATE SET ");
            for (i, (column, value)) in self.when_matched.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.ident(column);
                writer.push(" = ");
                writer.bind(value.clone());
            }
        }

        if let Some((columns, values)) = &self.when_not_matched {
            writer.push(" WHEN NOT MATCHED THEN INSERT (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.ident(column);
            }
            writer.push(") VALUES (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    writer.push(", ");
                }
                writer.bind(value.clone());
            }
            writer.push(")");
        }

        if self.delete_unmatched_by_source {
            writer.push(" WHEN NOT MATCHED BY SOURCE THEN DELETE");
        }

        Ok(into_statement(writer, self.dialect))
    }
}

fn render_where(writer: &mut SqlWriter, predicates: &[Predicate]) -> BuilderResult<()> {
    if predicates.is_empty() {
        return Ok(());
    }
    writer.push(" WHERE ");
    for (i, predicate) in predicates.iter().enumerate() {
        if i > 0 {
            writer.push(" AND ");
        }
        writer.push("(");
        predicate.render(writer)?;
        writer.push(")");
    }
    Ok(())
}

fn render_returning(writer: &mut SqlWriter, returning: &[String]) {
    if returning.is_empty() {
        return;
    }
    writer.push(" RETURNING ");
    for (i, column) in returning.iter().enumerate() {
        if i > 0 {
            writer.push(", ");
        }
        writer.ident(column);
    }
}

fn check_returning(returning: &[String], dialect: Dialect) -> BuilderResult<()> {
    if !returning.is_empty() && !dialect.supports_returning() {
        return Err(BuilderError::ReturningUnsupported(dialect));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::col;

    #[test]
    fn test_insert_multi_row() {
        let stmt = insert("users")
            .columns(["name", "age"])
            .values([Value::Text("A".into()), Value::Int(1)])
            .values([Value::Text("B".into()), Value::Int(2)])
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES (:b0, :b1), (:b2, :b3)"
        );
        assert_eq!(stmt.params().named().len(), 4);
    }

    #[test]
    fn test_insert_requires_values() {
        let err = insert("t").columns(["a"]).to_statement().unwrap_err();
        assert!(matches!(err, BuilderError::EmptyValues));

        let err = insert("t")
            .columns(["a", "b"])
            .values([Value::Int(1)])
            .to_statement()
            .unwrap_err();
        assert!(matches!(err, BuilderError::ValuesArity { expected: 2, got: 1 }));
    }

    #[test]
    fn test_insert_returning_gated_by_dialect() {
        let ok = insert("t")
            .dialect(Dialect::Postgres)
            .columns(["a"])
            .values([Value::Int(1)])
            .returning(["id"])
            .to_statement()
            .unwrap();
        assert!(ok.raw().ends_with("RETURNING \"id\""));

        let err = insert("t")
            .dialect(Dialect::MySql)
            .columns(["a"])
            .values([Value::Int(1)])
            .returning(["id"])
            .to_statement()
            .unwrap_err();
        assert!(matches!(err, BuilderError::ReturningUnsupported(Dialect::MySql)));
    }

    #[test]
    fn test_update() {
        let stmt = update("users")
            .set("name", "Zed")
            .set("age", 30)
            .filter(col("id").eq(7))
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "UPDATE \"users\" SET \"name\" = :b0, \"age\" = :b1 WHERE (\"id\" = :b2)"
        );
    }

    #[test]
    fn test_update_requires_assignments() {
        let err = update("t").to_statement().unwrap_err();
        assert!(matches!(err, BuilderError::EmptyAssignments));
    }

    #[test]
    fn test_delete() {
        let stmt = delete("sessions")
            .filter(col("expires_at").lt("2026-01-01"))
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "DELETE FROM \"sessions\" WHERE (\"expires_at\" < :b0)"
        );
    }

    #[test]
    fn test_merge_full_clause_set() {
        let stmt = merge("inventory")
            .dialect(Dialect::BigQuery)
            .using("staged", "inventory.sku = staged.sku")
            .when_matched_update("qty", 5)
            .when_not_matched_insert(["sku", "qty"], [Value::Text("X".into()), Value::Int(5)])
            .when_not_matched_by_source_delete()
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.raw(),
            "MERGE INTO `inventory` USING `staged` ON inventory.sku = staged.sku \
             WHEN MATCHED THEN UPDATE SET `qty` = :b0 \
             WHEN NOT MATCHED THEN INSERT (`sku`, `qty`) VALUES (:b1, :b2) \
             WHEN NOT MATCHED BY SOURCE THEN DELETE"
        );
    }

    #[test]
    fn test_merge_rejected_for_unsupporting_dialect() {
        let err = merge("t")
            .dialect(Dialect::Sqlite)
            .using("s", "t.id = s.id")
            .to_statement()
            .unwrap_err();
        assert!(matches!(err, BuilderError::MergeUnsupported(Dialect::Sqlite)));
    }

    #[test]
    fn test_merge_requires_source() {
        let err = merge("t")
            .dialect(Dialect::Postgres)
            .to_statement()
            .unwrap_err();
        assert!(matches!(err, BuilderError::MergeIncomplete));
    }
}
