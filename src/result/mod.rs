//! Driver-agnostic query results.
//!
//! A [`ResultSet`] owns column descriptors, row storage, and the
//! rows-affected count. Every row has the same arity as the column list.
//! Access patterns: iterate rows, take exactly one (`one`), zero-or-one
//! (`one_or_none`), the first scalar, a typed mapping (`as_type`), or a
//! columnar Arrow batch (`arrow`).
//!
//! `one` and `one_or_none` exist separately so "no rows" can be a value
//! (`None`) where the caller expects absence, and an error where it does
//! not.

mod arrow;
mod mapping;

pub use mapping::MappingOptions;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SqlSpecError};
use crate::value::Value;

/// Metadata for one result column.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared SQL type, when the driver exposes it.
    pub decl_type: Option<String>,
    /// Nullability, when known. `None` means the driver could not say.
    pub nullable: Option<bool>,
    /// Source table, when the driver exposes it.
    pub table: Option<String>,
}

impl ColumnInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether the declared type marks this as a JSON column.
    pub(crate) fn is_json(&self) -> bool {
        self.decl_type
            .as_deref()
            .is_some_and(|t| t.to_ascii_uppercase().contains("JSON"))
    }
}

/// One result row. Values are positionally aligned with the result's
/// column descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Materialized result of one execute call.
#[derive(Debug)]
pub struct ResultSet {
    columns: Vec<ColumnInfo>,
    /// Lowercased column name -> position, first occurrence wins.
    index: HashMap<String, usize>,
    rows: Vec<Row>,
    rows_affected: u64,
    restartable: bool,
    iterated: AtomicBool,
}

impl ResultSet {
    /// Build a result from columns and rows. Fails if any row's arity
    /// differs from the column count.
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(SqlSpecError::Data(format!(
                    "row {} has {} values but the result has {} columns",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
        }
        let index = columns
            .iter()
            .enumerate()
            .rev()
            .map(|(i, c)| (c.name.to_lowercase(), i))
            .collect();
        Ok(Self {
            columns,
            index,
            rows,
            rows_affected: 0,
            restartable: true,
            iterated: AtomicBool::new(false),
        })
    }

    /// A rows-less result for mutations.
    pub fn from_rows_affected(rows_affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            index: HashMap::new(),
            rows: Vec::new(),
            rows_affected,
            restartable: true,
            iterated: AtomicBool::new(false),
        }
    }

    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    /// Mark this result as backed by a cursor that cannot rewind; a second
    /// call to [`ResultSet::rows`] then fails.
    pub fn non_restartable(mut self) -> Self {
        self.restartable = false;
        self
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Position of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    /// Rows affected by a mutation. Always non-negative; drivers that
    /// report `-1` sentinels have them coerced to zero upstream.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows. A non-restartable result yields its rows once.
    pub fn rows(&self) -> Result<std::slice::Iter<'_, Row>> {
        if !self.restartable && self.iterated.swap(true, Ordering::SeqCst) {
            return Err(SqlSpecError::Data(
                "result is not restartable and was already iterated".into(),
            ));
        }
        Ok(self.rows.iter())
    }

    /// All rows as a slice. Unlike [`ResultSet::rows`], this does not
    /// consume a non-restartable result.
    pub fn all(&self) -> &[Row] {
        &self.rows
    }

    /// Exactly one row.
    pub fn one(&self) -> Result<&Row> {
        match self.rows.len() {
            1 => Ok(&self.rows[0]),
            0 => Err(SqlSpecError::Data("expected one row, found none".into())),
            n => Err(SqlSpecError::Data(format!(
                "expected one row, found {n}"
            ))),
        }
    }

    /// Zero or one row.
    pub fn one_or_none(&self) -> Result<Option<&Row>> {
        match self.rows.len() {
            0 => Ok(None),
            1 => Ok(Some(&self.rows[0])),
            n => Err(SqlSpecError::Data(format!(
                "expected at most one row, found {n}"
            ))),
        }
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Result<&Value> {
        let row = self
            .rows
            .first()
            .ok_or_else(|| SqlSpecError::Data("no rows for scalar access".into()))?;
        row.get(0)
            .ok_or_else(|| SqlSpecError::Data("no columns for scalar access".into()))
    }

    /// Value at (row, column-name), case-insensitive.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    /// Export as a columnar Arrow batch, built from the row buffers.
    pub fn arrow(&self) -> Result<::arrow::record_batch::RecordBatch> {
        arrow::to_record_batch(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(
            vec![ColumnInfo::named("id"), ColumnInfo::named("Name")],
            vec![
                Row::new(vec![Value::Int(1), Value::Text("a".into())]),
                Row::new(vec![Value::Int(2), Value::Text("b".into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_arity_enforced() {
        let err = ResultSet::new(
            vec![ColumnInfo::named("id")],
            vec![Row::new(vec![Value::Int(1), Value::Int(2)])],
        )
        .unwrap_err();
        assert!(matches!(err, SqlSpecError::Data(_)));
    }

    #[test]
    fn test_column_index_case_insensitive() {
        let rs = sample();
        assert_eq!(rs.column_index("name"), Some(1));
        assert_eq!(rs.column_index("NAME"), Some(1));
        assert_eq!(rs.column_index("missing"), None);
    }

    #[test]
    fn test_one_and_one_or_none() {
        let rs = sample();
        assert!(rs.one().is_err());
        assert!(rs.one_or_none().is_err());

        let single = ResultSet::new(
            vec![ColumnInfo::named("x")],
            vec![Row::new(vec![Value::Int(5)])],
        )
        .unwrap();
        assert_eq!(single.one().unwrap().get(0), Some(&Value::Int(5)));
        assert!(single.one_or_none().unwrap().is_some());

        let empty = ResultSet::new(vec![ColumnInfo::named("x")], vec![]).unwrap();
        assert!(empty.one().is_err());
        assert!(empty.one_or_none().unwrap().is_none());
    }

    #[test]
    fn test_scalar() {
        let rs = sample();
        assert_eq!(rs.scalar().unwrap(), &Value::Int(1));
        let empty = ResultSet::new(vec![ColumnInfo::named("x")], vec![]).unwrap();
        assert!(empty.scalar().is_err());
    }

    #[test]
    fn test_non_restartable_single_iteration() {
        let rs = sample().non_restartable();
        assert_eq!(rs.rows().unwrap().count(), 2);
        assert!(rs.rows().is_err());

        let rs = sample();
        assert_eq!(rs.rows().unwrap().count(), 2);
        assert_eq!(rs.rows().unwrap().count(), 2);
    }

    #[test]
    fn test_value_lookup() {
        let rs = sample();
        assert_eq!(rs.value(1, "name"), Some(&Value::Text("b".into())));
        assert_eq!(rs.value(5, "name"), None);
    }
}
