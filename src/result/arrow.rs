//! Columnar export of a materialized result.
//!
//! Builds an Arrow `RecordBatch` from row buffers. Column types are
//! inferred from the values present: integers widen to `Int64`, any float
//! widens the column to `Float64`, and a column mixing incompatible kinds
//! falls back to `Utf8` with literal rendering. Drivers with native Arrow
//! support bypass this path and hand batches through unchanged.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use super::ResultSet;
use crate::error::{Result, SqlSpecError};
use crate::value::Value;

/// Convert a result set into a single Arrow batch.
pub fn to_record_batch(result: &ResultSet) -> Result<RecordBatch> {
    if result.columns().is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let mut fields = Vec::with_capacity(result.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(result.columns().len());

    for (index, column) in result.columns().iter().enumerate() {
        let data_type = infer_type(result, index);
        fields.push(Field::new(column.name.as_str(), data_type.clone(), true));
        arrays.push(build_array(result, index, &data_type)?);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| SqlSpecError::Data(format!("arrow conversion failed: {e}")))
}

fn infer_type(result: &ResultSet, column: usize) -> DataType {
    let mut seen_int = false;
    let mut seen_float = false;
    let mut seen_bool = false;
    let mut seen_text = false;
    let mut seen_blob = false;

    for row in result.all() {
        match row.get(column) {
            Some(Value::Int(_)) => seen_int = true,
            Some(Value::Float(_)) => seen_float = true,
            Some(Value::Bool(_)) => seen_bool = true,
            Some(Value::Text(_)) => seen_text = true,
            Some(Value::Blob(_)) => seen_blob = true,
            Some(Value::Null) | None => {}
        }
    }

    match (seen_text, seen_blob, seen_float, seen_int, seen_bool) {
        (true, false, false, false, false) => DataType::Utf8,
        (false, true, false, false, false) => DataType::Binary,
        (false, false, true, _, false) => DataType::Float64,
        (false, false, false, true, false) => DataType::Int64,
        (false, false, false, false, true) => DataType::Boolean,
        // All null, or an incompatible mixture: render as text.
        _ => DataType::Utf8,
    }
}

fn build_array(result: &ResultSet, column: usize, data_type: &DataType) -> Result<ArrayRef> {
    let values = result.all().iter().map(|row| row.get(column));
    match data_type {
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(result.len());
            for value in values {
                match value {
                    Some(Value::Int(n)) => builder.append_value(*n),
                    _ => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(result.len());
            for value in values {
                match value {
                    Some(Value::Float(f)) => builder.append_value(*f),
                    Some(Value::Int(n)) => builder.append_value(*n as f64),
                    _ => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(result.len());
            for value in values {
                match value {
                    Some(Value::Bool(b)) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::new();
            for value in values {
                match value {
                    Some(Value::Blob(bytes)) => builder.append_value(bytes),
                    _ => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        _ => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Some(Value::Null) | None => builder.append_null(),
                    Some(Value::Text(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_literal()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ColumnInfo, Row};
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};

    fn result(columns: Vec<&str>, rows: Vec<Vec<Value>>) -> ResultSet {
        ResultSet::new(
            columns.into_iter().map(ColumnInfo::named).collect(),
            rows.into_iter().map(Row::new).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_int_column() {
        let rs = result(
            vec!["id"],
            vec![vec![Value::Int(1)], vec![Value::Null], vec![Value::Int(3)]],
        );
        let batch = to_record_batch(&rs).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(array.value(0), 1);
        assert!(array.is_null(1));
    }

    #[test]
    fn test_int_float_mix_widens() {
        let rs = result(
            vec!["x"],
            vec![vec![Value::Int(1)], vec![Value::Float(2.5)]],
        );
        let batch = to_record_batch(&rs).unwrap();
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(array.value(0), 1.0);
        assert_eq!(array.value(1), 2.5);
    }

    #[test]
    fn test_incompatible_mix_falls_back_to_text() {
        let rs = result(
            vec!["x"],
            vec![vec![Value::Bool(true)], vec![Value::Text("hi".into())]],
        );
        let batch = to_record_batch(&rs).unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8);
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(array.value(0), "TRUE");
        assert_eq!(array.value(1), "hi");
    }

    #[test]
    fn test_empty_result() {
        let rs = ResultSet::from_rows_affected(0);
        let batch = to_record_batch(&rs).unwrap();
        assert_eq!(batch.num_columns(), 0);
        assert_eq!(batch.num_rows(), 0);
    }

    #[test]
    fn test_schema_names_match_columns() {
        let rs = result(
            vec!["a", "b"],
            vec![vec![Value::Int(1), Value::Text("x".into())]],
        );
        let batch = to_record_batch(&rs).unwrap();
        assert_eq!(batch.schema().field(0).name(), "a");
        assert_eq!(batch.schema().field(1).name(), "b");
    }
}
