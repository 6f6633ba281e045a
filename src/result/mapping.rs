//! Typed row mapping.
//!
//! Rows map onto any `serde`-deserializable shape through a JSON
//! intermediate: column names become object keys, values become JSON
//! scalars, and JSON-typed columns are decoded into structured values
//! before mapping. NULL into a non-optional field is a mapping error;
//! optional fields receive `None`.
//!
//! Matching is case-insensitive unless `case_sensitive` is set. Unknown
//! columns are dropped by default; `strict_columns` makes them an error,
//! which requires the target shape to also be `Serialize` so the mapper
//! can see which fields it actually has.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use super::{ResultSet, Row};
use crate::error::{Result, SqlSpecError};
use crate::value::Value;

/// How column names match record fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingOptions {
    /// Require every result column to land in a record field.
    pub strict_columns: bool,
    /// Match column names to fields exactly instead of by lowercase.
    pub case_sensitive: bool,
    /// Leave JSON-typed columns as raw text instead of decoding them.
    pub raw_json: bool,
}

impl ResultSet {
    /// Map every row to `T` with default options (case-insensitive,
    /// lenient columns, JSON decoded).
    pub fn as_type<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let options = MappingOptions::default();
        let mut out = Vec::with_capacity(self.len());
        for (i, row) in self.all().iter().enumerate() {
            out.push(deserialize_row(self.row_object(row, options)?, i)?);
        }
        Ok(out)
    }

    /// Map the single row of this result to `T`.
    pub fn one_as<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self.one()?;
        deserialize_row(self.row_object(row, MappingOptions::default())?, 0)
    }

    /// Map every row to `T` under explicit options.
    pub fn map_rows<T: DeserializeOwned + Serialize>(
        &self,
        options: MappingOptions,
    ) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.len());
        for (i, row) in self.all().iter().enumerate() {
            let object = self.row_object(row, options)?;
            let mapped: T = deserialize_row(object.clone(), i)?;
            if options.strict_columns {
                check_strict_columns(&mapped, &object, i)?;
            }
            out.push(mapped);
        }
        Ok(out)
    }

    fn row_object(&self, row: &Row, options: MappingOptions) -> Result<JsonValue> {
        let mut object = Map::with_capacity(self.columns().len());
        for (i, column) in self.columns().iter().enumerate() {
            let key = if options.case_sensitive {
                column.name.clone()
            } else {
                column.name.to_lowercase()
            };
            let value = row.get(i).cloned().unwrap_or(Value::Null);
            let json = if column.is_json() && !options.raw_json {
                decode_json_column(&column.name, value)?
            } else {
                to_json(value)
            };
            object.insert(key, json);
        }
        Ok(JsonValue::Object(object))
    }
}

fn deserialize_row<T: DeserializeOwned>(object: JsonValue, row_index: usize) -> Result<T> {
    serde_json::from_value(object)
        .map_err(|e| SqlSpecError::Data(format!("row {row_index} does not map: {e}")))
}

fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(b),
        Value::Int(n) => JsonValue::from(n),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(s) => JsonValue::String(s),
        Value::Blob(b) => JsonValue::Array(b.into_iter().map(JsonValue::from).collect()),
    }
}

fn decode_json_column(name: &str, value: Value) -> Result<JsonValue> {
    match value {
        Value::Text(text) => serde_json::from_str(&text)
            .map_err(|e| SqlSpecError::Data(format!("column '{name}' holds invalid JSON: {e}"))),
        other => Ok(to_json(other)),
    }
}

/// Re-serialize the mapped record and require every result column key to
/// appear among its fields. Only meaningful for struct-shaped targets;
/// anything that does not serialize back to an object passes.
fn check_strict_columns<T: Serialize>(
    mapped: &T,
    source: &JsonValue,
    row_index: usize,
) -> Result<()> {
    let Ok(JsonValue::Object(fields)) = serde_json::to_value(mapped) else {
        return Ok(());
    };
    let JsonValue::Object(columns) = source else {
        return Ok(());
    };
    let unknown: Vec<&str> = columns
        .keys()
        .filter(|key| !fields.contains_key(*key))
        .map(|s| s.as_str())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(SqlSpecError::Data(format!(
            "row {row_index} has columns with no matching field: {}",
            unknown.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ColumnInfo, ResultSet, Row};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
        email: Option<String>,
    }

    fn users_result() -> ResultSet {
        ResultSet::new(
            vec![
                ColumnInfo::named("ID"),
                ColumnInfo::named("Name"),
                ColumnInfo::named("email"),
            ],
            vec![
                Row::new(vec![
                    Value::Int(1),
                    Value::Text("Alice".into()),
                    Value::Text("a@example.com".into()),
                ]),
                Row::new(vec![Value::Int(2), Value::Text("Bob".into()), Value::Null]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_case_insensitive_mapping() {
        let users: Vec<User> = users_result().as_type().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "Alice");
        assert_eq!(users[1].email, None);
    }

    #[test]
    fn test_null_into_non_optional_fails() {
        let rs = ResultSet::new(
            vec![
                ColumnInfo::named("id"),
                ColumnInfo::named("name"),
                ColumnInfo::named("email"),
            ],
            vec![Row::new(vec![Value::Int(1), Value::Null, Value::Null])],
        )
        .unwrap();
        let err = rs.as_type::<User>().unwrap_err();
        assert!(matches!(err, SqlSpecError::Data(_)));
    }

    #[test]
    fn test_unknown_columns_dropped_by_default() {
        let rs = ResultSet::new(
            vec![
                ColumnInfo::named("id"),
                ColumnInfo::named("name"),
                ColumnInfo::named("email"),
                ColumnInfo::named("extra"),
            ],
            vec![Row::new(vec![
                Value::Int(1),
                Value::Text("A".into()),
                Value::Null,
                Value::Int(9),
            ])],
        )
        .unwrap();
        let users: Vec<User> = rs.as_type().unwrap();
        assert_eq!(users[0].id, 1);

        let err = rs
            .map_rows::<User>(MappingOptions {
                strict_columns: true,
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("extra"), "got: {err}");
    }

    #[test]
    fn test_json_column_decoded() {
        #[derive(Debug, Deserialize)]
        struct Event {
            payload: serde_json::Value,
        }

        let mut column = ColumnInfo::named("payload");
        column.decl_type = Some("JSONB".into());
        let rs = ResultSet::new(
            vec![column],
            vec![Row::new(vec![Value::Text("{\"kind\":\"login\"}".into())])],
        )
        .unwrap();
        let events: Vec<Event> = rs.as_type().unwrap();
        assert_eq!(events[0].payload["kind"], "login");
    }

    #[test]
    fn test_invalid_json_column_is_data_error() {
        let mut column = ColumnInfo::named("payload");
        column.decl_type = Some("json".into());
        let rs = ResultSet::new(
            vec![column],
            vec![Row::new(vec![Value::Text("{not json".into())])],
        )
        .unwrap();
        let err = rs.as_type::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, SqlSpecError::Data(_)));
    }

    #[test]
    fn test_one_as() {
        let rs = ResultSet::new(
            vec![
                ColumnInfo::named("id"),
                ColumnInfo::named("name"),
                ColumnInfo::named("email"),
            ],
            vec![Row::new(vec![
                Value::Int(3),
                Value::Text("C".into()),
                Value::Null,
            ])],
        )
        .unwrap();
        let user: User = rs.one_as().unwrap();
        assert_eq!(user.id, 3);
    }
}
