//! Column type inference for record batches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    /// Every value is missing.
    Null,
    /// Mixed or nested values.
    Unknown,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Conventional dtype label written into metadata sidecars.
    pub fn dtype_name(self) -> &'static str {
        match self {
            Self::Integer => "int64",
            Self::Float => "float64",
            Self::Boolean => "bool",
            Self::String | Self::Null | Self::Unknown => "object",
        }
    }

    /// SQLite column affinity used when creating tables.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Float => "REAL",
            Self::String | Self::Null | Self::Unknown => "TEXT",
        }
    }
}

/// Schema definition for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub columns: Vec<ColumnSchema>,
}

/// Schema for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// Infer a column type from its values.
///
/// Strings dominate, then floats, then integers, then booleans; nulls are
/// ignored unless nothing else is present.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_string = false;
    let mut has_nested = false;

    for v in values {
        match v {
            Value::Null => {}
            Value::Number(n) => {
                if n.is_f64() {
                    has_float = true;
                } else {
                    has_int = true;
                }
            }
            Value::Bool(_) => has_bool = true,
            Value::String(_) => has_string = true,
            Value::Array(_) | Value::Object(_) => has_nested = true,
        }
    }

    if has_nested {
        return ColumnType::Unknown;
    }
    if has_string {
        return ColumnType::String;
    }
    if has_bool && (has_int || has_float) {
        return ColumnType::Unknown;
    }
    if has_float {
        return ColumnType::Float;
    }
    if has_int {
        return ColumnType::Integer;
    }
    if has_bool {
        return ColumnType::Boolean;
    }
    ColumnType::Null
}

/// Infer a schema from column names and row-major values.
pub fn infer_schema(columns: &[String], rows: &[Vec<Value>]) -> SchemaDefinition {
    let columns = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values = rows.iter().filter_map(|row| row.get(i));
            let dtype = infer_column_type(values);
            let nullable = rows.iter().any(|row| row.get(i).is_none_or(Value::is_null));
            ColumnSchema {
                name: name.clone(),
                dtype,
                nullable,
            }
        })
        .collect();

    SchemaDefinition { columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_column_type_int() {
        let values = [json!(1), json!(2), Value::Null];
        assert_eq!(infer_column_type(&values), ColumnType::Integer);
    }

    #[test]
    fn test_infer_column_type_float_wins_over_int() {
        let values = [json!(1), json!(2.5)];
        assert_eq!(infer_column_type(&values), ColumnType::Float);
    }

    #[test]
    fn test_infer_column_type_string() {
        let values = [json!("e"), json!(3)];
        assert_eq!(infer_column_type(&values), ColumnType::String);
    }

    #[test]
    fn test_infer_column_type_all_null() {
        let values = [Value::Null, Value::Null];
        assert_eq!(infer_column_type(&values), ColumnType::Null);
    }

    #[test]
    fn test_infer_schema() {
        let columns = vec!["class".to_string(), "odor_n".to_string()];
        let rows = vec![
            vec![json!("e"), json!(true)],
            vec![Value::Null, json!(false)],
        ];
        let schema = infer_schema(&columns, &rows);
        assert_eq!(schema.columns[0].dtype, ColumnType::String);
        assert!(schema.columns[0].nullable);
        assert_eq!(schema.columns[1].dtype, ColumnType::Boolean);
        assert!(!schema.columns[1].nullable);
    }

    #[test]
    fn test_dtype_names() {
        assert_eq!(ColumnType::Boolean.dtype_name(), "bool");
        assert_eq!(ColumnType::String.sql_type(), "TEXT");
        assert_eq!(ColumnType::Boolean.sql_type(), "INTEGER");
    }
}
