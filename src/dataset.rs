//! Typed, column-major view of a raw table bound to its inferred schema.

use crate::error::{QueryError, Result};
use crate::schema::{parse_datetime, parse_numeric, ColumnType, TableSchema};
use crate::table::RawTable;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed cell value used during execution and in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Key used for grouping and distinct counting. Text compares
    /// case-sensitively, as stored. Numbers keep their full precision, so
    /// two values that only differ past the displayed digits stay apart.
    pub fn group_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            // -0.0 and 0.0 are the same group
            Value::Number(n) if *n == 0.0 => Some("0".to_string()),
            Value::Number(n) => Some(format!("{:?}", n)),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", (n * 1e4).round() / 1e4)
                }
            }
            Value::DateTime(dt) => {
                if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 {
                    write!(f, "{}", dt.date())
                } else {
                    write!(f, "{}", dt)
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    schema: TableSchema,
    columns: Vec<Vec<Value>>,
}

impl Dataset {
    /// Convert every raw cell to the typed value of its inferred column type.
    pub fn bind(table: &RawTable, schema: &TableSchema) -> Result<Self> {
        if table.column_count() != schema.columns.len() {
            return Err(QueryError::InternalExecution(format!(
                "schema describes {} columns but the table has {}",
                schema.columns.len(),
                table.column_count()
            )));
        }

        let mut columns = Vec::with_capacity(schema.columns.len());
        for (idx, column) in schema.columns.iter().enumerate() {
            let mut values = Vec::with_capacity(table.row_count());
            for cell in table.column(idx) {
                if cell.is_null() {
                    values.push(Value::Null);
                    continue;
                }
                let value = match column.inferred_type {
                    ColumnType::Numeric => parse_numeric(cell).map(Value::Number),
                    ColumnType::Datetime => parse_datetime(cell).map(Value::DateTime),
                    ColumnType::Categorical | ColumnType::Binary | ColumnType::Text => {
                        Some(Value::Text(cell.to_string()))
                    }
                };
                let value = value.ok_or_else(|| {
                    QueryError::InternalExecution(format!(
                        "value '{}' in column '{}' is not {}",
                        cell, column.normalized_name, column.inferred_type
                    ))
                })?;
                values.push(value);
            }
            columns.push(values);
        }

        Ok(Self { schema: schema.clone(), columns })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.schema.row_count
    }

    pub fn column_values(&self, normalized_name: &str) -> Option<&[Value]> {
        self.schema
            .index_of(normalized_name)
            .and_then(|idx| self.columns.get(idx))
            .map(|v| v.as_slice())
    }

    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[idx].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferencer;
    use serde_json::json;

    #[test]
    fn test_bind_converts_by_type() {
        let raw = RawTable::from_json_rows(&[
            json!({"amount": "1,500", "day": "2024-01-02", "dept": " IT "}),
            json!({"amount": null, "day": "2024-01-03", "dept": "HR"}),
        ])
        .unwrap();
        let schema = SchemaInferencer::default().infer(&raw).unwrap();
        let dataset = Dataset::bind(&raw, &schema).unwrap();

        assert_eq!(
            dataset.column_values("amount").unwrap(),
            &[Value::Number(1500.0), Value::Null]
        );
        assert_eq!(dataset.column_values("dept").unwrap()[0], Value::Text("IT".to_string()));
        assert!(matches!(dataset.column_values("day").unwrap()[1], Value::DateTime(_)));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(35.0).to_string(), "35");
        assert_eq!(Value::Number(2.0 / 3.0).to_string(), "0.6667");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
