//! File intake: CSV and JSON files to `RawTable`.

use crate::error::{QueryError, Result};
use crate::table::{CellValue, RawTable};
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// Load a table, choosing the reader by file extension.
pub fn load_path(path: &Path) -> Result<RawTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    let table = match extension.as_deref() {
        Some("csv") => load_csv(path)?,
        Some("json") => load_json(path)?,
        other => {
            return Err(QueryError::Ingest(format!(
                "unsupported file type '{}' for {}; expected .csv or .json",
                other.unwrap_or(""),
                path.display()
            )))
        }
    };
    info!(
        "Loaded {} ({} rows, {} columns)",
        path.display(),
        table.row_count(),
        table.column_count()
    );
    Ok(table)
}

pub fn load_csv(path: &Path) -> Result<RawTable> {
    let df = LazyCsvReader::new(path)
        .with_infer_schema_length(Some(1000))
        .finish()?
        .collect()?;
    dataframe_to_table(&df)
}

/// A JSON array of row objects.
pub fn load_json(path: &Path) -> Result<RawTable> {
    let content = std::fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&content)?;
    let records = parsed
        .as_array()
        .ok_or_else(|| QueryError::Ingest("expected a JSON array of row objects".to_string()))?;
    RawTable::from_json_rows(records)
}

fn dataframe_to_table(df: &DataFrame) -> Result<RawTable> {
    let headers: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let columns = df.get_columns();

    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = Vec::with_capacity(columns.len());
        for series in columns {
            row.push(cell_from_any(series.get(row_idx)?));
        }
        rows.push(row);
    }
    RawTable::new(headers, rows)
}

fn cell_from_any(value: AnyValue) -> CellValue {
    match value {
        AnyValue::Null => CellValue::Null,
        AnyValue::Boolean(b) => CellValue::Bool(b),
        AnyValue::String(s) => CellValue::Text(s.to_string()),
        AnyValue::StringOwned(s) => CellValue::Text(s.to_string()),
        AnyValue::Int8(i) => CellValue::Int(i.into()),
        AnyValue::Int16(i) => CellValue::Int(i.into()),
        AnyValue::Int32(i) => CellValue::Int(i.into()),
        AnyValue::Int64(i) => CellValue::Int(i),
        AnyValue::UInt8(u) => CellValue::Int(u.into()),
        AnyValue::UInt16(u) => CellValue::Int(u.into()),
        AnyValue::UInt32(u) => CellValue::Int(u.into()),
        AnyValue::UInt64(u) => match i64::try_from(u) {
            Ok(i) => CellValue::Int(i),
            Err(_) => CellValue::Float(u as f64),
        },
        AnyValue::Float32(f) => CellValue::Float(f.into()),
        AnyValue::Float64(f) => CellValue::Float(f),
        other => CellValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(extension: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("datachat-{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_csv_types_cells() {
        let path = temp_file("csv", "Age,Dept,Remote\n25,IT,true\n35,HR,false\n,IT,true\n");
        let table = load_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.headers(), &["Age", "Dept", "Remote"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows()[0][0], CellValue::Int(25));
        assert_eq!(table.rows()[1][1], CellValue::Text("HR".to_string()));
        assert_eq!(table.rows()[1][2], CellValue::Bool(false));
        assert!(table.rows()[2][0].is_null());
    }

    #[test]
    fn test_load_json_rows() {
        let path = temp_file("json", r#"[{"age": 25, "dept": "IT"}, {"dept": "HR", "age": 35.5}]"#);
        let table = load_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.headers(), &["age", "dept"]);
        assert_eq!(table.rows()[1][0], CellValue::Float(35.5));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let err = load_path(Path::new("report.xlsx")).unwrap_err();
        assert!(matches!(err, QueryError::Ingest(_)));

        let path = temp_file("json", r#"{"age": 25}"#);
        assert!(matches!(load_path(&path), Err(QueryError::Ingest(_))));
        std::fs::remove_file(&path).ok();
    }
}
