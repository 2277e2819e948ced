//! Schema Inferencer - column naming, semantic types and summary statistics
//!
//! Type inference runs over the non-null values of each column and stops at the
//! first rule that matches:
//! 1. binary      - at most two distinct case-folded values from a known token pair
//! 2. numeric     - every value parses as a number (thousands separators, trailing %)
//! 3. datetime    - every value parses under one of the supported date formats
//! 4. categorical - distinct values within the cardinality threshold
//! 5. text        - anything else
//!
//! The raw table is only read; inference produces a new `TableSchema`.

use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::table::{CellValue, RawTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

lazy_static! {
    static ref NON_ALNUM_RUN: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
    static ref GROUPED_NUMBER: Regex = Regex::new(r"^[-+]?\d{1,3}(,\d{3})+(\.\d+)?$").unwrap();
}

const BINARY_PAIRS: &[(&str, &str)] = &[
    ("yes", "no"),
    ("y", "n"),
    ("true", "false"),
    ("t", "f"),
    ("1", "0"),
    ("1.0", "0.0"),
    ("male", "female"),
    ("m", "f"),
    ("active", "inactive"),
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Binary,
    Datetime,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Binary => "binary",
            ColumnType::Datetime => "datetime",
            ColumnType::Text => "text",
        }
    }

    /// Categorical and binary columns both hold a small closed set of labels.
    pub fn is_categorical_like(&self) -> bool {
        matches!(self, ColumnType::Categorical | ColumnType::Binary)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryStats {
    Numeric {
        min: f64,
        max: f64,
        mean: f64,
        /// Sample standard deviation; absent with fewer than two values.
        std: Option<f64>,
    },
    Frequencies {
        top: Vec<ValueCount>,
    },
    Datetime {
        min: NaiveDateTime,
        max: NaiveDateTime,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub original_name: String,
    pub normalized_name: String,
    pub inferred_type: ColumnType,
    pub null_count: usize,
    pub distinct_count: usize,
    pub summary_stats: SummaryStats,
    /// Every distinct label in first-seen order (categorical and binary only).
    pub categories: Vec<String>,
    /// A few distinct example values, used when describing the table to a model.
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    pub row_count: usize,
}

impl TableSchema {
    pub fn column(&self, normalized_name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.normalized_name == normalized_name)
    }

    pub fn index_of(&self, normalized_name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.normalized_name == normalized_name)
    }

    pub fn column_type(&self, normalized_name: &str) -> Option<ColumnType> {
        self.column(normalized_name).map(|c| c.inferred_type)
    }

    pub fn columns_of_type(&self, column_type: ColumnType) -> Vec<&ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| c.inferred_type == column_type)
            .collect()
    }

    /// Display header for a normalized name, falling back to the name itself.
    pub fn display_name<'a>(&'a self, normalized_name: &'a str) -> &'a str {
        self.column(normalized_name)
            .map(|c| c.original_name.as_str())
            .unwrap_or(normalized_name)
    }
}

/// Canonical column identifier: lowercase, runs of anything other than ASCII
/// letters and digits collapsed to one underscore, underscores trimmed.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let collapsed = NON_ALNUM_RUN.replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed_column".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize every header, resolving collisions with a numeric suffix in
/// first-seen order (`name`, `name_2`, `name_3`, ...).
pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut normalized = Vec::with_capacity(headers.len());

    for header in headers {
        let base = normalize_column_name(header);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        taken.insert(candidate.clone());
        normalized.push(candidate);
    }

    normalized
}

/// Parse a cell as a number. Thousands separators are accepted in grouped
/// form only; a trailing percent sign divides by 100.
pub fn parse_numeric(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Int(i) => Some(*i as f64),
        CellValue::Float(f) if f.is_finite() => Some(*f),
        CellValue::Text(s) => parse_numeric_str(s),
        _ => None,
    }
}

pub fn parse_numeric_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (body, is_percent) = match trimmed.strip_suffix('%') {
        Some(rest) => (rest.trim_end(), true),
        None => (trimmed, false),
    };
    if body.is_empty() {
        return None;
    }

    let cleaned = if body.contains(',') {
        if !GROUPED_NUMBER.is_match(body) {
            return None;
        }
        body.replace(',', "")
    } else {
        body.to_string()
    };

    // f64::from_str also accepts "inf" and "nan"
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let value = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if is_percent { value / 100.0 } else { value })
}

/// Parse a text cell under the supported date and date-time formats.
pub fn parse_datetime(cell: &CellValue) -> Option<NaiveDateTime> {
    match cell {
        CellValue::Text(s) => parse_datetime_str(s),
        _ => None,
    }
}

pub fn parse_datetime_str(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Case-folded token used for the binary check.
fn binary_token(cell: &CellValue) -> String {
    match cell {
        CellValue::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string().trim().to_lowercase(),
    }
}

fn is_binary(tokens: &HashSet<String>) -> bool {
    if tokens.is_empty() || tokens.len() > 2 {
        return false;
    }
    BINARY_PAIRS
        .iter()
        .any(|(a, b)| tokens.iter().all(|t| t == a || t == b))
}

pub struct SchemaInferencer {
    max_rows: usize,
    max_columns: usize,
    categorical_threshold: usize,
    top_n: usize,
    sample_values: usize,
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SchemaInferencer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_rows: config.max_rows,
            max_columns: config.max_columns,
            categorical_threshold: config.categorical_threshold,
            top_n: config.top_n,
            sample_values: config.sample_values,
        }
    }

    /// Infer the schema of a raw table.
    ///
    /// Size limits are checked before any other work. An empty table (no rows
    /// or no columns) cannot be described and is rejected.
    pub fn infer(&self, table: &RawTable) -> Result<TableSchema> {
        let rows = table.row_count();
        let columns = table.column_count();

        if rows > self.max_rows || columns > self.max_columns {
            return Err(QueryError::InputTooLarge {
                rows,
                columns,
                max_rows: self.max_rows,
                max_columns: self.max_columns,
            });
        }
        if rows == 0 {
            return Err(QueryError::SchemaInference("the table has no rows".to_string()));
        }
        if columns == 0 {
            return Err(QueryError::SchemaInference("the table has no columns".to_string()));
        }

        let names = normalize_headers(table.headers());
        let columns = table
            .headers()
            .iter()
            .zip(names)
            .enumerate()
            .map(|(idx, (original, normalized))| {
                let cells: Vec<&CellValue> = table.column(idx).collect();
                self.infer_column(original, normalized, &cells)
            })
            .collect();

        Ok(TableSchema { columns, row_count: rows })
    }

    fn infer_column(&self, original: &str, normalized: String, cells: &[&CellValue]) -> ColumnSchema {
        let values: Vec<&CellValue> = cells.iter().copied().filter(|c| !c.is_null()).collect();
        let null_count = cells.len() - values.len();

        // Distinct labels in first-seen order
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut distinct: Vec<String> = Vec::new();
        for value in &values {
            let label = value.to_string();
            let entry = counts.entry(label.clone()).or_insert(0);
            if *entry == 0 {
                distinct.push(label);
            }
            *entry += 1;
        }

        let inferred_type = self.classify(&values, distinct.len());
        debug!("Column '{}' inferred as {}", normalized, inferred_type);

        let summary_stats = match inferred_type {
            ColumnType::Numeric => numeric_stats(&values),
            ColumnType::Datetime => datetime_stats(&values),
            ColumnType::Categorical | ColumnType::Binary => SummaryStats::Frequencies {
                top: top_values(&distinct, &counts, self.top_n),
            },
            ColumnType::Text => SummaryStats::None,
        };

        let categories = if inferred_type.is_categorical_like() {
            distinct.clone()
        } else {
            Vec::new()
        };

        ColumnSchema {
            original_name: original.to_string(),
            normalized_name: normalized,
            inferred_type,
            null_count,
            distinct_count: distinct.len(),
            summary_stats,
            categories,
            sample_values: distinct.into_iter().take(self.sample_values).collect(),
        }
    }

    fn classify(&self, values: &[&CellValue], distinct_count: usize) -> ColumnType {
        if values.is_empty() {
            return ColumnType::Text;
        }

        let tokens: HashSet<String> = values.iter().map(|v| binary_token(v)).collect();
        if is_binary(&tokens) {
            return ColumnType::Binary;
        }
        if values.iter().all(|v| parse_numeric(v).is_some()) {
            return ColumnType::Numeric;
        }
        if values.iter().all(|v| parse_datetime(v).is_some()) {
            return ColumnType::Datetime;
        }
        if distinct_count <= self.categorical_threshold {
            return ColumnType::Categorical;
        }
        ColumnType::Text
    }
}

fn numeric_stats(values: &[&CellValue]) -> SummaryStats {
    let numbers: Vec<f64> = values.iter().filter_map(|v| parse_numeric(v)).collect();
    let n = numbers.len() as f64;
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = numbers.iter().sum::<f64>() / n;
    let std = if numbers.len() > 1 {
        let var = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };
    SummaryStats::Numeric { min, max, mean, std }
}

fn datetime_stats(values: &[&CellValue]) -> SummaryStats {
    let parsed: Vec<NaiveDateTime> = values.iter().filter_map(|v| parse_datetime(v)).collect();
    match (parsed.iter().min(), parsed.iter().max()) {
        (Some(min), Some(max)) => SummaryStats::Datetime { min: *min, max: *max },
        _ => SummaryStats::None,
    }
}

/// Most frequent labels, ties broken by first appearance.
fn top_values(distinct: &[String], counts: &HashMap<String, usize>, top_n: usize) -> Vec<ValueCount> {
    let mut ranked: Vec<ValueCount> = distinct
        .iter()
        .map(|value| ValueCount {
            value: value.clone(),
            count: counts.get(value).copied().unwrap_or(0),
        })
        .collect();
    // stable sort keeps first-seen order among equal counts
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(top_n);
    ranked
}
