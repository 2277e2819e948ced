//! Query Executor - runs a resolved plan against the in-memory dataset
//!
//! Order of operations: filter (conjunction) -> group -> aggregate, or
//! filter -> correlate for correlation queries. Execution never mutates the
//! dataset.

use crate::dataset::{Dataset, Value};
use crate::error::{QueryError, Result};
use crate::intent::{Aggregation, Operator, Predicate, QueryKind};
use crate::plan::{BoundPredicate, BoundValue, QueryPlan};
use crate::schema::{ColumnSchema, ColumnType};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Label of the group formed by rows whose group value is missing.
pub const UNSPECIFIED_GROUP: &str = "unspecified";

const EQ_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultData {
    Scalar {
        value: Value,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    CorrelationMatrix {
        columns: Vec<String>,
        /// `None` where a pair has fewer than two paired observations or a
        /// constant column.
        values: Vec<Vec<Option<f64>>>,
    },
}

/// What was computed, kept for the explanation text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMeta {
    pub kind: QueryKind,
    pub aggregation: Option<Aggregation>,
    pub targets: Vec<String>,
    pub group_by: Option<String>,
    pub filters: Vec<Predicate>,
    pub rows_matched: usize,
    pub rows_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub data: ResultData,
    pub meta: ResultMeta,
}

impl QueryResult {
    pub fn as_scalar(&self) -> Option<&Value> {
        match &self.data {
            ResultData::Scalar { value } => Some(value),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match &self.data {
            ResultData::Scalar { .. } => 1,
            ResultData::Table { rows, .. } => rows.len(),
            ResultData::CorrelationMatrix { columns, .. } => columns.len(),
        }
    }
}

pub struct QueryExecutor<'a> {
    dataset: &'a Dataset,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    pub fn execute(&self, plan: &QueryPlan) -> Result<QueryResult> {
        let rows = self.matching_rows(&plan.filters)?;
        debug!(
            "Filters kept {} of {} rows",
            rows.len(),
            self.dataset.row_count()
        );

        let meta = ResultMeta {
            kind: plan.kind,
            aggregation: plan.aggregation,
            targets: plan.targets.clone(),
            group_by: plan.group_by.clone(),
            filters: plan.filters.iter().map(|f| f.source.clone()).collect(),
            rows_matched: rows.len(),
            rows_total: self.dataset.row_count(),
        };

        let data = if plan.kind == QueryKind::Correlation {
            self.correlate(&plan.targets, &rows)?
        } else if let Some(group) = &plan.group_by {
            let op = plan.aggregation.unwrap_or(Aggregation::Count);
            self.grouped(group, op, &plan.targets, &rows)?
        } else if let Some(op) = plan.aggregation {
            self.ungrouped(op, &plan.targets, &rows)?
        } else if plan.kind == QueryKind::Summary && !plan.targets.is_empty() {
            self.describe(&plan.targets, &rows)?
        } else {
            self.project(&plan.targets, &rows)?
        };

        Ok(QueryResult { data, meta })
    }

    fn column(&self, name: &str) -> Result<(&ColumnSchema, &[Value])> {
        let schema = self
            .dataset
            .schema()
            .column(name)
            .ok_or_else(|| QueryError::InternalExecution(format!("plan references missing column '{}'", name)))?;
        let values = self
            .dataset
            .column_values(name)
            .ok_or_else(|| QueryError::InternalExecution(format!("no values bound for column '{}'", name)))?;
        Ok((schema, values))
    }

    /// Row indices satisfying every predicate. A null never satisfies a
    /// predicate.
    fn matching_rows(&self, filters: &[BoundPredicate]) -> Result<Vec<usize>> {
        let mut columns = Vec::with_capacity(filters.len());
        for predicate in filters {
            columns.push(self.column(&predicate.column)?.1);
        }
        Ok((0..self.dataset.row_count())
            .filter(|&row| {
                filters
                    .iter()
                    .zip(&columns)
                    .all(|(predicate, values)| satisfies(&values[row], predicate.operator, &predicate.value))
            })
            .collect())
    }

    fn grouped(&self, group: &str, op: Aggregation, targets: &[String], rows: &[usize]) -> Result<ResultData> {
        let (_, group_values) = self.column(group)?;

        // The null group is keyed `None` and only labelled on output.
        let mut groups: Vec<(Value, Vec<usize>)> = Vec::new();
        let mut index: HashMap<Option<String>, usize> = HashMap::new();
        for &row in rows {
            let value = &group_values[row];
            let slot = *index.entry(value.group_key()).or_insert_with(|| {
                groups.push((group_label(value), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row);
        }

        let measured: Vec<Option<&String>> = if targets.is_empty() {
            vec![None]
        } else {
            targets.iter().map(Some).collect()
        };
        for target in measured.iter().flatten() {
            self.check_compatible(op, target)?;
        }

        let mut columns = vec![group.to_string()];
        columns.extend(measured.iter().map(|t| result_column_name(op, t.map(|s| s.as_str()))));

        let mut table = Vec::with_capacity(groups.len());
        for (label, group_rows) in groups {
            let mut row = vec![label];
            for target in &measured {
                row.push(self.aggregate(op, target.map(|s| s.as_str()), &group_rows)?);
            }
            table.push(row);
        }

        Ok(ResultData::Table { columns, rows: table })
    }

    fn ungrouped(&self, op: Aggregation, targets: &[String], rows: &[usize]) -> Result<ResultData> {
        match targets {
            [] => Ok(ResultData::Scalar {
                value: self.aggregate(op, None, rows)?,
            }),
            [only] => {
                self.check_compatible(op, only)?;
                Ok(ResultData::Scalar {
                    value: self.aggregate(op, Some(only.as_str()), rows)?,
                })
            }
            many => {
                for target in many {
                    self.check_compatible(op, target)?;
                }
                let table = many
                    .iter()
                    .map(|target| -> Result<Vec<Value>> {
                        Ok(vec![
                            Value::Text(target.clone()),
                            self.aggregate(op, Some(target.as_str()), rows)?,
                        ])
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResultData::Table {
                    columns: vec!["column".to_string(), op.as_str().to_string()],
                    rows: table,
                })
            }
        }
    }

    /// Reject an operation the column's type cannot support, regardless of
    /// whether any rows survived the filters.
    fn check_compatible(&self, op: Aggregation, target: &str) -> Result<()> {
        let (column, _) = self.column(target)?;
        let supported = match op {
            Aggregation::Count | Aggregation::DistinctCount => true,
            Aggregation::Sum | Aggregation::Mean => column.inferred_type == ColumnType::Numeric,
            Aggregation::Min | Aggregation::Max => {
                matches!(column.inferred_type, ColumnType::Numeric | ColumnType::Datetime)
            }
        };
        if supported {
            Ok(())
        } else {
            Err(QueryError::UnsupportedAggregation {
                op: op.label().to_string(),
                column: column.original_name.clone(),
                column_type: column.inferred_type.to_string(),
            })
        }
    }

    /// Aggregate over the given rows. `count` counts rows, nulls included;
    /// every other operation skips nulls and yields `Null` when nothing is
    /// left.
    fn aggregate(&self, op: Aggregation, target: Option<&str>, rows: &[usize]) -> Result<Value> {
        if op == Aggregation::Count {
            return Ok(Value::Number(rows.len() as f64));
        }
        let target = target.ok_or_else(|| {
            QueryError::InternalExecution(format!("{} requires a target column", op))
        })?;
        let (_, values) = self.column(target)?;
        let present = rows.iter().map(|&r| &values[r]).filter(|v| !v.is_null());

        let value = match op {
            Aggregation::Count => Value::Number(rows.len() as f64),
            Aggregation::DistinctCount => {
                Value::Number(present.filter_map(|v| v.group_key()).unique().count() as f64)
            }
            Aggregation::Sum | Aggregation::Mean => {
                let numbers: Vec<f64> = present.filter_map(|v| v.as_number()).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    let total: f64 = numbers.iter().sum();
                    if op == Aggregation::Sum {
                        Value::Number(total)
                    } else {
                        Value::Number(total / numbers.len() as f64)
                    }
                }
            }
            Aggregation::Min | Aggregation::Max => {
                let present: Vec<&Value> = present.collect();
                extreme(&present, op == Aggregation::Max)
            }
        };
        Ok(value)
    }

    fn correlate(&self, targets: &[String], rows: &[usize]) -> Result<ResultData> {
        let numeric_targets: Vec<String> = targets
            .iter()
            .filter(|t| self.dataset.schema().column_type(t) == Some(ColumnType::Numeric))
            .cloned()
            .collect();
        let columns: Vec<String> = if numeric_targets.len() >= 2 {
            numeric_targets
        } else {
            self.dataset
                .schema()
                .columns_of_type(ColumnType::Numeric)
                .iter()
                .map(|c| c.normalized_name.clone())
                .collect()
        };
        if columns.len() < 2 {
            return Err(QueryError::UnrecognizedQuery(
                "correlation needs at least two numeric columns".to_string(),
            ));
        }

        let series = columns
            .iter()
            .map(|c| self.column(c).map(|(_, values)| values))
            .collect::<Result<Vec<_>>>()?;
        let values = series
            .iter()
            .map(|xs| series.iter().map(|ys| pearson(xs, ys, rows)).collect())
            .collect();

        Ok(ResultData::CorrelationMatrix { columns, values })
    }

    /// Per-column descriptive statistics over the matched rows.
    fn describe(&self, targets: &[String], rows: &[usize]) -> Result<ResultData> {
        let columns = [
            "column",
            "type",
            "count",
            "nulls",
            "unique",
            "mean",
            "min",
            "max",
            "std",
            "most_common",
            "most_common_count",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        let mut table = Vec::with_capacity(targets.len());
        for target in targets {
            let (column, values) = self.column(target)?;
            let present: Vec<&Value> = rows.iter().map(|&r| &values[r]).filter(|v| !v.is_null()).collect();
            let nulls = rows.len() - present.len();
            let unique = present.iter().filter_map(|v| v.group_key()).unique().count();

            let mut row = vec![
                Value::Text(column.original_name.clone()),
                Value::Text(column.inferred_type.to_string()),
                Value::Number(present.len() as f64),
                Value::Number(nulls as f64),
                Value::Number(unique as f64),
            ];

            let (mean, std) = match column.inferred_type {
                ColumnType::Numeric => {
                    let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_number()).collect();
                    mean_and_std(&numbers)
                }
                _ => (Value::Null, Value::Null),
            };
            let (min, max) = match column.inferred_type {
                ColumnType::Numeric | ColumnType::Datetime => (extreme(&present, false), extreme(&present, true)),
                _ => (Value::Null, Value::Null),
            };
            let (common, common_count) = match column.inferred_type {
                ColumnType::Categorical | ColumnType::Binary => most_common(&present),
                _ => (Value::Null, Value::Null),
            };

            row.extend([mean, min, max, std, common, common_count]);
            table.push(row);
        }

        Ok(ResultData::Table { columns, rows: table })
    }

    /// Matched rows restricted to the target columns, or all columns when
    /// there are none.
    fn project(&self, targets: &[String], rows: &[usize]) -> Result<ResultData> {
        let columns: Vec<String> = if targets.is_empty() {
            self.dataset
                .schema()
                .columns
                .iter()
                .map(|c| c.normalized_name.clone())
                .collect()
        } else {
            targets.to_vec()
        };
        let series = columns
            .iter()
            .map(|c| self.column(c).map(|(_, values)| values))
            .collect::<Result<Vec<_>>>()?;
        let table = rows
            .iter()
            .map(|&r| series.iter().map(|values| values[r].clone()).collect())
            .collect();
        Ok(ResultData::Table { columns, rows: table })
    }
}

fn group_label(value: &Value) -> Value {
    match value {
        Value::Null => Value::Text(UNSPECIFIED_GROUP.to_string()),
        other => other.clone(),
    }
}

fn result_column_name(op: Aggregation, target: Option<&str>) -> String {
    match target {
        Some(t) => format!("{}_{}", op.as_str(), t),
        None => op.as_str().to_string(),
    }
}

fn satisfies(value: &Value, operator: Operator, literal: &BoundValue) -> bool {
    if value.is_null() {
        return false;
    }
    match (literal, operator) {
        (BoundValue::Set(items), _) => items.iter().any(|item| satisfies(value, Operator::Eq, item)),
        (BoundValue::Number(n), op) => match value.as_number() {
            Some(v) => compare(v.partial_cmp(n), op, (v - n).abs() <= EQ_TOLERANCE),
            None => false,
        },
        (BoundValue::DateTime(d), op) => match value {
            Value::DateTime(v) => compare(Some(v.cmp(d)), op, v == d),
            _ => false,
        },
        (BoundValue::Text(t), Operator::Eq | Operator::In) => {
            value.to_string().trim().eq_ignore_ascii_case(t.trim())
        }
        (BoundValue::Text(_), _) => false,
    }
}

fn compare(ordering: Option<std::cmp::Ordering>, op: Operator, equal: bool) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Operator::Eq | Operator::In => equal,
        Operator::Lt => ordering == Some(Less) && !equal,
        Operator::Gt => ordering == Some(Greater) && !equal,
        Operator::Lte => ordering == Some(Less) || equal,
        Operator::Gte => ordering == Some(Greater) || equal,
    }
}

fn extreme(values: &[&Value], largest: bool) -> Value {
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
    if !numbers.is_empty() {
        let pick = if largest { f64::max } else { f64::min };
        let start = if largest { f64::NEG_INFINITY } else { f64::INFINITY };
        return Value::Number(numbers.into_iter().fold(start, pick));
    }
    let dates = values.iter().filter_map(|v| match v {
        Value::DateTime(d) => Some(*d),
        _ => None,
    });
    let found = if largest { dates.max() } else { dates.min() };
    found.map(Value::DateTime).unwrap_or(Value::Null)
}

fn mean_and_std(numbers: &[f64]) -> (Value, Value) {
    if numbers.is_empty() {
        return (Value::Null, Value::Null);
    }
    let n = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / n;
    let std = if numbers.len() > 1 {
        let var = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Value::Number(var.sqrt())
    } else {
        Value::Null
    };
    (Value::Number(mean), std)
}

/// Most frequent value and its count; ties go to the first seen.
fn most_common(values: &[&Value]) -> (Value, Value) {
    let counts = values.iter().filter_map(|v| v.group_key()).counts();
    let mut best: Option<(&Value, usize)> = None;
    for value in values {
        let count = value.group_key().and_then(|k| counts.get(&k).copied()).unwrap_or(0);
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((*value, count));
        }
    }
    match best {
        Some((value, count)) => (value.clone(), Value::Number(count as f64)),
        None => (Value::Null, Value::Null),
    }
}

/// Pearson correlation over the rows where both values are present.
/// `None` with fewer than two such rows or when either side is constant.
pub fn pearson(xs: &[Value], ys: &[Value], rows: &[usize]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = rows
        .iter()
        .filter_map(|&r| Some((xs[r].as_number()?, ys[r].as_number()?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let (x0, y0) = pairs[0];
    if pairs.iter().all(|(x, _)| *x == x0) || pairs.iter().all(|(_, y)| *y == y0) {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}
