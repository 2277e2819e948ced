//! Plan resolution - binds a `QueryIntent` to the schema.
//!
//! Every column reference is checked to exist and every predicate literal is
//! converted to the type of its column. A plan that resolves is safe to hand to
//! the executor.

use crate::error::{QueryError, Result};
use crate::intent::{Aggregation, ChartKind, Literal, Operator, Predicate, QueryIntent, QueryKind};
use crate::schema::{
    normalize_column_name, parse_datetime_str, parse_numeric_str, ColumnType, TableSchema,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

/// Predicate literal converted to the column's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BoundValue {
    Number(f64),
    DateTime(NaiveDateTime),
    Text(String),
    Set(Vec<BoundValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundPredicate {
    pub column: String,
    pub column_type: ColumnType,
    pub operator: Operator,
    pub value: BoundValue,
    /// The predicate as it was requested, for explanations.
    pub source: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub kind: QueryKind,
    pub targets: Vec<String>,
    pub filters: Vec<BoundPredicate>,
    pub group_by: Option<String>,
    pub aggregation: Option<Aggregation>,
    pub requested_chart: Option<ChartKind>,
}

impl QueryPlan {
    pub fn resolve(intent: &QueryIntent, schema: &TableSchema) -> Result<Self> {
        let mut targets: Vec<String> = Vec::new();
        for reference in &intent.target_columns {
            let name = resolve_column(reference, schema)?;
            if !targets.contains(&name) {
                targets.push(name);
            }
        }

        let mut group_by = intent
            .group_by
            .as_deref()
            .map(|g| resolve_column(g, schema))
            .transpose()?;
        if let Some(group) = &group_by {
            targets.retain(|t| t != group);
        }

        // Plotting a lone category column charts how many rows hold each value.
        let mut aggregation = intent.aggregation;
        let counts_categories = intent.kind == QueryKind::Visualization
            && aggregation.is_none()
            && group_by.is_none()
            && matches!(
                targets.as_slice(),
                [only] if schema.column_type(only).map_or(false, |t| t.is_categorical_like())
            );
        if counts_categories {
            group_by = targets.pop();
            aggregation = Some(Aggregation::Count);
        }

        let filters = intent
            .filters
            .iter()
            .map(|p| bind_predicate(p, schema))
            .collect::<Result<Vec<_>>>()?;

        if intent.kind != QueryKind::Correlation
            && targets.is_empty()
            && group_by.is_none()
            && filters.is_empty()
        {
            return Err(QueryError::UnrecognizedQuery(
                "the question does not mention any column of the table".to_string(),
            ));
        }

        if let Some(op) = aggregation {
            if op != Aggregation::Count && targets.is_empty() {
                return Err(QueryError::UnrecognizedQuery(format!(
                    "no column to compute the {} of",
                    op.label()
                )));
            }
        }

        debug!(
            "Resolved plan: kind={} targets={:?} group_by={:?} filters={}",
            intent.kind,
            targets,
            group_by,
            filters.len()
        );

        Ok(Self {
            kind: intent.kind,
            targets,
            filters,
            group_by,
            aggregation,
            requested_chart: intent.requested_chart,
        })
    }
}

/// Accept an exact normalized name, or anything that normalizes to one.
fn resolve_column(reference: &str, schema: &TableSchema) -> Result<String> {
    if schema.column(reference).is_some() {
        return Ok(reference.to_string());
    }
    let normalized = normalize_column_name(reference);
    if schema.column(&normalized).is_some() {
        return Ok(normalized);
    }
    Err(QueryError::ColumnNotFound(reference.to_string()))
}

fn bind_predicate(predicate: &Predicate, schema: &TableSchema) -> Result<BoundPredicate> {
    let column = resolve_column(&predicate.column, schema)?;
    let column_type = schema
        .column_type(&column)
        .ok_or_else(|| QueryError::ColumnNotFound(column.clone()))?;

    let invalid = |reason: String| QueryError::InvalidPredicate {
        column: column.clone(),
        reason,
    };

    if predicate.operator.is_ordering()
        && !matches!(column_type, ColumnType::Numeric | ColumnType::Datetime)
    {
        return Err(invalid(format!(
            "'{}' comparisons need a numeric or date column, but this is a {} column",
            predicate.operator.symbol(),
            column_type
        )));
    }

    let value = match (&predicate.operator, &predicate.value) {
        (Operator::In, Literal::List(items)) => {
            if items.is_empty() {
                return Err(invalid("the value list is empty".to_string()));
            }
            let bound = items
                .iter()
                .map(|item| bind_literal(item, column_type).map_err(&invalid))
                .collect::<Result<Vec<_>>>()?;
            BoundValue::Set(bound)
        }
        (Operator::In, single) => {
            BoundValue::Set(vec![bind_literal(single, column_type).map_err(&invalid)?])
        }
        (_, Literal::List(_)) => {
            return Err(invalid(format!(
                "a list of values needs the 'in' operator, not '{}'",
                predicate.operator.symbol()
            )));
        }
        (_, literal) => bind_literal(literal, column_type).map_err(&invalid)?,
    };

    Ok(BoundPredicate {
        column,
        column_type,
        operator: predicate.operator,
        value,
        source: predicate.clone(),
    })
}

fn bind_literal(literal: &Literal, column_type: ColumnType) -> std::result::Result<BoundValue, String> {
    match (column_type, literal) {
        (_, Literal::List(_)) => Err("nested value lists are not supported".to_string()),
        (ColumnType::Numeric, Literal::Number(n)) => Ok(BoundValue::Number(*n)),
        (ColumnType::Numeric, Literal::Text(s)) => parse_numeric_str(s)
            .map(BoundValue::Number)
            .ok_or_else(|| format!("'{}' is not a number", s)),
        (ColumnType::Datetime, Literal::Text(s)) => parse_datetime_str(s)
            .map(BoundValue::DateTime)
            .ok_or_else(|| format!("'{}' is not a recognized date", s)),
        (ColumnType::Datetime, Literal::Number(n)) => {
            Err(format!("{} is a number, but the column holds dates", n))
        }
        (_, Literal::Text(s)) => Ok(BoundValue::Text(s.trim().to_string())),
        (_, Literal::Number(_)) => Ok(BoundValue::Text(literal.to_string())),
    }
}
