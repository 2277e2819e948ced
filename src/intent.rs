//! Query intent - the classified purpose and parameters of a question before
//! it is bound to the schema.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Summary,
    Filter,
    Comparison,
    Visualization,
    Correlation,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Summary => "summary",
            QueryKind::Filter => "filter",
            QueryKind::Comparison => "comparison",
            QueryKind::Visualization => "visualization",
            QueryKind::Correlation => "correlation",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    DistinctCount,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::DistinctCount => "distinct_count",
        }
    }

    /// Human wording used in explanations.
    pub fn label(&self) -> &'static str {
        match self {
            Aggregation::Count => "number of rows",
            Aggregation::Sum => "total",
            Aggregation::Mean => "average",
            Aggregation::Min => "minimum",
            Aggregation::Max => "maximum",
            Aggregation::DistinctCount => "number of distinct values",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
    In,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Lte => "<=",
            Operator::Gte => ">=",
            Operator::In => "in",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte)
    }
}

/// Literal on the right-hand side of a predicate, before it is checked
/// against the column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Text(String),
    List(Vec<Literal>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Literal::Text(s) => f.write_str(s),
            Literal::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: Literal,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator.symbol(), self.value)
    }
}

/// Chart shapes the selector may choose, also used for explicit requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Histogram,
    Bar,
    GroupedBar,
    Scatter,
    Line,
    Heatmap,
    Pie,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Histogram => "histogram",
            ChartKind::Bar => "bar",
            ChartKind::GroupedBar => "grouped bar",
            ChartKind::Scatter => "scatter",
            ChartKind::Line => "line",
            ChartKind::Heatmap => "heatmap",
            ChartKind::Pie => "pie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub kind: QueryKind,
    /// Normalized column names in the order they were mentioned.
    #[serde(default)]
    pub target_columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Predicate>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    /// Chart shape named explicitly in the question, if any.
    #[serde(default)]
    pub requested_chart: Option<ChartKind>,
}

impl QueryIntent {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            target_columns: Vec::new(),
            filters: Vec::new(),
            group_by: None,
            aggregation: None,
            requested_chart: None,
        }
    }

    /// Every column the intent refers to, targets first, without duplicates.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        let all = self
            .target_columns
            .iter()
            .map(|c| c.as_str())
            .chain(self.group_by.iter().map(|c| c.as_str()))
            .chain(self.filters.iter().map(|p| p.column.as_str()));
        for column in all {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }
}

/// Where an intent came from, carried through to the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IntentSource {
    Model,
    Rules,
    Fallback { reason: String },
}

impl IntentSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, IntentSource::Fallback { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub intent: QueryIntent,
    pub source: IntentSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_deserializes_with_defaults() {
        let intent: QueryIntent = serde_json::from_str(
            r#"{"kind": "comparison", "target_columns": ["age"], "group_by": "dept", "aggregation": "mean"}"#,
        )
        .unwrap();
        assert_eq!(intent.kind, QueryKind::Comparison);
        assert_eq!(intent.aggregation, Some(Aggregation::Mean));
        assert!(intent.filters.is_empty());
        assert_eq!(intent.requested_chart, None);
    }

    #[test]
    fn test_predicate_literals() {
        let predicate: Predicate = serde_json::from_str(
            r#"{"column": "dept", "operator": "in", "value": ["IT", "HR"]}"#,
        )
        .unwrap();
        assert_eq!(predicate.operator, Operator::In);
        assert_eq!(predicate.to_string(), "dept in (IT, HR)");
    }

    #[test]
    fn test_referenced_columns_are_unique() {
        let mut intent = QueryIntent::new(QueryKind::Comparison);
        intent.target_columns = vec!["age".to_string()];
        intent.group_by = Some("dept".to_string());
        intent.filters.push(Predicate {
            column: "age".to_string(),
            operator: Operator::Lt,
            value: Literal::Number(30.0),
        });
        assert_eq!(intent.referenced_columns(), vec!["age", "dept"]);
    }
}
