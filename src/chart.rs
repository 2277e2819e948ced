//! Chart selection
//!
//! A pure decision table from the shape of a query to the chart that renders
//! its result. The same input always yields the same `ChartSpec`.

use crate::error::{QueryError, Result};
use crate::intent::{ChartKind, QueryKind};
use crate::plan::QueryPlan;
use crate::schema::{ColumnType, TableSchema};
use serde::{Deserialize, Serialize};

/// Above this many categories a pie chart is unreadable.
pub const PIE_MAX_CATEGORIES: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: Option<String>,
    pub y: Option<String>,
    pub group_by: Option<String>,
    /// Readability note attached when the requested chart was replaced.
    pub warning: Option<String>,
}

impl ChartSpec {
    fn new(kind: ChartKind, x: Option<&str>, y: Option<&str>) -> Self {
        Self {
            kind,
            x: x.map(str::to_string),
            y: y.map(str::to_string),
            group_by: None,
            warning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub distinct_count: usize,
}

/// Everything the selector looks at: query kind, column types and
/// category cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartInput {
    pub kind: QueryKind,
    pub targets: Vec<ChartColumn>,
    pub group_by: Option<ChartColumn>,
    pub requested: Option<ChartKind>,
}

impl ChartInput {
    pub fn from_plan(plan: &QueryPlan, schema: &TableSchema) -> Self {
        let describe = |name: &str| {
            schema.column(name).map(|c| ChartColumn {
                name: c.normalized_name.clone(),
                column_type: c.inferred_type,
                distinct_count: c.distinct_count,
            })
        };
        Self {
            kind: plan.kind,
            targets: plan.targets.iter().filter_map(|t| describe(t)).collect(),
            group_by: plan.group_by.as_deref().and_then(|g| describe(g)),
            requested: plan.requested_chart,
        }
    }

    fn numeric_targets(&self) -> Vec<&ChartColumn> {
        self.targets
            .iter()
            .filter(|c| c.column_type == ColumnType::Numeric)
            .collect()
    }

    fn single_target(&self, predicate: impl Fn(ColumnType) -> bool) -> Option<&ChartColumn> {
        match self.targets.as_slice() {
            [only] if predicate(only.column_type) => Some(only),
            _ => None,
        }
    }

    /// The categorical column a pie would slice by: the group column, else
    /// the first categorical target.
    fn breakdown(&self) -> Option<&ChartColumn> {
        self.group_by
            .iter()
            .chain(self.targets.iter())
            .find(|c| c.column_type.is_categorical_like())
    }

    fn datetime_column(&self) -> Option<&ChartColumn> {
        self.targets
            .iter()
            .chain(self.group_by.iter())
            .find(|c| c.column_type == ColumnType::Datetime)
    }
}

pub struct ChartSelector;

impl ChartSelector {
    /// Pick a chart for the query, or `ChartNotApplicable` when no shape fits.
    pub fn select(input: &ChartInput) -> Result<ChartSpec> {
        if input.requested == Some(ChartKind::Pie) {
            if let Some(pie) = Self::pie(input) {
                return Ok(pie);
            }
        }

        let numeric = input.numeric_targets();
        let visualization = input.kind == QueryKind::Visualization;

        if visualization && input.group_by.is_none() {
            if let Some(target) = input.single_target(|t| t == ColumnType::Numeric) {
                return Ok(ChartSpec::new(ChartKind::Histogram, Some(&target.name), None));
            }
        }

        if (visualization || input.kind == QueryKind::Summary) && input.group_by.is_none() {
            if let Some(target) = input.single_target(|t| t.is_categorical_like()) {
                return Ok(ChartSpec::new(ChartKind::Bar, Some(&target.name), Some("count")));
            }
        }

        if visualization && input.targets.is_empty() {
            if let Some(group) = input.group_by.as_ref().filter(|g| g.column_type.is_categorical_like()) {
                return Ok(ChartSpec::new(ChartKind::Bar, Some(&group.name), Some("count")));
            }
        }

        if visualization && input.targets.len() == 2 && numeric.len() == 2 {
            return Ok(ChartSpec::new(
                ChartKind::Scatter,
                Some(&numeric[0].name),
                Some(&numeric[1].name),
            ));
        }

        if visualization || input.kind == QueryKind::Comparison {
            if let (Some(group), Some(metric)) = (&input.group_by, numeric.first()) {
                if group.column_type.is_categorical_like() {
                    let mut spec = ChartSpec::new(ChartKind::GroupedBar, Some(&group.name), Some(&metric.name));
                    spec.group_by = Some(group.name.clone());
                    return Ok(spec);
                }
            }
        }

        if visualization {
            if let (Some(ordering), Some(metric)) = (input.datetime_column(), numeric.first()) {
                return Ok(ChartSpec::new(ChartKind::Line, Some(&ordering.name), Some(&metric.name)));
            }
        }

        if input.kind == QueryKind::Correlation {
            return Ok(ChartSpec::new(ChartKind::Heatmap, None, None));
        }

        Err(QueryError::ChartNotApplicable(format!(
            "no chart fits a {} query over {} column(s)",
            input.kind,
            input.targets.len() + usize::from(input.group_by.is_some())
        )))
    }

    fn pie(input: &ChartInput) -> Option<ChartSpec> {
        let breakdown = input.breakdown()?;
        let metric = input.numeric_targets().into_iter().next().map(|c| c.name.as_str());

        if breakdown.distinct_count <= PIE_MAX_CATEGORIES {
            return Some(ChartSpec::new(ChartKind::Pie, Some(&breakdown.name), metric.or(Some("count"))));
        }

        let mut spec = ChartSpec::new(ChartKind::Bar, Some(&breakdown.name), metric.or(Some("count")));
        spec.warning = Some(format!(
            "'{}' has {} categories, too many for a readable pie chart; showing a bar chart instead",
            breakdown.name, breakdown.distinct_count
        ));
        Some(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, column_type: ColumnType, distinct_count: usize) -> ChartColumn {
        ChartColumn {
            name: name.to_string(),
            column_type,
            distinct_count,
        }
    }

    fn input(kind: QueryKind, targets: Vec<ChartColumn>, group_by: Option<ChartColumn>) -> ChartInput {
        ChartInput {
            kind,
            targets,
            group_by,
            requested: None,
        }
    }

    #[test]
    fn test_histogram_for_single_numeric() {
        let spec = ChartSelector::select(&input(
            QueryKind::Visualization,
            vec![column("age", ColumnType::Numeric, 30)],
            None,
        ))
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Histogram);
        assert_eq!(spec.x.as_deref(), Some("age"));
    }

    #[test]
    fn test_bar_for_categorical_summary() {
        let spec = ChartSelector::select(&input(
            QueryKind::Summary,
            vec![column("dept", ColumnType::Categorical, 3)],
            None,
        ))
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.y.as_deref(), Some("count"));
    }

    #[test]
    fn test_scatter_and_grouped_bar() {
        let scatter = ChartSelector::select(&input(
            QueryKind::Visualization,
            vec![column("age", ColumnType::Numeric, 30), column("salary", ColumnType::Numeric, 90)],
            None,
        ))
        .unwrap();
        assert_eq!(scatter.kind, ChartKind::Scatter);
        assert_eq!(scatter.y.as_deref(), Some("salary"));

        let grouped = ChartSelector::select(&input(
            QueryKind::Comparison,
            vec![column("salary", ColumnType::Numeric, 90)],
            Some(column("dept", ColumnType::Categorical, 3)),
        ))
        .unwrap();
        assert_eq!(grouped.kind, ChartKind::GroupedBar);
        assert_eq!(grouped.group_by.as_deref(), Some("dept"));
    }

    #[test]
    fn test_line_needs_datetime_column() {
        let spec = ChartSelector::select(&input(
            QueryKind::Visualization,
            vec![column("hired", ColumnType::Datetime, 40), column("salary", ColumnType::Numeric, 90)],
            None,
        ))
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Line);
        assert_eq!(spec.x.as_deref(), Some("hired"));
    }

    #[test]
    fn test_bar_for_counts_per_category() {
        let spec = ChartSelector::select(&input(
            QueryKind::Visualization,
            vec![],
            Some(column("dept", ColumnType::Categorical, 3)),
        ))
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.x.as_deref(), Some("dept"));
        assert_eq!(spec.y.as_deref(), Some("count"));
    }

    #[test]
    fn test_correlation_heatmap() {
        let spec = ChartSelector::select(&input(QueryKind::Correlation, vec![], None)).unwrap();
        assert_eq!(spec.kind, ChartKind::Heatmap);
    }

    #[test]
    fn test_pie_cardinality_limit() {
        let mut request = input(
            QueryKind::Visualization,
            vec![column("dept", ColumnType::Categorical, 4)],
            None,
        );
        request.requested = Some(ChartKind::Pie);
        let pie = ChartSelector::select(&request).unwrap();
        assert_eq!(pie.kind, ChartKind::Pie);
        assert!(pie.warning.is_none());

        request.targets[0].distinct_count = 12;
        let bar = ChartSelector::select(&request).unwrap();
        assert_eq!(bar.kind, ChartKind::Bar);
        assert!(bar.warning.unwrap().contains("12 categories"));
    }

    #[test]
    fn test_no_chart_for_filter_rows() {
        let err = ChartSelector::select(&input(
            QueryKind::Filter,
            vec![column("name", ColumnType::Text, 3)],
            None,
        ))
        .unwrap_err();
        assert!(matches!(err, QueryError::ChartNotApplicable(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let cases = vec![
            input(QueryKind::Visualization, vec![column("age", ColumnType::Numeric, 30)], None),
            input(
                QueryKind::Comparison,
                vec![column("age", ColumnType::Numeric, 30)],
                Some(column("dept", ColumnType::Categorical, 2)),
            ),
            input(QueryKind::Filter, vec![], None),
        ];
        for case in &cases {
            let first = ChartSelector::select(case).map_err(|e| e.to_string());
            for _ in 0..10 {
                assert_eq!(ChartSelector::select(case).map_err(|e| e.to_string()), first);
            }
        }
    }
}
