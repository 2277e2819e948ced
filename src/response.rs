//! Response composition
//!
//! Turns a query result plus an optional chart into the answer handed to the
//! rendering layer, with a one-sentence explanation of what was computed.

use crate::chart::ChartSpec;
use crate::executor::{QueryResult, ResultData};
use crate::intent::{Aggregation, IntentSource, QueryKind};
use crate::schema::TableSchema;
use itertools::Itertools;
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

pub const GENERIC_EXPLANATION: &str = "Here is the result of your question.";

lazy_static! {
    static ref TEMPLATES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("count", "There are {value} rows{filters}.");
        m.insert("scalar", "The {op} of {target}{filters} is {value}.");
        m.insert("multi", "Computed the {op} of {targets}{filters}.");
        m.insert("grouped", "Computed the {op} of {target} for each {group}{filters} ({groups} groups).");
        m.insert("grouped_count", "Counted rows for each {group}{filters} ({groups} groups).");
        m.insert("describe", "Summary statistics for {targets}{filters}.");
        m.insert("rows", "Found {matched} of {total} rows{filters}.");
        m.insert("correlation", "Correlation between {targets}{filters}.");
        m
    };
}

/// The answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Uuid,
    pub text: String,
    pub result: QueryResult,
    pub chart: Option<ChartSpec>,
    pub source: IntentSource,
}

#[derive(Debug, Default, Clone)]
pub struct ResponseComposer;

impl ResponseComposer {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: a template that cannot be rendered degrades to a
    /// generic sentence.
    pub fn compose(
        &self,
        result: QueryResult,
        chart: Option<ChartSpec>,
        source: IntentSource,
        schema: &TableSchema,
    ) -> Response {
        let mut text = self.explain(&result, schema);
        if let Some(warning) = chart.as_ref().and_then(|c| c.warning.as_deref()) {
            text.push_str(&format!(" Note: {}.", warning));
        }
        Response {
            id: Uuid::new_v4(),
            text,
            result,
            chart,
            source,
        }
    }

    pub fn explain(&self, result: &QueryResult, schema: &TableSchema) -> String {
        let (key, vars) = explanation_vars(result, schema);
        match TEMPLATES.get(key).and_then(|template| render(template, &vars)) {
            Some(text) => text,
            None => {
                warn!("No explanation template rendered for '{}'", key);
                GENERIC_EXPLANATION.to_string()
            }
        }
    }
}

fn explanation_vars(result: &QueryResult, schema: &TableSchema) -> (&'static str, Vec<(&'static str, String)>) {
    let meta = &result.meta;
    let name = |column: &str| schema.display_name(column).to_string();
    let targets = meta.targets.iter().map(|t| name(t)).join(", ");
    let op = meta.aggregation.map(|a| a.label()).unwrap_or("value").to_string();
    let filters = if meta.filters.is_empty() {
        String::new()
    } else {
        let conditions = meta
            .filters
            .iter()
            .map(|p| format!("{} {} {}", name(&p.column), p.operator.symbol(), p.value))
            .join(" and ");
        format!(" where {}", conditions)
    };

    let mut vars = vec![("filters", filters)];
    let key = match &result.data {
        ResultData::Scalar { value } => {
            vars.push(("value", value.to_string()));
            if meta.aggregation == Some(Aggregation::Count) {
                "count"
            } else {
                vars.push(("op", op));
                if let Some(target) = meta.targets.first() {
                    vars.push(("target", name(target)));
                }
                "scalar"
            }
        }
        ResultData::CorrelationMatrix { columns, .. } => {
            vars.push(("targets", columns.iter().map(|c| name(c)).join(", ")));
            "correlation"
        }
        ResultData::Table { rows, .. } => match &meta.group_by {
            Some(group) => {
                vars.push(("group", name(group)));
                vars.push(("groups", rows.len().to_string()));
                if meta.aggregation == Some(Aggregation::Count) || meta.targets.is_empty() {
                    "grouped_count"
                } else {
                    vars.push(("op", op));
                    vars.push(("target", targets));
                    "grouped"
                }
            }
            None if meta.aggregation.is_some() => {
                vars.push(("op", op));
                vars.push(("targets", targets));
                "multi"
            }
            None if meta.kind == QueryKind::Summary && !meta.targets.is_empty() => {
                vars.push(("targets", targets));
                "describe"
            }
            None => {
                vars.push(("matched", meta.rows_matched.to_string()));
                vars.push(("total", meta.rows_total.to_string()));
                "rows"
            }
        },
    };
    (key, vars)
}

/// Fill `{name}` placeholders. `None` if the template names a placeholder
/// that has no value. Values are inserted verbatim, braces included.
fn render(template: &str, vars: &[(&str, String)]) -> Option<String> {
    let mut text = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let close = open + rest[open..].find('}')?;
        let name = &rest[open + 1..close];
        let (_, value) = vars.iter().find(|(key, _)| *key == name)?;
        text.push_str(&rest[..open]);
        text.push_str(value);
        rest = &rest[close + 1..];
    }
    text.push_str(rest);
    Some(text)
}
