//! End-to-end questions through `Session` with the rule-based interpreter.

use datachat::{
    ChartKind, ChartSelector, ChartInput, EngineConfig, IntentSource, QueryError, QueryKind, QueryPlan, RawTable,
    ResultData, RuleBasedInterpreter, Session, Value,
};
use serde_json::json;

fn table(records: serde_json::Value) -> RawTable {
    RawTable::from_json_rows(records.as_array().unwrap()).unwrap()
}

fn employees() -> RawTable {
    table(json!([
        {"age": 25, "dept": "IT"},
        {"age": 35, "dept": "HR"},
        {"age": 45, "dept": "IT"},
    ]))
}

fn session_with(raw: RawTable) -> Session {
    let mut session = Session::new(EngineConfig::default()).unwrap();
    session.upload(raw).unwrap();
    session
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[tokio::test]
async fn test_aggregations_on_employee_table() {
    let session = session_with(employees());

    let average = session.ask("what is the average age").await.unwrap();
    assert_eq!(average.result.as_scalar(), Some(&Value::Number(35.0)));
    assert_eq!(average.source, IntentSource::Rules);
    println!("{}", average.text);

    let count = session.ask("how many employees in IT").await.unwrap();
    assert_eq!(count.result.as_scalar(), Some(&Value::Number(2.0)));

    let by_dept = session.ask("compare average age by dept").await.unwrap();
    match by_dept.result.data {
        ResultData::Table { columns, rows } => {
            assert_eq!(columns, vec!["dept", "mean_age"]);
            assert_eq!(
                rows,
                vec![
                    vec![text("IT"), Value::Number(35.0)],
                    vec![text("HR"), Value::Number(35.0)],
                ]
            );
        }
        other => panic!("expected a table, got {:?}", other),
    }
    let chart = by_dept.chart.expect("comparison by category has a chart");
    assert_eq!(chart.kind, ChartKind::GroupedBar);
}

#[tokio::test]
async fn test_filter_conjunction_uses_strict_less_than() {
    let session = session_with(employees());

    let response = session.ask("employees under 30 in IT").await.unwrap();
    match response.result.data {
        ResultData::Table { rows, .. } => assert_eq!(rows, vec![vec![Value::Number(25.0), text("IT")]]),
        other => panic!("expected a table, got {:?}", other),
    }
    assert!(response.chart.is_none());

    let response = session.ask("employees under 25").await.unwrap();
    assert_eq!(response.result.row_count(), 0);
}

#[tokio::test]
async fn test_similar_columns_are_ambiguous() {
    let session = session_with(table(json!([
        {"sales_2023": 10, "sales_2024": 12},
        {"sales_2023": 20, "sales_2024": 22},
    ])));

    match session.ask("show sales").await {
        Err(QueryError::AmbiguousColumnReference { reference, candidates }) => {
            assert_eq!(reference, "sales");
            assert_eq!(candidates, vec!["sales_2023", "sales_2024"]);
        }
        other => panic!("expected ambiguity, got {:?}", other.map(|r| r.text)),
    }
}

#[tokio::test]
async fn test_constant_column_has_no_correlation() {
    let session = session_with(table(json!([
        {"a": 1, "b": 5, "c": 2},
        {"a": 2, "b": 5, "c": 4},
        {"a": 3, "b": 5, "c": 7},
    ])));

    let response = session.ask("show the correlation").await.unwrap();
    match &response.result.data {
        ResultData::CorrelationMatrix { columns, values } => {
            assert_eq!(columns, &vec!["a", "b", "c"]);
            for i in 0..3 {
                assert_eq!(values[1][i], None);
                assert_eq!(values[i][1], None);
            }
            let ac = values[0][2].unwrap();
            assert!(ac > 0.9 && ac <= 1.0);
        }
        other => panic!("expected a correlation matrix, got {:?}", other),
    }
    assert_eq!(response.chart.unwrap().kind, ChartKind::Heatmap);
}

#[tokio::test]
async fn test_structural_errors_name_the_column() {
    let session = session_with(employees());

    let err = session.ask("what is the average salary").await.unwrap_err();
    assert!(matches!(err, QueryError::ColumnNotFound(ref t) if t == "salary"));
    assert!(err.user_message().contains("salary"));

    let err = session.ask("what is the average dept").await.unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedAggregation { .. }));

    let err = session.ask("hello there").await.unwrap_err();
    assert!(matches!(err, QueryError::UnrecognizedQuery(_)));
}

#[tokio::test]
async fn test_no_dataset_and_rejected_upload() {
    let config = EngineConfig {
        max_rows: 3,
        ..EngineConfig::default()
    };
    let mut session = Session::new(config).unwrap();
    assert!(matches!(session.ask("how many rows").await, Err(QueryError::NoDataset)));

    session.upload(employees()).unwrap();
    let too_many: Vec<serde_json::Value> = (0..4).map(|i| json!({"x": i})).collect();
    let err = session.upload(RawTable::from_json_rows(&too_many).unwrap()).unwrap_err();
    assert!(matches!(err, QueryError::InputTooLarge { rows: 4, max_rows: 3, .. }));

    let response = session.ask("what is the average age").await.unwrap();
    assert_eq!(response.result.as_scalar(), Some(&Value::Number(35.0)));
}

#[tokio::test]
async fn test_new_upload_replaces_dataset() {
    let mut session = session_with(employees());
    session
        .upload(table(json!([{"price": 10, "region": "North"}, {"price": 30, "region": "South"}])))
        .unwrap();

    let err = session.ask("what is the average age").await.unwrap_err();
    assert!(matches!(err, QueryError::ColumnNotFound(_)));
    let response = session.ask("what is the average price").await.unwrap();
    assert_eq!(response.result.as_scalar(), Some(&Value::Number(20.0)));
}

#[tokio::test]
async fn test_negative_threshold() {
    let session = session_with(table(json!([{"temp": -20}, {"temp": 5}, {"temp": 15}])));
    let response = session.ask("how many rows with temp below -10").await.unwrap();
    assert_eq!(response.result.as_scalar(), Some(&Value::Number(1.0)));
}

#[tokio::test]
async fn test_distinct_count_keeps_full_precision() {
    let session = session_with(table(json!([
        {"ratio": 0.12341},
        {"ratio": 0.12342},
        {"ratio": 0.12343},
    ])));
    let response = session.ask("how many distinct ratio").await.unwrap();
    assert_eq!(response.result.as_scalar(), Some(&Value::Number(3.0)));
}

#[tokio::test]
async fn test_columns_named_like_keywords() {
    let session = session_with(table(json!([
        {"total": 10, "value": 1, "dept": "IT"},
        {"total": 20, "value": 3, "dept": "HR"},
    ])));
    let average = session.ask("what is the average total").await.unwrap();
    assert_eq!(average.result.as_scalar(), Some(&Value::Number(15.0)));
    let maximum = session.ask("what is the maximum total").await.unwrap();
    assert_eq!(maximum.result.as_scalar(), Some(&Value::Number(20.0)));
    let sum = session.ask("sum of value").await.unwrap();
    assert_eq!(sum.result.as_scalar(), Some(&Value::Number(4.0)));
}

#[tokio::test]
async fn test_plotting_a_category_counts_rows() {
    let session = session_with(employees());
    let response = session.ask("plot dept").await.unwrap();
    match &response.result.data {
        ResultData::Table { columns, rows } => {
            assert_eq!(columns, &vec!["dept", "count"]);
            assert_eq!(
                rows,
                &vec![
                    vec![text("IT"), Value::Number(2.0)],
                    vec![text("HR"), Value::Number(1.0)],
                ]
            );
        }
        other => panic!("expected a table, got {:?}", other),
    }
    let chart = response.chart.expect("category counts have a chart");
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x.as_deref(), Some("dept"));
    assert_eq!(chart.y.as_deref(), Some("count"));
    assert_eq!(response.text, "Counted rows for each dept (2 groups).");
}

#[test]
fn test_chart_selection_is_deterministic() {
    let raw = employees();
    let schema = datachat::SchemaInferencer::default().infer(&raw).unwrap();
    let interpreter = RuleBasedInterpreter::default();

    for question in ["plot age", "plot dept", "compare average age by dept", "employees under 30"] {
        let intent = interpreter.interpret_question(question, &schema).unwrap();
        let plan = QueryPlan::resolve(&intent, &schema).unwrap();
        let first = ChartSelector::select(&ChartInput::from_plan(&plan, &schema)).ok();
        for _ in 0..5 {
            let again = ChartSelector::select(&ChartInput::from_plan(&plan, &schema)).ok();
            assert_eq!(again, first, "chart changed for '{}'", question);
        }
    }

    let intent = interpreter.interpret_question("plot age", &schema).unwrap();
    assert_eq!(intent.kind, QueryKind::Visualization);
    let plan = QueryPlan::resolve(&intent, &schema).unwrap();
    let chart = ChartSelector::select(&ChartInput::from_plan(&plan, &schema)).unwrap();
    assert_eq!(chart.kind, ChartKind::Histogram);
}
