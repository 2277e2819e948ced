//! Session - one uploaded table and the questions asked about it
//!
//! A session holds at most one dataset. Uploading replaces it wholesale, and
//! a rejected upload leaves the previous dataset in place. Questions are
//! answered one at a time through interpret -> resolve -> execute -> chart ->
//! compose.

use crate::chart::{ChartInput, ChartSelector};
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{QueryError, Result};
use crate::executor::QueryExecutor;
use crate::interpreter::{ModelBackedInterpreter, QueryInterpreter, RuleBasedInterpreter};
use crate::llm::OpenAiClient;
use crate::plan::QueryPlan;
use crate::response::{Response, ResponseComposer};
use crate::schema::{SchemaInferencer, TableSchema};
use crate::table::RawTable;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Session {
    config: EngineConfig,
    inferencer: SchemaInferencer,
    interpreter: Box<dyn QueryInterpreter>,
    composer: ResponseComposer,
    dataset: Option<Dataset>,
}

impl Session {
    /// Uses the language model when an API key is configured, the rule-based
    /// interpreter otherwise.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let rules = RuleBasedInterpreter::from_config(&config);
        let interpreter: Box<dyn QueryInterpreter> = match OpenAiClient::from_config(&config)? {
            Some(client) => Box::new(ModelBackedInterpreter::new(Arc::new(client), rules, &config)),
            None => {
                info!("No language model API key configured; using rule-based interpretation");
                Box::new(rules)
            }
        };
        Ok(Self::with_interpreter(config, interpreter))
    }

    pub fn with_interpreter(config: EngineConfig, interpreter: Box<dyn QueryInterpreter>) -> Self {
        Self {
            inferencer: SchemaInferencer::from_config(&config),
            config,
            interpreter,
            composer: ResponseComposer::new(),
            dataset: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn interpreter_name(&self) -> &'static str {
        self.interpreter.name()
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.dataset.as_ref().map(|d| d.schema())
    }

    /// Infer and bind a new table. On success the previous dataset is
    /// discarded; on failure it stays active.
    pub fn upload(&mut self, table: RawTable) -> Result<&TableSchema> {
        let dataset = self
            .inferencer
            .infer(&table)
            .and_then(|schema| Dataset::bind(&table, &schema))
            .map_err(|e| {
                warn!("Upload rejected: {}", e);
                e
            })?;

        info!(
            "Upload accepted: {} rows, {} columns",
            dataset.row_count(),
            dataset.schema().columns.len()
        );
        Ok(self.dataset.insert(dataset).schema())
    }

    pub fn clear(&mut self) {
        self.dataset = None;
    }

    /// Answer one question about the active dataset.
    pub async fn ask(&self, question: &str) -> Result<Response> {
        let dataset = self.dataset.as_ref().ok_or(QueryError::NoDataset)?;
        let schema = dataset.schema();

        let interpretation = self.interpreter.interpret(question, schema).await.map_err(|e| {
            warn!("Interpreter '{}' could not read question: {}", self.interpreter.name(), e);
            e
        })?;
        debug!("Interpreted as {:?} ({:?})", interpretation.intent, interpretation.source);

        let plan = QueryPlan::resolve(&interpretation.intent, schema).map_err(|e| {
            warn!("Plan resolution failed: {}", e);
            e
        })?;

        let result = QueryExecutor::new(dataset).execute(&plan).map_err(|e| {
            match &e {
                QueryError::UnsupportedAggregation { .. } => warn!("Execution rejected: {}", e),
                _ => error!("Execution failed: {}", e),
            }
            e
        })?;

        let chart = match ChartSelector::select(&ChartInput::from_plan(&plan, schema)) {
            Ok(spec) => Some(spec),
            Err(e) if e.is_recoverable() => {
                debug!("{}", e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(self.composer.compose(result, chart, interpretation.source, schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResultData;
    use crate::intent::IntentSource;
    use serde_json::json;

    fn employees() -> RawTable {
        RawTable::from_json_rows(&[
            json!({"age": 25, "dept": "IT"}),
            json!({"age": 35, "dept": "HR"}),
            json!({"age": 45, "dept": "IT"}),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_ask_without_dataset() {
        let session = Session::new(EngineConfig::default()).unwrap();
        assert!(matches!(session.ask("what is the average age").await, Err(QueryError::NoDataset)));
    }

    #[tokio::test]
    async fn test_ask_average() {
        let mut session = Session::new(EngineConfig::default()).unwrap();
        assert_eq!(session.interpreter_name(), "rules");
        session.upload(employees()).unwrap();

        let response = session.ask("what is the average age").await.unwrap();
        assert_eq!(response.result.data, ResultData::Scalar { value: crate::dataset::Value::Number(35.0) });
        assert_eq!(response.source, IntentSource::Rules);
        assert!(response.text.contains("average"));
    }

    #[test]
    fn test_rejected_upload_keeps_previous_dataset() {
        let config = EngineConfig {
            max_rows: 3,
            ..EngineConfig::default()
        };
        let mut session = Session::new(config).unwrap();
        session.upload(employees()).unwrap();

        let rows: Vec<serde_json::Value> = (0..4).map(|i| json!({"x": i})).collect();
        let too_big = RawTable::from_json_rows(&rows).unwrap();
        assert!(matches!(session.upload(too_big), Err(QueryError::InputTooLarge { .. })));
        assert!(session.schema().unwrap().column("dept").is_some());
    }
}
