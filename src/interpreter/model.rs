//! Model-backed interpreter with a single rule-based fallback.

use super::rules::RuleBasedInterpreter;
use super::QueryInterpreter;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::intent::{IntentSource, Interpretation, QueryIntent, QueryKind};
use crate::llm::{strip_code_fences, IntentRequest, LanguageService, LanguageServiceError};
use crate::plan::QueryPlan;
use crate::schema::{normalize_column_name, TableSchema};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ModelBackedInterpreter {
    service: Arc<dyn LanguageService>,
    fallback: RuleBasedInterpreter,
    sample_values: usize,
    timeout: Duration,
}

impl ModelBackedInterpreter {
    pub fn new(service: Arc<dyn LanguageService>, fallback: RuleBasedInterpreter, config: &EngineConfig) -> Self {
        Self {
            service,
            fallback,
            sample_values: config.sample_values,
            timeout: config.llm_timeout,
        }
    }

    async fn ask_model(&self, question: &str, schema: &TableSchema) -> std::result::Result<QueryIntent, LanguageServiceError> {
        let request = IntentRequest::new(question, schema, self.sample_values);
        let reply = tokio::time::timeout(self.timeout, self.service.complete_intent(&request))
            .await
            .map_err(|_| LanguageServiceError::Timeout)??;
        parse_intent_reply(&reply, schema)
    }
}

/// Parse the model's reply and map every column it names onto the schema.
/// A reply naming an unknown column, no column at all, or a filter the
/// column cannot take is malformed.
pub fn parse_intent_reply(reply: &str, schema: &TableSchema) -> std::result::Result<QueryIntent, LanguageServiceError> {
    let mut intent: QueryIntent = serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| LanguageServiceError::MalformedResponse(format!("Failed to parse intent: {}", e)))?;

    let canonical = |name: &str| -> std::result::Result<String, LanguageServiceError> {
        if schema.column(name).is_some() {
            return Ok(name.to_string());
        }
        let normalized = normalize_column_name(name);
        if schema.column(&normalized).is_some() {
            Ok(normalized)
        } else {
            Err(LanguageServiceError::MalformedResponse(format!("unknown column '{}'", name)))
        }
    };

    intent.target_columns = intent
        .target_columns
        .iter()
        .map(|c| canonical(c))
        .collect::<std::result::Result<_, _>>()?;
    intent.group_by = intent.group_by.as_deref().map(|g| canonical(g)).transpose()?;
    for predicate in &mut intent.filters {
        predicate.column = canonical(&predicate.column)?;
    }

    if intent.kind != QueryKind::Correlation && intent.referenced_columns().is_empty() {
        return Err(LanguageServiceError::MalformedResponse("intent names no column".to_string()));
    }
    QueryPlan::resolve(&intent, schema)
        .map_err(|e| LanguageServiceError::MalformedResponse(format!("intent does not fit the table: {}", e)))?;
    Ok(intent)
}

#[async_trait]
impl QueryInterpreter for ModelBackedInterpreter {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn interpret(&self, question: &str, schema: &TableSchema) -> Result<Interpretation> {
        match self.ask_model(question, schema).await {
            Ok(intent) => {
                info!("Question interpreted by language model");
                Ok(Interpretation {
                    intent,
                    source: IntentSource::Model,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                warn!("{}; falling back to rule-based interpreter", QueryError::from(err));
                let intent = self.fallback.interpret_question(question, schema)?;
                Ok(Interpretation {
                    intent,
                    source: IntentSource::Fallback { reason },
                })
            }
        }
    }
}
