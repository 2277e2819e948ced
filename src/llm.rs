use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::schema::{ColumnType, TableSchema};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failures of the language-model boundary. Every one of them sends the
/// question to the rule-based interpreter instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LanguageServiceError {
    #[error("request timed out")]
    Timeout,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("authentication failed")]
    Auth,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<LanguageServiceError> for QueryError {
    fn from(err: LanguageServiceError) -> Self {
        QueryError::LanguageServiceUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnSummary {
    pub normalized_name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub sample_values: Vec<String>,
}

/// What the model sees: the question plus names, types and a few example
/// values per column. Never the full table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntentRequest {
    pub question: String,
    pub schema_summary: Vec<ColumnSummary>,
}

impl IntentRequest {
    pub fn new(question: &str, schema: &TableSchema, sample_values: usize) -> Self {
        let schema_summary = schema
            .columns
            .iter()
            .map(|c| ColumnSummary {
                normalized_name: c.normalized_name.clone(),
                column_type: c.inferred_type,
                sample_values: c.sample_values.iter().take(sample_values).cloned().collect(),
            })
            .collect();
        Self {
            question: question.trim().to_string(),
            schema_summary,
        }
    }
}

/// External service that turns an `IntentRequest` into the raw text of a
/// structured intent.
#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn complete_intent(&self, request: &IntentRequest) -> std::result::Result<String, LanguageServiceError>;
}

/// Models like to wrap JSON in markdown fences; strip them.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Self>> {
        match &config.api_key {
            None => Ok(None),
            Some(key) => Self::new(
                key.clone(),
                config.model.clone(),
                config.base_url.clone(),
                config.llm_timeout,
            )
            .map(Some),
        }
    }

    fn build_prompt(request: &IntentRequest) -> std::result::Result<String, LanguageServiceError> {
        let schema_json = serde_json::to_string_pretty(&request.schema_summary)
            .map_err(|e| LanguageServiceError::MalformedResponse(format!("Failed to serialize schema: {}", e)))?;

        Ok(format!(
            r#"You translate questions about a table into a structured query intent.

Table columns (normalized_name, type, sample_values):
{}

Question: "{}"

Return JSON in this exact format:
{{
  "kind": "summary | filter | comparison | visualization | correlation",
  "target_columns": ["age"],
  "filters": [{{"column": "dept", "operator": "eq | lt | gt | lte | gte | in", "value": "IT"}}],
  "group_by": null,
  "aggregation": "count | sum | mean | min | max | distinct_count | null",
  "requested_chart": "histogram | bar | grouped_bar | scatter | line | heatmap | pie | null"
}}

Use only the column names listed above. Numbers must be JSON numbers; an "in" filter takes a list.
Only return the JSON, no other text."#,
            schema_json, request.question
        ))
    }
}

#[async_trait]
impl LanguageService for OpenAiClient {
    async fn complete_intent(&self, request: &IntentRequest) -> std::result::Result<String, LanguageServiceError> {
        let prompt = Self::build_prompt(request)?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "max_tokens": 500
        });

        debug!("Calling language model '{}' at {}", self.model, self.base_url);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LanguageServiceError::Timeout
                } else {
                    LanguageServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            429 => return Err(LanguageServiceError::QuotaExceeded),
            401 | 403 => return Err(LanguageServiceError::Auth),
            _ if !status.is_success() => {
                return Err(LanguageServiceError::Transport(format!("HTTP {}", status)));
            }
            _ => {}
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LanguageServiceError::MalformedResponse(format!("Failed to parse response body: {}", e)))?;

        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LanguageServiceError::MalformedResponse("No content in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferencer;
    use crate::table::RawTable;
    use serde_json::json;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
    }

    #[test]
    fn test_request_carries_samples_only() {
        let raw = RawTable::from_json_rows(&[
            json!({"Age": 25, "Dept": "IT"}),
            json!({"Age": 35, "Dept": "HR"}),
            json!({"Age": 45, "Dept": "Ops"}),
        ])
        .unwrap();
        let schema = SchemaInferencer::default().infer(&raw).unwrap();
        let request = IntentRequest::new(" average age? ", &schema, 2);

        assert_eq!(request.question, "average age?");
        assert_eq!(request.schema_summary[0].normalized_name, "age");
        assert_eq!(request.schema_summary[1].sample_values, vec!["IT", "HR"]);

        let encoded = serde_json::to_value(&request.schema_summary[1]).unwrap();
        assert_eq!(encoded["type"], "categorical");
    }

    #[test]
    fn test_prompt_lists_columns() {
        let request = IntentRequest {
            question: "how many rows".to_string(),
            schema_summary: vec![ColumnSummary {
                normalized_name: "dept".to_string(),
                column_type: ColumnType::Categorical,
                sample_values: vec!["IT".to_string()],
            }],
        };
        let prompt = OpenAiClient::build_prompt(&request).unwrap();
        assert!(prompt.contains("\"dept\""));
        assert!(prompt.contains("how many rows"));
    }

    #[test]
    fn test_no_client_without_key() {
        assert!(OpenAiClient::from_config(&EngineConfig::default()).unwrap().is_none());
    }
}
