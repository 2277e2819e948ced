//! Engine configuration
//!
//! Every tunable is a named field with a named default. Values come from the
//! environment (optionally via a `.env` file); the CLI may override a few.

use crate::error::{QueryError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_ROWS: usize = 500;
pub const DEFAULT_MAX_COLUMNS: usize = 20;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
pub const DEFAULT_CATEGORICAL_THRESHOLD: usize = 50;
pub const DEFAULT_TOP_N: usize = 5;
pub const DEFAULT_SAMPLE_VALUES: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Language-model credentials. `None` keeps the engine in rule-based mode.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Upper bound on a single language-model call.
    pub llm_timeout: Duration,
    /// Uploads with more rows are rejected with `InputTooLarge`.
    pub max_rows: usize,
    /// Uploads with more columns are rejected with `InputTooLarge`.
    pub max_columns: usize,
    /// Minimum score for a question token to bind to a column.
    pub similarity_threshold: f64,
    /// Maximum distinct values for a column to be inferred as categorical.
    pub categorical_threshold: usize,
    /// Length of the frequency table kept for categorical/binary columns.
    pub top_n: usize,
    /// Example values per column sent to the language model.
    pub sample_values: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            max_rows: DEFAULT_MAX_ROWS,
            max_columns: DEFAULT_MAX_COLUMNS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            categorical_threshold: DEFAULT_CATEGORICAL_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            sample_values: DEFAULT_SAMPLE_VALUES,
        }
    }
}

impl EngineConfig {
    /// Build the configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = lookup("OPENAI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let config = Self {
            api_key,
            model: lookup("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            llm_timeout: Duration::from_secs(parse_var(
                &lookup,
                "DATACHAT_LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )?),
            max_rows: parse_var(&lookup, "DATACHAT_MAX_ROWS", defaults.max_rows)?,
            max_columns: parse_var(&lookup, "DATACHAT_MAX_COLUMNS", defaults.max_columns)?,
            similarity_threshold: parse_var(
                &lookup,
                "DATACHAT_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            categorical_threshold: parse_var(
                &lookup,
                "DATACHAT_CATEGORICAL_THRESHOLD",
                defaults.categorical_threshold,
            )?,
            top_n: parse_var(&lookup, "DATACHAT_TOP_N", defaults.top_n)?,
            sample_values: parse_var(&lookup, "DATACHAT_SAMPLE_VALUES", defaults.sample_values)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    /// True when a language model can be consulted at all.
    pub fn model_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(QueryError::Config(format!(
                "DATACHAT_SIMILARITY_THRESHOLD must be between 0 and 1, got {}",
                self.similarity_threshold
            )));
        }
        if self.max_rows == 0 || self.max_columns == 0 {
            return Err(QueryError::Config(
                "row and column limits must be positive".to_string(),
            ));
        }
        if self.llm_timeout.is_zero() {
            return Err(QueryError::Config(
                "DATACHAT_LLM_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            QueryError::Config(format!("{} has an invalid value: '{}'", key, raw))
        }),
    }
}
