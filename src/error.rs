use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Input too large: {rows} rows x {columns} columns (limit {max_rows} rows x {max_columns} columns)")]
    InputTooLarge {
        rows: usize,
        columns: usize,
        max_rows: usize,
        max_columns: usize,
    },

    #[error("Schema inference error: {0}")]
    SchemaInference(String),

    #[error("Unrecognized query: {0}")]
    UnrecognizedQuery(String),

    #[error("Ambiguous column reference '{reference}': could be any of {}", candidates.join(", "))]
    AmbiguousColumnReference {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("Column not found: '{0}'")]
    ColumnNotFound(String),

    #[error("Unsupported aggregation: cannot compute {op} of '{column}' ({column_type} column)")]
    UnsupportedAggregation {
        op: String,
        column: String,
        column_type: String,
    },

    #[error("Invalid predicate on '{column}': {reason}")]
    InvalidPredicate { column: String, reason: String },

    #[error("Language service unavailable: {0}")]
    LanguageServiceUnavailable(String),

    #[error("Chart not applicable: {0}")]
    ChartNotApplicable(String),

    #[error("Internal execution error: {0}")]
    InternalExecution(String),

    #[error("No dataset loaded")]
    NoDataset,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for QueryError {
    fn from(err: polars::error::PolarsError) -> Self {
        QueryError::Polars(err.to_string())
    }
}

impl QueryError {
    /// Conditions that are absorbed before they reach the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueryError::LanguageServiceUnavailable(_) | QueryError::ChartNotApplicable(_)
        )
    }

    /// Text shown to the user. Structural query errors name the offending
    /// column or token so the question can be rephrased.
    pub fn user_message(&self) -> String {
        match self {
            QueryError::InputTooLarge { rows, columns, max_rows, max_columns } => format!(
                "The file has {} rows and {} columns. The maximum allowed is {} rows and {} columns.",
                rows, columns, max_rows, max_columns
            ),
            QueryError::SchemaInference(reason) => {
                format!("I couldn't read the structure of this file: {}", reason)
            }
            QueryError::UnrecognizedQuery(reason) => format!(
                "I couldn't understand the question ({}). Try something like 'What is the average age?'",
                reason
            ),
            QueryError::AmbiguousColumnReference { reference, candidates } => format!(
                "'{}' could refer to more than one column: {}. Please name the column you mean.",
                reference,
                candidates.join(", ")
            ),
            QueryError::ColumnNotFound(token) => format!(
                "I couldn't find a column matching '{}'. Please check the column names in your data.",
                token
            ),
            QueryError::UnsupportedAggregation { op, column, column_type } => format!(
                "I can't compute the {} of '{}' because it is a {} column.",
                op, column, column_type
            ),
            QueryError::InvalidPredicate { column, reason } => {
                format!("The condition on '{}' doesn't fit its data: {}", column, reason)
            }
            QueryError::NoDataset => "Please upload a data file first.".to_string(),
            QueryError::LanguageServiceUnavailable(_)
            | QueryError::ChartNotApplicable(_)
            | QueryError::InternalExecution(_)
            | QueryError::Config(_)
            | QueryError::Ingest(_)
            | QueryError::Io(_)
            | QueryError::Json(_)
            | QueryError::Polars(_) => {
                "Something went wrong while answering your question. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_errors_name_the_token() {
        let err = QueryError::ColumnNotFound("salary".to_string());
        assert!(err.user_message().contains("salary"));

        let err = QueryError::AmbiguousColumnReference {
            reference: "sales".to_string(),
            candidates: vec!["sales_2023".to_string(), "sales_2024".to_string()],
        };
        let message = err.user_message();
        assert!(message.contains("sales_2023"));
        assert!(message.contains("sales_2024"));
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = QueryError::InternalExecution("column index 7 out of range".to_string());
        assert!(!err.user_message().contains("index 7"));
        assert!(!err.is_recoverable());
        assert!(QueryError::ChartNotApplicable("x".to_string()).is_recoverable());
    }
}
