//! Natural-language questions over small uploaded tables.
//!
//! An uploaded table is profiled once (`schema`), bound to typed values
//! (`dataset`), and then each question flows through an interpreter, a
//! resolved plan, the executor, the chart selector and the response
//! composer. `Session` ties the stages together.

pub mod chart;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod fuzzy_matcher;
pub mod ingest;
pub mod intent;
pub mod interpreter;
pub mod llm;
pub mod plan;
pub mod response;
pub mod sample_data;
pub mod schema;
pub mod session;
pub mod table;

pub use chart::{ChartInput, ChartSelector, ChartSpec};
pub use config::EngineConfig;
pub use dataset::{Dataset, Value};
pub use error::{QueryError, Result};
pub use executor::{QueryExecutor, QueryResult, ResultData};
pub use intent::{Aggregation, ChartKind, IntentSource, Interpretation, Operator, Predicate, QueryIntent, QueryKind};
pub use interpreter::{ModelBackedInterpreter, QueryInterpreter, RuleBasedInterpreter};
pub use llm::{IntentRequest, LanguageService, LanguageServiceError, OpenAiClient};
pub use plan::QueryPlan;
pub use response::{Response, ResponseComposer};
pub use schema::{ColumnSchema, ColumnType, SchemaInferencer, TableSchema};
pub use session::Session;
pub use table::{CellValue, RawTable};
