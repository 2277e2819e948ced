//! Query interpreters
//!
//! Two strategies turn a question plus a schema into a `QueryIntent`:
//! - `RuleBasedInterpreter`: deterministic keyword and similarity rules
//! - `ModelBackedInterpreter`: asks a language model, falling back to the rules
//!   exactly once when the model cannot produce a usable intent

pub mod model;
pub mod rules;

pub use model::ModelBackedInterpreter;
pub use rules::RuleBasedInterpreter;

use crate::error::Result;
use crate::intent::Interpretation;
use crate::schema::TableSchema;
use async_trait::async_trait;

#[async_trait]
pub trait QueryInterpreter: Send + Sync {
    /// Strategy name used in logs.
    fn name(&self) -> &'static str;

    /// Interpret a question against a schema.
    ///
    /// Fails with `UnrecognizedQuery`, `AmbiguousColumnReference` or
    /// `ColumnNotFound` when no usable intent can be built.
    async fn interpret(&self, question: &str, schema: &TableSchema) -> Result<Interpretation>;
}
