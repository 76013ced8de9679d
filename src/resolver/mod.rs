//! Resolution stages driven by the generation capability
//!
//! `SeriesResolver` turns a question into a chosen catalog series.
//! `QueryResolver` turns a dataset plus the question into an answer.

use crate::error::PipelineError;
use crate::Result;
use tracing::warn;

pub mod query;
pub mod series;
pub use query::QueryResolver;
pub use series::SeriesResolver;

/// Generation failures mean "no output", not a crashed run.
/// Everything else (transport, IO, config) still propagates.
fn absent_on_generation_failure<T>(stage: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ PipelineError::GenerationError(_)) | Err(e @ PipelineError::ValidationError { .. }) => {
            warn!(stage, error = %e, "Generation produced no usable output");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
