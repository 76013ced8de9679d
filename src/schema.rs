//! Schema extraction from delimited text files
//!
//! Reads the header for column names, then infers each column's type
//! from a uniform random sample of the data rows.

use crate::error::PipelineError;
use crate::inference::infer_type;
use crate::models::Schema;
use crate::Result;
use csv::{ReaderBuilder, StringRecord};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Upper bound on rows sampled for inference
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Extract a schema using the thread-local RNG and the default sample size
pub fn extract_schema(path: &Path) -> Result<Schema> {
    extract_schema_with(path, DEFAULT_SAMPLE_SIZE, &mut rand::thread_rng())
}

/// Extract a schema sampling at most `max_sample` rows with `rng`.
///
/// A header-only file yields every column typed `empty` and a zero
/// sample size. A file without a header row is a `SchemaError`.
pub fn extract_schema_with<R: Rng + ?Sized>(
    path: &Path,
    max_sample: usize,
    rng: &mut R,
) -> Result<Schema> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(PipelineError::SchemaError(format!(
            "{} has no header row",
            path.display()
        )));
    }
    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    let rows: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

    let sample: Vec<&StringRecord> = rows
        .choose_multiple(rng, max_sample.min(rows.len()))
        .collect();

    let mut types = HashMap::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let values: Vec<&str> = sample
            .iter()
            .filter(|row| row.len() >= columns.len())
            .filter_map(|row| row.get(index))
            .collect();
        types.insert(column.clone(), infer_type(&values));
    }

    debug!(
        path = %path.display(),
        columns = columns.len(),
        total_rows = rows.len(),
        sample_size = sample.len(),
        "Schema extracted"
    );

    Ok(Schema {
        columns,
        types,
        sample_size: sample.len(),
    })
}
