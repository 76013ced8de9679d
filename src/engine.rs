//! Embedded analytical query engine
//!
//! Generated SQL addresses its data through a `read_csv_auto('<path>')`
//! binding. `PolarsEngine` registers each bound file as a lazy CSV frame
//! and runs the statement through the polars SQL context.

use crate::error::PipelineError;
use crate::models::QueryOutput;
use crate::Result;
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Trait for the analytical engine behind the query stage
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    /// Live `(column, type)` listing of the relation bound to `location`
    async fn describe(&self, location: &Path) -> Result<Vec<(String, String)>>;
}

/// Virtual table expression for a file, always with forward slashes
pub fn table_binding(location: &Path) -> String {
    format!(
        "read_csv_auto('{}')",
        location.to_string_lossy().replace('\\', "/")
    )
}

fn binding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)read_csv(?:_auto)?\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
            .unwrap_or_else(|e| panic!("invalid binding pattern: {}", e))
    })
}

/// Replace every file binding with a registered table name.
/// The same path always maps to the same name.
pub fn bind_tables(sql: &str) -> (String, Vec<(String, PathBuf)>) {
    let mut bindings: Vec<(String, PathBuf)> = Vec::new();

    let rewritten = binding_pattern()
        .replace_all(sql, |caps: &regex::Captures<'_>| {
            let path = PathBuf::from(&caps[1]);
            if let Some((name, _)) = bindings.iter().find(|(_, p)| *p == path) {
                return name.clone();
            }
            let name = format!("csv_{}", bindings.len());
            bindings.push((name.clone(), path));
            name
        })
        .into_owned();

    (rewritten, bindings)
}

fn query_error(e: PolarsError) -> PipelineError {
    PipelineError::QueryError(e.to_string())
}

/// Run a query on the blocking pool. A panic inside the engine counts as a
/// failed query so the caller can retry it.
async fn run_blocking_query<F>(query: F) -> Result<QueryOutput>
where
    F: FnOnce() -> Result<QueryOutput> + Send + 'static,
{
    tokio::task::spawn_blocking(query)
        .await
        .map_err(|e| PipelineError::QueryError(format!("Query engine aborted: {}", e)))?
}

pub struct PolarsEngine {
    infer_schema_rows: usize,
}

impl PolarsEngine {
    pub fn new() -> Self {
        Self {
            infer_schema_rows: 1000,
        }
    }

    fn scan_csv(path: &Path, infer_schema_rows: usize) -> Result<LazyFrame> {
        if !path.is_file() {
            return Err(PipelineError::QueryError(format!(
                "No such file: {}",
                path.display()
            )));
        }

        LazyCsvReader::new(path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(infer_schema_rows))
            .finish()
            .map_err(query_error)
    }

    fn run_sql(sql: &str, infer_schema_rows: usize) -> Result<QueryOutput> {
        let (rewritten, bindings) = bind_tables(sql);
        if bindings.is_empty() {
            return Err(PipelineError::QueryError(
                "Query does not read from a read_csv_auto('<path>') table".to_string(),
            ));
        }

        let mut ctx = SQLContext::new();
        for (name, path) in &bindings {
            ctx.register(name, Self::scan_csv(path, infer_schema_rows)?);
        }

        debug!(sql = %rewritten, tables = bindings.len(), "Executing rewritten query");

        let df = ctx
            .execute(&rewritten)
            .and_then(|lf| lf.collect())
            .map_err(query_error)?;

        Ok(QueryOutput {
            columns: df.get_column_names().iter().map(|c| c.to_string()).collect(),
            row_count: df.height(),
            rendered: format!("{}", df),
        })
    }
}

impl Default for PolarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryEngine for PolarsEngine {
    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let sql = sql.to_string();
        let infer_schema_rows = self.infer_schema_rows;

        let output = run_blocking_query(move || Self::run_sql(&sql, infer_schema_rows)).await?;

        info!(rows = output.row_count, columns = ?output.columns, "Query executed");
        Ok(output)
    }

    async fn describe(&self, location: &Path) -> Result<Vec<(String, String)>> {
        let location = location.to_path_buf();
        let infer_schema_rows = self.infer_schema_rows;

        tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>> {
            let df = Self::scan_csv(&location, infer_schema_rows)?
                .limit(1)
                .collect()
                .map_err(query_error)?;

            Ok(df
                .get_columns()
                .iter()
                .map(|s| (s.name().to_string(), s.dtype().to_string()))
                .collect())
        })
        .await
        .map_err(|e| PipelineError::TaskError(e.to_string()))?
    }
}
