//! (dataset, question) → answer
//!
//! GENERATE → CLEAN → EXECUTE → (feedback → GENERATE)* → FORMULATE

use super::absent_on_generation_failure;
use crate::engine::{table_binding, QueryEngine};
use crate::error::PipelineError;
use crate::llm::{strip_code_fence, StructuredGenerator};
use crate::models::{DatabaseInfo, QueryOutput};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ANSWER_SYSTEM_PROMPT: &str = "\
You are an agent that answers a user question from the result of an SQL query.
Answer in one or two plain sentences using only the values in the result.";

/// Remove fences, backslashes and trailing semicolons from generated SQL
pub fn clean_sql(raw: &str) -> String {
    strip_code_fence(raw)
        .replace('\\', "")
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string()
}

pub struct QueryResolver {
    llm: Arc<StructuredGenerator>,
    engine: Arc<dyn QueryEngine>,
    max_attempts: u32,
}

impl QueryResolver {
    pub fn new(llm: Arc<StructuredGenerator>, engine: Arc<dyn QueryEngine>, max_attempts: u32) -> Self {
        Self {
            llm,
            engine,
            max_attempts: max_attempts.max(1),
        }
    }

    /// System context naming the bound table and its columns.
    /// A live description of the file wins over the stored schema.
    pub async fn system_prompt(&self, info: &DatabaseInfo) -> String {
        let schema = match self.engine.describe(&info.location).await {
            Ok(columns) if !columns.is_empty() => columns
                .iter()
                .map(|(name, dtype)| format!("- {}: {}", name, dtype))
                .collect::<Vec<_>>()
                .join("\n"),
            Ok(_) => info.schema.describe(),
            Err(e) => {
                debug!(error = %e, "Live schema unavailable, using stored schema");
                info.schema.describe()
            }
        };

        format!(
            "You are an agent that generates SQL queries from user question.\n\
             The table name is {}\n\
             The database schema is the following:\n\n\
             {}\n\n\
             Use the user question provided to generate SQL queries to query a database.\n\
             Respond with only the SQL query. Do not include any other text.",
            table_binding(&info.location),
            schema
        )
    }

    /// Answer the question or return `None` once the attempts run out
    pub async fn resolve(&self, info: &DatabaseInfo, question: &str) -> Result<Option<String>> {
        let system = self.system_prompt(info).await;
        let mut feedback: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = match &feedback {
                Some(previous) => format!("{}\n\n{}", question, previous),
                None => question.to_string(),
            };

            let generated = self.llm.text(&system, &prompt).await;
            let Some(raw) = absent_on_generation_failure("sql", generated)? else {
                return Ok(None);
            };

            let sql = clean_sql(&raw);
            if sql.is_empty() {
                warn!(attempt, "Generated query was empty");
                feedback = Some(
                    "Your previous response contained no SQL query. Respond with only the SQL query."
                        .to_string(),
                );
                continue;
            }

            debug!(attempt, sql = %sql, "Executing generated query");

            match self.engine.execute(&sql).await {
                Ok(output) => {
                    info!(attempt, rows = output.row_count, "Query succeeded");
                    return Ok(Some(self.formulate_answer(question, &sql, &output).await));
                }
                Err(PipelineError::QueryError(reason)) => {
                    warn!(attempt, error = %reason, "Query failed");
                    feedback = Some(format!(
                        "The previous query failed.\nQuery:\n{}\nError:\n{}\n\
                         Write a corrected SQL query against the same table.",
                        sql, reason
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts = self.max_attempts, "No query succeeded");
        Ok(None)
    }

    /// Natural-language answer; the rendered result stands in when that fails
    async fn formulate_answer(&self, question: &str, sql: &str, output: &QueryOutput) -> String {
        let prompt = format!(
            "Question: {}\n\nQuery:\n{}\n\nResult:\n{}",
            question, sql, output.rendered
        );

        match self.llm.text(ANSWER_SYSTEM_PROMPT, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => output.rendered.clone(),
            Err(e) => {
                warn!(error = %e, "Answer formulation failed, returning raw result");
                output.rendered.clone()
            }
        }
    }
}
