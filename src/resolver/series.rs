//! Question → chosen catalog series
//!
//! KEYWORDS → FAN-OUT SEARCH → FLATTEN → RENDER → SELECT

use super::absent_on_generation_failure;
use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::fanout::TaskGroup;
use crate::llm::{StructuredGenerator, StructuredOutput};
use crate::models::{Candidate, ChosenSeries};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEYWORD_SYSTEM_PROMPT: &str = "\
You are an agent that generates keywords from user input.
Use the user question provided to generate keywords to search for in the FRED API.
Return the keyword phrases ranked by relevance to the question, most relevant first.
Respond ONLY with a JSON object containing a 'keywords' list. No other text.";

const SELECTION_SYSTEM_PROMPT: &str = "\
You are an agent that picks one series from a list of series that best matches the question provided by the user.
Respond ONLY with a JSON object containing 'title' and 'id' fields. No other text.";

/// Ranked keyword phrases produced for a question
#[derive(Debug, Clone, Deserialize)]
pub struct Keywords {
    pub keywords: Vec<String>,
}

impl StructuredOutput for Keywords {
    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "keywords": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "The keywords to search for in the FRED API."
                }
            },
            "required": ["keywords"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err("Please respond with a non-empty list of keywords".to_string());
        }
        Ok(())
    }
}

impl StructuredOutput for Candidate {
    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "The title of the series." },
                "id": { "type": "string", "description": "The id of the series." }
            },
            "required": ["title", "id"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.title.trim().is_empty() || self.id.trim().is_empty() {
            return Err("Please respond with both a title and id.".to_string());
        }
        Ok(())
    }
}

/// URL-encode each keyword, spaces becoming a literal `+`
pub fn sanitize_keywords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| urlencoding::encode(&k.as_ref().replace(' ', "+")).replace("%2B", "+"))
        .collect()
}

/// Numbered list in rank order, one title/id pair per entry
pub fn render_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. title: {}\n\t- id: {}\n", i + 1, c.title, c.id))
        .collect()
}

pub struct SeriesResolver {
    llm: Arc<StructuredGenerator>,
    catalog: Arc<dyn Catalog>,
    max_keywords: usize,
    candidate_pool: usize,
    candidates_output: Option<PathBuf>,
}

impl SeriesResolver {
    pub fn new(
        llm: Arc<StructuredGenerator>,
        catalog: Arc<dyn Catalog>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            llm,
            catalog,
            max_keywords: config.max_keywords,
            candidate_pool: config.candidate_pool,
            candidates_output: config.candidates_output.clone(),
        }
    }

    /// Resolve a question to one listed series.
    ///
    /// `Ok(None)` covers every expected miss: no keywords, no search hits,
    /// or a selection that never validated. Catalog transport errors abort.
    pub async fn resolve(&self, question: &str) -> Result<Option<ChosenSeries>> {
        let Some(keywords) = self.generate_keywords(question).await? else {
            return Ok(None);
        };

        let candidates = self.search_candidates(&keywords).await?;
        if candidates.is_empty() {
            info!("No candidates found for any keyword");
            return Ok(None);
        }

        self.pick_series(question, &candidates).await
    }

    /// Sanitized keywords, capped at the fan-out limit
    pub async fn generate_keywords(&self, question: &str) -> Result<Option<Vec<String>>> {
        let generated = self
            .llm
            .structured::<Keywords>(KEYWORD_SYSTEM_PROMPT, question)
            .await;
        let Some(generated) = absent_on_generation_failure("keywords", generated)? else {
            return Ok(None);
        };

        let raw: Vec<&str> = generated
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();

        let mut keywords = sanitize_keywords(&raw);
        keywords.truncate(self.max_keywords);

        info!(?keywords, "Keywords generated");
        Ok(Some(keywords))
    }

    /// One concurrent search per keyword; any failed search fails the whole set.
    pub async fn search_candidates(&self, keywords: &[String]) -> Result<Vec<Candidate>> {
        let mut group = TaskGroup::new();

        for keyword in keywords.iter().take(self.max_keywords) {
            let catalog = Arc::clone(&self.catalog);
            let keyword = keyword.clone();
            group.spawn(async move {
                let result = catalog.search(&keyword).await?;
                debug!(keyword = %keyword, hits = result.seriess.len(), "Keyword search returned");
                Ok(result.candidates())
            });
        }

        let per_keyword = group.join_all().await?;

        let mut candidates: Vec<Candidate> = per_keyword.into_iter().flatten().collect();
        candidates.truncate(self.candidate_pool);

        info!(candidates = candidates.len(), "Candidates collected");
        self.write_candidates(&candidates).await;

        Ok(candidates)
    }

    /// Ask the capability to choose; the choice must be one of `candidates`.
    pub async fn pick_series(
        &self,
        question: &str,
        candidates: &[Candidate],
    ) -> Result<Option<ChosenSeries>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            "Given a question {}, pick one series that best answers the question from the following markdown list:\n\n{}\n\
             Respond with ONLY a JSON object in this exact format, nothing else:\n\
             {{\"title\": \"Series Title Here\", \"id\": \"series-id-here\"}}",
            question,
            render_candidates(candidates)
        );

        let listed = |pick: &Candidate| {
            if candidates.iter().any(|c| c.id == pick.id.trim()) {
                Ok(())
            } else {
                Err(format!(
                    "'{}' is not one of the listed series ids. Pick an id from the list.",
                    pick.id
                ))
            }
        };

        let chosen = self
            .llm
            .structured_with::<Candidate, _>(SELECTION_SYSTEM_PROMPT, &prompt, listed)
            .await;

        // The listed entry is returned, never the model's own title.
        let chosen = absent_on_generation_failure("selection", chosen)?.and_then(|pick| {
            candidates
                .iter()
                .find(|c| c.id == pick.id.trim())
                .cloned()
        });

        match &chosen {
            Some(series) => info!(series_id = %series.id, title = %series.title, "Series chosen"),
            None => warn!("No series chosen"),
        }
        Ok(chosen)
    }

    /// Write the rendered list for inspection; failures are only logged
    async fn write_candidates(&self, candidates: &[Candidate]) {
        let Some(path) = &self.candidates_output else {
            return;
        };

        let written = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, render_candidates(candidates)).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Could not write candidate list");
        }
    }
}
