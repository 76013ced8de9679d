//! Text-generation capability
//!
//! The pipeline only sees the `Generator` trait. `StructuredGenerator`
//! layers the bounded-retry output contract on top: a response that does
//! not parse or fails validation is sent back with the rejection reason.

use crate::config::{LlmConfig, LlmProvider};
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod gemini;
pub mod openai;
pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// JSON schema the response must follow; `None` requests plain text
    pub schema: Option<Value>,
}

/// Trait for a text-generation backend
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Output types with a JSON schema and an intrinsic validity check
pub trait StructuredOutput: DeserializeOwned + Send {
    fn json_schema() -> Value;

    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Build the generator selected by configuration
pub fn generator_from_config(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match config.provider {
        LlmProvider::Gemini => Arc::new(GeminiClient::new(config)?),
        LlmProvider::OpenAi => Arc::new(OpenAiCompatibleClient::new(config)?),
    };
    Ok(generator)
}

pub struct StructuredGenerator {
    generator: Arc<dyn Generator>,
    max_retries: u32,
}

impl StructuredGenerator {
    pub fn new(generator: Arc<dyn Generator>, max_retries: u32) -> Self {
        Self {
            generator,
            max_retries,
        }
    }

    /// Plain-text generation, no output contract
    pub async fn text(&self, system: &str, prompt: &str) -> Result<String> {
        let request = GenerationRequest {
            system: Some(system.to_string()),
            prompt: prompt.to_string(),
            schema: None,
        };
        self.generator.generate(&request).await
    }

    pub async fn structured<T: StructuredOutput>(&self, system: &str, prompt: &str) -> Result<T> {
        self.structured_with(system, prompt, |_: &T| Ok(())).await
    }

    /// Structured generation with an additional caller-supplied check.
    ///
    /// Backend failures are returned immediately; only rejected outputs
    /// consume the retry budget.
    pub async fn structured_with<T, F>(&self, system: &str, prompt: &str, check: F) -> Result<T>
    where
        T: StructuredOutput,
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync,
    {
        let schema = T::json_schema();
        let attempts = self.max_retries + 1;
        let mut rejection: Option<String> = None;

        for attempt in 1..=attempts {
            let prompt = match &rejection {
                Some(reason) => format!(
                    "{}\n\nYour previous response was rejected: {}\nRespond again with ONLY a JSON object in the required format.",
                    prompt, reason
                ),
                None => prompt.to_string(),
            };

            let request = GenerationRequest {
                system: Some(system.to_string()),
                prompt,
                schema: Some(schema.clone()),
            };

            let raw = self.generator.generate(&request).await?;

            let outcome = parse_json_output::<T>(&raw)
                .and_then(|value| value.validate().map(|_| value))
                .and_then(|value| check(&value).map(|_| value));

            match outcome {
                Ok(value) => {
                    debug!(attempt, "Structured output accepted");
                    return Ok(value);
                }
                Err(reason) => {
                    warn!(attempt, reason = %reason, "Structured output rejected");
                    rejection = Some(reason);
                }
            }
        }

        Err(PipelineError::ValidationError {
            attempts,
            reason: rejection.unwrap_or_default(),
        })
    }
}

/// Parse a model response as JSON, tolerating markdown fences and prose
/// around the outermost object.
pub fn parse_json_output<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    let cleaned = strip_code_fence(raw);

    if let Ok(value) = serde_json::from_str::<T>(cleaned) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) else {
        return Err(format!("response is not JSON: {}", truncate(raw, 200)));
    };
    if end < start {
        return Err(format!("response is not JSON: {}", truncate(raw, 200)));
    }

    serde_json::from_str::<T>(&cleaned[start..=end])
        .map_err(|e| format!("response does not match the expected format: {}", e))
}

/// Remove a surrounding ```lang ... ``` fence if present
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Replays canned responses in order.
/// Keeps the pipeline runnable without a model behind it.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn from_results(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first
    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().await.push(request.clone());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(PipelineError::GenerationError(
                    "No scripted response left".to_string(),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pick {
        name: String,
    }

    impl StructuredOutput for Pick {
        fn json_schema() -> Value {
            json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            })
        }

        fn validate(&self) -> std::result::Result<(), String> {
            if self.name.is_empty() {
                Err("name must not be empty".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"name\": \"UNRATE\"}\n```";
        let pick: Pick = parse_json_output(raw).unwrap();
        assert_eq!(pick.name, "UNRATE");
    }

    #[test]
    fn test_parse_json_embedded_in_prose() {
        let raw = "Sure! Here it is: {\"name\": \"GDP\"} Hope that helps.";
        let pick: Pick = parse_json_output(raw).unwrap();
        assert_eq!(pick.name, "GDP");
    }

    #[test]
    fn test_parse_rejects_plain_text() {
        assert!(parse_json_output::<Pick>("no json here").is_err());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("  SELECT 1 "), "SELECT 1");
    }

    #[tokio::test]
    async fn test_retries_until_valid() {
        let scripted = Arc::new(ScriptedGenerator::new([
            "not json",
            r#"{"name": ""}"#,
            r#"{"name": "UNRATE"}"#,
        ]));
        let llm = StructuredGenerator::new(scripted.clone(), 3);

        let pick: Pick = llm.structured("system", "pick one").await.unwrap();
        assert_eq!(pick.name, "UNRATE");

        let requests = scripted.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(requests[0].schema.is_some());
        assert!(requests[2].prompt.contains("name must not be empty"));
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let scripted = Arc::new(ScriptedGenerator::new([
            r#"{"name": ""}"#,
            r#"{"name": ""}"#,
            r#"{"name": "never reached"}"#,
        ]));
        let llm = StructuredGenerator::new(scripted.clone(), 1);

        let result = llm.structured::<Pick>("system", "pick one").await;
        assert!(matches!(
            result,
            Err(PipelineError::ValidationError { attempts: 2, .. })
        ));
        assert_eq!(scripted.remaining().await, 1);
    }

    #[tokio::test]
    async fn test_contextual_check_is_applied() {
        let scripted = Arc::new(ScriptedGenerator::new([
            r#"{"name": "MADEUP"}"#,
            r#"{"name": "UNRATE"}"#,
        ]));
        let llm = StructuredGenerator::new(scripted, 2);

        let pick: Pick = llm
            .structured_with("system", "pick one", |p: &Pick| {
                if p.name == "UNRATE" {
                    Ok(())
                } else {
                    Err(format!("{} is not listed", p.name))
                }
            })
            .await
            .unwrap();
        assert_eq!(pick.name, "UNRATE");
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_retried() {
        let scripted = Arc::new(ScriptedGenerator::from_results(vec![
            Err(PipelineError::GenerationError("offline".to_string())),
            Ok(r#"{"name": "UNRATE"}"#.to_string()),
        ]));
        let llm = StructuredGenerator::new(scripted.clone(), 3);

        let result = llm.structured::<Pick>("system", "pick one").await;
        assert!(matches!(result, Err(PipelineError::GenerationError(_))));
        assert_eq!(scripted.remaining().await, 1);
    }
}
