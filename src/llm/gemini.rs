//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.
//! Structured requests set `response_mime_type` and `response_schema`.

use super::{GenerationRequest, Generator};
use crate::config::LlmConfig;
use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!(
                "{}/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> GeminiRequest {
        let structured = request.schema.is_some();

        GeminiRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: structured.then(|| "application/json".to_string()),
                response_schema: request.schema.as_ref().map(to_gemini_schema),
            },
            system_instruction: request.system.as_ref().map(|text| SystemInstruction {
                parts: vec![Part { text: text.clone() }],
            }),
        }
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::ConfigError(
                "LLM_API_KEY (or GEMINI_API_KEY) not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let body = self.build_request(request);

        info!(structured = request.schema.is_some(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                PipelineError::GenerationError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(PipelineError::GenerationError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            PipelineError::GenerationError(format!("Gemini parse error: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| PipelineError::GenerationError("Empty response from Gemini".to_string()))?;

        if let Some(usage) = &gemini_response.usage_metadata {
            info!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        Ok(text)
    }
}

/// Gemini's schema dialect spells types in upper case (`OBJECT`, `STRING`)
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let converted = match (key.as_str(), value) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), converted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use serde_json::json;

    fn client() -> GeminiClient {
        GeminiClient::new(&LlmConfig::default_for(LlmProvider::Gemini)).unwrap()
    }

    #[test]
    fn test_structured_request_serialization() {
        let request = GenerationRequest {
            system: Some("You pick series".to_string()),
            prompt: "What is the unemployment rate?".to_string(),
            schema: Some(json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            })),
        };

        let json = serde_json::to_value(client().build_request(&request)).unwrap();
        assert_eq!(
            json["generation_config"]["response_mime_type"],
            "application/json"
        );
        assert_eq!(json["generation_config"]["response_schema"]["type"], "OBJECT");
        assert_eq!(
            json["generation_config"]["response_schema"]["properties"]["id"]["type"],
            "STRING"
        );
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "You pick series");
    }

    #[test]
    fn test_text_request_has_no_schema() {
        let request = GenerationRequest {
            system: None,
            prompt: "SELECT?".to_string(),
            schema: None,
        };

        let json = serde_json::to_string(&client().build_request(&request)).unwrap();
        assert!(json.contains("SELECT?"));
        assert!(!json.contains("response_schema"));
        assert!(!json.contains("system_instruction"));
    }

    #[test]
    fn test_response_parsing() {
        let raw = json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": "{\"id\":\"UNRATE\"}" }] } }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 5 }
        });

        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "{\"id\":\"UNRATE\"}");
        assert_eq!(parsed.usage_metadata.unwrap().candidates_token_count, 5);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let request = GenerationRequest::default();
        let result = client().generate(&request).await;
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }
}
