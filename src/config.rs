//! Environment-driven configuration
//!
//! Binaries load `.env` through dotenv before calling `PipelineConfig::from_env`.

use crate::error::PipelineError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    /// Any server speaking the OpenAI chat-completions protocol (Ollama included)
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "openai" | "ollama" => Ok(LlmProvider::OpenAi),
            other => Err(PipelineError::ConfigError(format!(
                "Unknown LLM_PROVIDER '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
    /// Extra attempts granted to a rejected structured output
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn default_for(provider: LlmProvider) -> Self {
        let (model, base_url) = match provider {
            LlmProvider::Gemini => (
                "gemini-2.0-flash",
                "https://generativelanguage.googleapis.com/v1beta/models",
            ),
            LlmProvider::OpenAi => ("llama3.1", "http://localhost:11434/v1"),
        };

        Self {
            provider,
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key: String::new(),
            temperature: 0.2,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub api_key: String,
    pub search_limit: usize,
    pub observations_file_type: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stlouisfed.org/fred".to_string(),
            api_key: String::new(),
            search_limit: 20,
            observations_file_type: "txt".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog: CatalogConfig,
    pub llm: LlmConfig,
    pub data_dir: PathBuf,
    pub csv_dir: PathBuf,
    /// Where the rendered candidate list is written; `None` disables it
    pub candidates_output: Option<PathBuf>,
    pub max_keywords: usize,
    pub candidate_pool: usize,
    pub schema_sample_size: usize,
    pub max_query_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            llm: LlmConfig::default_for(LlmProvider::Gemini),
            data_dir: PathBuf::from("data"),
            csv_dir: PathBuf::from("data/csv"),
            candidates_output: Some(PathBuf::from("md_output/seriess.md")),
            max_keywords: 5,
            candidate_pool: 20,
            schema_sample_size: 100,
            max_query_attempts: 3,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(key) = env::var("FRED_API_KEY") {
            config.catalog.api_key = key;
        }
        if let Ok(url) = env::var("FRED_BASE_URL") {
            config.catalog.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(limit) = parse_var("FRED_SEARCH_LIMIT")? {
            config.catalog.search_limit = limit;
        }
        if let Ok(file_type) = env::var("FRED_OBSERVATIONS_FILE_TYPE") {
            config.catalog.observations_file_type = file_type;
        }

        if let Some(provider) = parse_var::<LlmProvider>("LLM_PROVIDER")? {
            config.llm = LlmConfig::default_for(provider);
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(url) = env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        config.llm.api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .unwrap_or_default();
        if let Some(temperature) = parse_var("LLM_TEMPERATURE")? {
            config.llm.temperature = temperature;
        }
        if let Some(retries) = parse_var("LLM_MAX_RETRIES")? {
            config.llm.max_retries = retries;
        }

        if let Ok(dir) = env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("CSV_DIR") {
            config.csv_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("CANDIDATES_OUTPUT") {
            config.candidates_output = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(n) = parse_var("MAX_KEYWORDS")? {
            config.max_keywords = n;
        }
        if let Some(n) = parse_var("CANDIDATE_POOL")? {
            config.candidate_pool = n;
        }
        if let Some(n) = parse_var("SCHEMA_SAMPLE_SIZE")? {
            config.schema_sample_size = n;
        }
        if let Some(n) = parse_var("MAX_QUERY_ATTEMPTS")? {
            config.max_query_attempts = n;
        }

        Ok(config)
    }
}

/// Read and parse an optional variable; present but malformed is an error
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            PipelineError::ConfigError(format!("Invalid {}='{}': {}", name, raw, e))
        }),
        Err(_) => Ok(None),
    }
}
