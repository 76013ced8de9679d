//! Error types for the question-answering pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Output rejected after {attempts} attempt(s): {reason}")]
    ValidationError { attempts: u32, reason: String },

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
