//! FRED question agent
//!
//! Answers a natural-language question about an economic time series:
//! - Generates search keywords and fans out concurrent catalog searches
//! - Picks one listed series and downloads its observations
//! - Extracts the CSV and infers a schema from a bounded random sample
//! - Synthesizes SQL, executes it and retries with error feedback
//!
//! PIPELINE:
//! QUESTION → KEYWORDS → CANDIDATES → SERIES → ARCHIVE → CSV → SCHEMA → SQL → ANSWER

pub mod api;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod inference;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod schema;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::Orchestrator;
