//! Core data models for the question-answering pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

//
// ================= Type Tags =================
//

/// Semantic type inferred for a column from sampled values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Integer,
    Float,
    Date,
    String,
    Empty,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Date => "date",
            TypeTag::String => "string",
            TypeTag::Empty => "empty",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Catalog =================
//

/// A search hit eligible for selection as the data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub id: String,
}

/// The single candidate picked by the selection step
pub type ChosenSeries = Candidate;

/// Raw series entry as returned by the catalog search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSeries {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Catalog search payload (`seriess` is the catalog's own spelling)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogResult {
    #[serde(default)]
    pub seriess: Vec<CatalogSeries>,
}

impl CatalogResult {
    pub fn candidates(&self) -> Vec<Candidate> {
        self.seriess
            .iter()
            .map(|s| Candidate {
                title: s.title.clone(),
                id: s.id.clone(),
            })
            .collect()
    }
}

/// Outcome of an observation download
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DownloadOutcome {
    Downloaded { archive_path: PathBuf },
    Failed { error: String },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Downloaded { .. })
    }
}

//
// ================= Schema =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub columns: Vec<String>,
    pub types: HashMap<String, TypeTag>,
    pub sample_size: usize,
}

impl Schema {
    /// Render as `column: type` lines in header order
    pub fn describe(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let tag = self.types.get(c).copied().unwrap_or(TypeTag::Empty);
                format!("- {}: {}", c, tag)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Handoff from the acquisition stages to the query stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInfo {
    pub location: PathBuf,
    pub schema: Schema,
}

//
// ================= Query =================
//

/// Result of running a query against the analytical engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub rendered: String,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub question: String,
    pub series: Option<ChosenSeries>,
    pub database: Option<DatabaseInfo>,
    pub answer: Option<String>,
    pub trace: Vec<String>,
    pub execution_time_ms: u64,
}
