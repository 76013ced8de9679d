//! Catalog access: series search and observation downloads
//!
//! Transport failures (unreachable host, non-2xx) are errors. A download
//! that arrives but cannot be written is a `DownloadOutcome::Failed` so the
//! pipeline can branch on it.

use crate::config::CatalogConfig;
use crate::error::PipelineError;
use crate::models::{Candidate, CatalogResult, CatalogSeries, DownloadOutcome};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hard cap on results requested per keyword search
pub const MAX_SEARCH_RESULTS: usize = 20;

/// Trait for the external series catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Search with already URL-safe keywords
    async fn search(&self, keywords: &str) -> Result<CatalogResult>;

    /// Download the observation archive of a series for one pipeline run
    async fn fetch_observations(&self, series_id: &str, run_id: Uuid) -> Result<DownloadOutcome>;
}

/// `{data_dir}/{run_id}/{series_id}.zip`, with the id reduced to path-safe characters
pub fn archive_path(data_dir: &Path, run_id: Uuid, series_id: &str) -> PathBuf {
    let safe_id: String = series_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    data_dir
        .join(run_id.to_string())
        .join(format!("{}.zip", safe_id))
}

async fn write_archive(path: PathBuf, bytes: &[u8]) -> DownloadOutcome {
    let written = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await
    }
    .await;

    match written {
        Ok(()) => {
            info!(path = %path.display(), bytes = bytes.len(), "Archive written");
            DownloadOutcome::Downloaded { archive_path: path }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write archive");
            DownloadOutcome::Failed {
                error: format!("Failed to write {}: {}", path.display(), e),
            }
        }
    }
}

//
// ================= FRED =================
//

pub struct FredClient {
    client: Client,
    base_url: String,
    api_key: String,
    search_limit: usize,
    file_type: String,
    data_dir: PathBuf,
}

impl FredClient {
    pub fn new(config: &CatalogConfig, data_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            search_limit: config.search_limit.clamp(1, MAX_SEARCH_RESULTS),
            file_type: config.observations_file_type.clone(),
            data_dir,
        })
    }

    fn key_param(&self) -> String {
        if self.api_key.is_empty() {
            String::new()
        } else {
            format!("&api_key={}", self.api_key)
        }
    }

    /// GET `url` and return the body of a 2xx response
    async fn get_bytes(&self, url: &str, what: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            PipelineError::CatalogError(format!("{} request failed: {}", what, e))
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            PipelineError::CatalogError(format!("{} response unreadable: {}", what, e))
        })?;

        if !status.is_success() {
            return Err(PipelineError::CatalogError(format!(
                "{} returned {}: {}",
                what,
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Catalog for FredClient {
    async fn search(&self, keywords: &str) -> Result<CatalogResult> {
        // Keywords are pre-encoded and go into the URL verbatim.
        let url = format!(
            "{}/series/search?search_text={}&limit={}&file_type=json{}",
            self.base_url,
            keywords,
            self.search_limit,
            self.key_param()
        );

        debug!(keywords, "Searching catalog");
        let body = self.get_bytes(&url, "Series search").await?;
        let result: CatalogResult = serde_json::from_slice(&body)?;

        info!(keywords, hits = result.seriess.len(), "Catalog search complete");
        Ok(result)
    }

    async fn fetch_observations(&self, series_id: &str, run_id: Uuid) -> Result<DownloadOutcome> {
        let url = format!(
            "{}/series/observations?series_id={}&file_type={}{}",
            self.base_url,
            urlencoding::encode(series_id),
            self.file_type,
            self.key_param()
        );

        info!(series_id, %run_id, "Downloading observations");
        let bytes = self.get_bytes(&url, "Observation download").await?;

        Ok(write_archive(archive_path(&self.data_dir, run_id, series_id), &bytes).await)
    }
}

//
// ================= In-Memory =================
//

/// In-memory catalog for development and tests.
///
/// A series matches a search when its title contains every keyword word.
pub struct InMemoryCatalog {
    series: Vec<Candidate>,
    archives: HashMap<String, Vec<u8>>,
    failing_keywords: HashSet<String>,
    delays: HashMap<String, Duration>,
    data_dir: PathBuf,
    searches: Mutex<Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            series: Vec::new(),
            archives: HashMap::new(),
            failing_keywords: HashSet::new(),
            delays: HashMap::new(),
            data_dir,
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_series(mut self, id: &str, title: &str) -> Self {
        self.series.push(Candidate {
            title: title.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn with_archive(mut self, id: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(id.to_string(), bytes);
        self
    }

    /// Searches for exactly this (sanitized) keyword fail as a transport error
    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.failing_keywords.insert(keyword.to_string());
        self
    }

    pub fn with_delay(mut self, keyword: &str, delay: Duration) -> Self {
        self.delays.insert(keyword.to_string(), delay);
        self
    }

    /// Keywords searched so far, in call order
    pub async fn searches(&self) -> Vec<String> {
        self.searches.lock().await.clone()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn search(&self, keywords: &str) -> Result<CatalogResult> {
        self.searches.lock().await.push(keywords.to_string());

        if let Some(delay) = self.delays.get(keywords) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing_keywords.contains(keywords) {
            return Err(PipelineError::CatalogError(format!(
                "Series search for '{}' unreachable",
                keywords
            )));
        }

        let decoded = urlencoding::decode(&keywords.replace('+', " "))
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|_| keywords.to_lowercase());
        let words: Vec<&str> = decoded.split_whitespace().collect();

        let seriess = self
            .series
            .iter()
            .filter(|s| {
                let title = s.title.to_lowercase();
                !words.is_empty() && words.iter().all(|w| title.contains(*w))
            })
            .take(MAX_SEARCH_RESULTS)
            .map(|s| CatalogSeries {
                id: s.id.clone(),
                title: s.title.clone(),
                extra: serde_json::Map::new(),
            })
            .collect();

        Ok(CatalogResult { seriess })
    }

    async fn fetch_observations(&self, series_id: &str, run_id: Uuid) -> Result<DownloadOutcome> {
        let bytes = self.archives.get(series_id).ok_or_else(|| {
            PipelineError::CatalogError(format!("Observation download returned 404 for {}", series_id))
        })?;

        Ok(write_archive(archive_path(&self.data_dir, run_id, series_id), bytes).await)
    }
}
