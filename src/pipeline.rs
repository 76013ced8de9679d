//! Main orchestrator - sequences the pipeline stages
//!
//! QUESTION → SERIES → DOWNLOAD → EXTRACT → SCHEMA → QUERY → ANSWER
//!
//! Every stage short-circuits to an absent result. `run` never fails:
//! terminal errors are logged and recorded in the report trace.

use crate::archive::extract_tabular_files;
use crate::catalog::{Catalog, FredClient};
use crate::config::PipelineConfig;
use crate::engine::{PolarsEngine, QueryEngine};
use crate::error::PipelineError;
use crate::llm::{generator_from_config, Generator, StructuredGenerator};
use crate::models::{ChosenSeries, DatabaseInfo, DownloadOutcome, RunReport};
use crate::resolver::{QueryResolver, SeriesResolver};
use crate::schema::extract_schema_with;
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Orchestrator {
    series_resolver: SeriesResolver,
    query_resolver: QueryResolver,
    catalog: Arc<dyn Catalog>,
    csv_dir: PathBuf,
    schema_sample_size: usize,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        generator: Arc<dyn Generator>,
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        let llm = Arc::new(StructuredGenerator::new(generator, config.llm.max_retries));

        Self {
            series_resolver: SeriesResolver::new(Arc::clone(&llm), Arc::clone(&catalog), config),
            query_resolver: QueryResolver::new(llm, engine, config.max_query_attempts),
            catalog,
            csv_dir: config.csv_dir.clone(),
            schema_sample_size: config.schema_sample_size,
        }
    }

    /// FRED catalog, configured LLM backend and polars engine
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let generator = generator_from_config(&config.llm)?;
        let catalog: Arc<dyn Catalog> =
            Arc::new(FredClient::new(&config.catalog, config.data_dir.clone())?);
        let engine: Arc<dyn QueryEngine> = Arc::new(PolarsEngine::new());

        info!(
            provider = ?config.llm.provider,
            model = %config.llm.model,
            catalog = %config.catalog.base_url,
            "Orchestrator configured"
        );

        Ok(Self::new(config, generator, catalog, engine))
    }

    /// Resolve a series for the question and load it as a queryable file
    pub async fn get_data_from_question(
        &self,
        question: &str,
        run_id: Uuid,
    ) -> Result<Option<DatabaseInfo>> {
        let Some(series) = self.series_resolver.resolve(question).await? else {
            return Ok(None);
        };
        self.load_series(&series, run_id, &mut Vec::new()).await
    }

    pub async fn generate_and_execute_sql(
        &self,
        info: &DatabaseInfo,
        question: &str,
    ) -> Result<Option<String>> {
        self.query_resolver.resolve(info, question).await
    }

    /// Run the whole pipeline for one question
    pub async fn run(&self, question: &str) -> RunReport {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();

        info!(%run_id, question, "Orchestrator: starting run");

        let mut report = RunReport {
            run_id,
            question: question.to_string(),
            series: None,
            database: None,
            answer: None,
            trace: vec!["INPUT: Question received".to_string()],
            execution_time_ms: 0,
        };

        if let Err(e) = self.run_stages(&mut report).await {
            error!(%run_id, error = %e, "Run aborted");
            report.trace.push(format!("ABORTED: {}", e));
        }

        report.execution_time_ms = start_time.elapsed().as_millis() as u64;
        info!(
            %run_id,
            answered = report.answer.is_some(),
            elapsed_ms = report.execution_time_ms,
            "Orchestrator: run finished"
        );
        report
    }

    /// The answer alone, or `None` on any terminal failure
    pub async fn ask(&self, question: &str) -> Option<String> {
        self.run(question).await.answer
    }

    async fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        // === SERIES ===
        report.trace.push("SERIES: Resolving catalog series".to_string());
        let Some(series) = self.series_resolver.resolve(&report.question).await? else {
            report.trace.push("SERIES: No series chosen".to_string());
            return Ok(());
        };
        report
            .trace
            .push(format!("SERIES: Chose {} ({})", series.id, series.title));
        report.series = Some(series.clone());

        // === DATA ===
        let Some(database) = self
            .load_series(&series, report.run_id, &mut report.trace)
            .await?
        else {
            return Ok(());
        };
        report.database = Some(database.clone());

        // === QUERY ===
        report.trace.push("QUERY: Generating and executing SQL".to_string());
        let answer = self
            .generate_and_execute_sql(&database, &report.question)
            .await?;

        match &answer {
            Some(_) => report.trace.push("COMPLETE: Answer produced".to_string()),
            None => report.trace.push("QUERY: No query succeeded".to_string()),
        }
        report.answer = answer;
        Ok(())
    }

    /// Download, extract and profile a series.
    /// Extraction writes under `{csv_dir}/{run_id}` so concurrent runs never share files.
    async fn load_series(
        &self,
        series: &ChosenSeries,
        run_id: Uuid,
        trace: &mut Vec<String>,
    ) -> Result<Option<DatabaseInfo>> {
        trace.push(format!("DOWNLOAD: Fetching observations for {}", series.id));
        let archive_path = match self.catalog.fetch_observations(&series.id, run_id).await? {
            DownloadOutcome::Downloaded { archive_path } => archive_path,
            DownloadOutcome::Failed { error } => {
                warn!(%run_id, series_id = %series.id, error = %error, "Download failed");
                trace.push(format!("DOWNLOAD: Failed - {}", error));
                return Ok(None);
            }
        };

        let dest_dir = self.csv_dir.join(run_id.to_string());
        let files = tokio::task::spawn_blocking(move || extract_tabular_files(&archive_path, &dest_dir))
            .await
            .map_err(|e| PipelineError::TaskError(e.to_string()))?;

        let Some(location) = files.into_iter().next() else {
            warn!(%run_id, series_id = %series.id, "Archive held no tabular files");
            trace.push("EXTRACT: No tabular files extracted".to_string());
            return Ok(None);
        };
        trace.push(format!("EXTRACT: {}", location.display()));

        let sample_size = self.schema_sample_size;
        let schema_path = location.clone();
        let schema = tokio::task::spawn_blocking(move || {
            extract_schema_with(&schema_path, sample_size, &mut rand::thread_rng())
        })
        .await
        .map_err(|e| PipelineError::TaskError(e.to_string()))??;

        info!(
            %run_id,
            location = %location.display(),
            columns = schema.columns.len(),
            sample_size = schema.sample_size,
            "Schema extracted"
        );
        trace.push(format!(
            "SCHEMA: {} columns from {} sampled rows",
            schema.columns.len(),
            schema.sample_size
        ));

        Ok(Some(DatabaseInfo { location, schema }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{archive_path, InMemoryCatalog};
    use crate::llm::ScriptedGenerator;
    use crate::models::{QueryOutput, TypeTag};
    use async_trait::async_trait;
    use std::io::{Cursor, Write};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    const QUESTION: &str = "What is the total unemployment rate in the US in 2022?";

    /// Records executed SQL and always returns one row
    #[derive(Default)]
    struct RecordingEngine {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryEngine for RecordingEngine {
        async fn execute(&self, sql: &str) -> Result<QueryOutput> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(QueryOutput {
                columns: vec!["avg_rate".to_string()],
                row_count: 1,
                rendered: "avg_rate\n3.65".to_string(),
            })
        }

        async fn describe(&self, _location: &Path) -> Result<Vec<(String, String)>> {
            Err(PipelineError::QueryError("no live schema".to_string()))
        }
    }

    fn observations_zip() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("UNRATE_1.txt", FileOptions::default()).unwrap();
        writer.write_all(b"notes").unwrap();
        writer.start_file("UNRATE_1.csv", FileOptions::default()).unwrap();
        writer
            .write_all(b"observation_date,UNRATE\n2022-01-01,4.0\n2022-02-01,3.8\n2022-03-01,3.6\n")
            .unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn config(tmp: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: tmp.join("data"),
            csv_dir: tmp.join("csv"),
            candidates_output: None,
            ..PipelineConfig::default()
        }
    }

    fn catalog(tmp: &Path) -> InMemoryCatalog {
        InMemoryCatalog::new(tmp.join("data"))
            .with_series("UNRATE", "Unemployment Rate")
            .with_series("CPIAUCSL", "Consumer Price Index for All Urban Consumers")
    }

    fn happy_script() -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::new([
            r#"{"keywords": ["Unemployment Rate"]}"#,
            r#"{"title": "Unemployment Rate", "id": "UNRATE"}"#,
            "SELECT AVG(UNRATE) AS avg_rate FROM read_csv_auto('x.csv') WHERE YEAR(observation_date) = 2022",
            "The average unemployment rate in 2022 was 3.65%.",
        ]))
    }

    #[tokio::test]
    async fn test_run_answers_question() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let catalog = Arc::new(catalog(tmp.path()).with_archive("UNRATE", observations_zip()));
        let engine = Arc::new(RecordingEngine::default());

        let orchestrator = Orchestrator::new(&config, happy_script(), catalog, engine.clone());
        let report = orchestrator.run(QUESTION).await;

        assert_eq!(
            report.answer.as_deref(),
            Some("The average unemployment rate in 2022 was 3.65%.")
        );
        assert_eq!(report.series.as_ref().unwrap().id, "UNRATE");

        let database = report.database.unwrap();
        assert_eq!(
            database.location,
            tmp.path()
                .join("csv")
                .join(report.run_id.to_string())
                .join("UNRATE_1.csv")
        );
        assert_eq!(database.schema.sample_size, 3);
        assert_eq!(database.schema.types["observation_date"], TypeTag::Date);
        assert_eq!(database.schema.types["UNRATE"], TypeTag::Float);

        assert!(archive_path(&config.data_dir, report.run_id, "UNRATE").is_file());
        assert_eq!(engine.executed.lock().unwrap().len(), 1);
        assert_eq!(report.trace.first().unwrap(), "INPUT: Question received");
        assert_eq!(report.trace.last().unwrap(), "COMPLETE: Answer produced");
    }

    #[tokio::test]
    async fn test_get_data_from_question() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let catalog = Arc::new(catalog(tmp.path()).with_archive("UNRATE", observations_zip()));
        let orchestrator = Orchestrator::new(
            &config,
            happy_script(),
            catalog,
            Arc::new(RecordingEngine::default()),
        );
        let run_id = Uuid::new_v4();

        let info = orchestrator
            .get_data_from_question(QUESTION, run_id)
            .await
            .unwrap()
            .unwrap();

        assert!(info.location.starts_with(tmp.path().join("csv").join(run_id.to_string())));
        assert_eq!(info.schema.columns, vec!["observation_date", "UNRATE"]);
    }

    #[tokio::test]
    async fn test_missing_archive_aborts_without_answer() {
        let tmp = TempDir::new().unwrap();
        let generator = happy_script();
        let orchestrator = Orchestrator::new(
            &config(tmp.path()),
            generator.clone(),
            Arc::new(catalog(tmp.path())),
            Arc::new(RecordingEngine::default()),
        );

        let report = orchestrator.run(QUESTION).await;

        assert_eq!(report.answer, None);
        assert_eq!(report.series.as_ref().unwrap().id, "UNRATE");
        assert!(report.database.is_none());
        assert!(report.trace.last().unwrap().starts_with("ABORTED"));
        assert_eq!(generator.remaining().await, 2);
    }

    #[tokio::test]
    async fn test_failed_download_write_is_absence() {
        let tmp = TempDir::new().unwrap();
        // data_dir is a plain file, so the archive cannot be written
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let config = PipelineConfig {
            data_dir: blocker.clone(),
            ..config(tmp.path())
        };
        let catalog = Arc::new(
            InMemoryCatalog::new(blocker)
                .with_series("UNRATE", "Unemployment Rate")
                .with_archive("UNRATE", observations_zip()),
        );
        let orchestrator = Orchestrator::new(
            &config,
            happy_script(),
            catalog,
            Arc::new(RecordingEngine::default()),
        );

        let report = orchestrator.run(QUESTION).await;

        assert_eq!(report.answer, None);
        assert!(report.database.is_none());
        assert!(report.trace.last().unwrap().starts_with("DOWNLOAD: Failed"));
    }

    #[tokio::test]
    async fn test_archive_without_csv_is_absence() {
        let tmp = TempDir::new().unwrap();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("README.txt", FileOptions::default()).unwrap();
        writer.write_all(b"no data").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let catalog = Arc::new(catalog(tmp.path()).with_archive("UNRATE", archive));
        let orchestrator = Orchestrator::new(
            &config(tmp.path()),
            happy_script(),
            catalog,
            Arc::new(RecordingEngine::default()),
        );

        let report = orchestrator.run(QUESTION).await;
        assert_eq!(report.answer, None);
        assert_eq!(
            report.trace.last().unwrap(),
            "EXTRACT: No tabular files extracted"
        );
    }

    #[tokio::test]
    async fn test_unreachable_search_yields_absence() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(catalog(tmp.path()).failing_on("Unemployment+Rate"));
        let orchestrator = Orchestrator::new(
            &config(tmp.path()),
            happy_script(),
            catalog,
            Arc::new(RecordingEngine::default()),
        );

        assert_eq!(orchestrator.ask(QUESTION).await, None);
    }

    #[tokio::test]
    async fn test_each_run_gets_its_own_id() {
        let tmp = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let orchestrator = Orchestrator::new(
            &config(tmp.path()),
            generator,
            Arc::new(catalog(tmp.path())),
            Arc::new(RecordingEngine::default()),
        );

        let first = orchestrator.run(QUESTION).await;
        let second = orchestrator.run(QUESTION).await;

        assert_ne!(first.run_id, second.run_id);
        assert!(first.series.is_none());
        assert_eq!(first.trace.last().unwrap(), "SERIES: No series chosen");
    }
}
