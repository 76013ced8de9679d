use fred_question_agent::{config::PipelineConfig, pipeline::Orchestrator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        eprintln!("Usage: fred-agent <question>");
        eprintln!("Example: fred-agent \"What is the total unemployment rate in the US in 2022?\"");
        std::process::exit(2);
    }

    let config = PipelineConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;

    info!(question = %question, "Running orchestrator");

    let report = orchestrator.run(&question).await;

    println!("\n=== RUN {} ===", report.run_id);
    if let Some(series) = &report.series {
        println!("Series: {} ({})", series.title, series.id);
    }
    if let Some(database) = &report.database {
        println!("Data: {}", database.location.display());
        println!("{}", database.schema.describe());
    }
    println!("\nTrace:");
    for (i, step) in report.trace.iter().enumerate() {
        println!("  {}: {}", i + 1, step);
    }
    println!("\nElapsed: {} ms", report.execution_time_ms);

    match report.answer {
        Some(answer) => {
            println!("\n=== ANSWER ===\n{}", answer);
            Ok(())
        }
        None => {
            eprintln!("\nNo answer could be produced");
            std::process::exit(1);
        }
    }
}
