use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use covid_pipeline::config::Config;
use covid_pipeline::logging;
use covid_pipeline::pipeline::{Pipeline, RunSummary};
use covid_pipeline::store::{FsSnapshotStore, SnapshotStore};

#[derive(Parser)]
#[command(name = "covid_pipeline")]
#[command(about = "CDC/NYT COVID-19 case data ingestion and aggregation pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a TOML config file (defaults cover the historical endpoints)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run date for snapshot naming (YYYY-MM-DD, defaults to today)
    #[arg(long, global = true)]
    date: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize, and persist snapshots for each series
    Ingest {
        /// Specific series to ingest (comma-separated). Available:
        /// cdc_cases_by_state, cdc_cases_by_report_date,
        /// cdc_cases_by_onset_date, nyt_cases_by_county
        #[arg(long)]
        series: Option<String>,
    },
    /// Derive rolling/per-100k county statistics from the day's snapshot
    Aggregate,
    /// Run the full pipeline (ingest + aggregate) once
    Run,
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Pipeline results for {}:", summary.run_date);
    for series in &summary.series {
        println!(
            "   {}: {} rows ({} warnings)",
            series.series, series.rows_written, series.warnings
        );
    }
    if summary.total_warnings > 0 {
        println!("⚠️  {} data quality warnings in total", summary.total_warnings);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;
    // The snapshot key depends on the run date; only this outermost entry
    // point defaults it to the wall clock.
    let run_date = cli
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(&config.data_dir));
    let pipeline = Pipeline::new(&config, store)?;

    match cli.command {
        Commands::Ingest { series } => {
            println!("🔄 Running ingestion...");

            let series_filter = series.map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .collect::<Vec<String>>()
            });

            match pipeline.ingest(run_date, series_filter.as_deref()).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => {
                    error!("Ingestion failed: {}", e);
                    println!("❌ Ingestion failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Aggregate => {
            println!("🔧 Running county aggregation...");

            match pipeline.aggregate(run_date).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => {
                    error!("Aggregation failed: {}", e);
                    println!("❌ Aggregation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run => {
            println!("🚀 Running full pipeline (ingest + aggregate)...");

            match pipeline.run(run_date).await {
                Ok(summary) => {
                    print_summary(&summary);
                    println!("✅ Full pipeline completed successfully!");
                }
                Err(e) => {
                    error!("Pipeline run failed: {}", e);
                    println!("❌ Pipeline run failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
