#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parcel pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use parcel_map_cli_utils::IndicatifProgress;
use parcel_map_database::paths::DataDir;
use parcel_map_ingest::{SyncOptions, enabled_sources, find_source, source_status, sync_source};
use parcel_map_source::crs::detect_crs;
use parcel_map_source::source_def::SourceDefinition;

#[derive(Parser)]
#[command(name = "parcel_map_ingest", about = "Parcel fetch, dating and clustering pipeline")]
struct Cli {
    /// Directory of extra source definitions (`*.toml`)
    #[arg(long, global = true, env = "PARCEL_MAP_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Maximum number of records to fetch (for testing)
    #[arg(long)]
    limit: Option<u64>,
    /// Rebuild even if the source is unchanged since the last run
    #[arg(long)]
    force: bool,
    /// Also generate `PMTiles` with tippecanoe
    #[arg(long)]
    tiles: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every enabled source
    SyncAll {
        /// Comma-separated list of source IDs (overrides `PARCEL_MAP_SOURCES`)
        #[arg(long)]
        sources: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the pipeline for one source
    Sync {
        /// Source identifier (e.g., "`riverside_assessor`")
        source: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// List all configured sources
    Sources,
    /// Show the stored metadata of each source
    Status {
        /// Comma-separated list of source IDs (overrides `PARCEL_MAP_SOURCES`)
        #[arg(long)]
        sources: Option<String>,
    },
    /// Guess the coordinate system of a coordinate pair
    DetectCrs {
        #[arg(allow_hyphen_values = true)]
        x: f64,
        #[arg(allow_hyphen_values = true)]
        y: f64,
        /// Longitude near the data, used to pick a UTM zone
        #[arg(long, allow_hyphen_values = true)]
        hint_lng: Option<f64>,
    },
}

impl RunArgs {
    fn options(&self, cancel: &Arc<AtomicBool>) -> SyncOptions {
        SyncOptions {
            force: self.force,
            limit: self.limit,
            tiles: self.tiles,
            cancel: cancel.clone(),
        }
    }
}

/// Sets the returned flag on Ctrl-C so the run stops at the next page or
/// pass boundary without committing.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current page...");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = parcel_map_cli_utils::init_logger();
    let cli = Cli::parse();
    let config_dir = cli.config_dir.as_deref();
    let data = DataDir::from_env();

    match cli.command {
        Commands::Sources => {
            let sources = enabled_sources(config_dir, Some(String::new()))?;
            println!("{:<28} NAME", "ID");
            println!("{}", "-".repeat(60));
            for source in &sources {
                println!("{:<28} {}", source.id(), source.name());
            }
        }
        Commands::Status { sources } => {
            let sources = enabled_sources(config_dir, sources)?;
            println!("{:<28} {:<27} {:>10}  TOKEN", "ID", "LAST FETCHED", "RECORDS");
            println!("{}", "-".repeat(90));
            for (id, metadata) in source_status(&data, &sources)? {
                match metadata {
                    Some(m) => println!(
                        "{id:<28} {:<27} {:>10}  {}",
                        m.last_fetched,
                        m.record_count,
                        m.change_token.as_deref().unwrap_or("-")
                    ),
                    None => println!("{id:<28} never"),
                }
            }
        }
        Commands::DetectCrs { x, y, hint_lng } => {
            let guess = detect_crs(&[[x, y]], hint_lng);
            println!("{} (confidence {:.2})", guess.crs, guess.confidence);
        }
        Commands::Sync { source, run } => {
            let sources = enabled_sources(config_dir, Some(String::new()))?;
            let src = find_source(&sources, &source)?;
            let client = reqwest::Client::new();
            let cancel = cancel_on_ctrl_c();
            let progress = IndicatifProgress::records_bar(&multi, src.id());
            let report = sync_source(src, &data, &client, &run.options(&cancel), progress).await?;
            println!("{report}");
        }
        Commands::SyncAll { sources, run } => {
            let sources = enabled_sources(config_dir, sources)?;
            log::info!(
                "Syncing {} source(s): {}",
                sources.len(),
                sources
                    .iter()
                    .map(SourceDefinition::id)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let client = reqwest::Client::new();
            let cancel = cancel_on_ctrl_c();
            let options = run.options(&cancel);
            let steps = IndicatifProgress::steps_bar(&multi, "Sources", sources.len() as u64);
            let mut failed = 0usize;

            for src in &sources {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let progress = IndicatifProgress::records_bar(&multi, src.id());
                match sync_source(src, &data, &client, &options, progress).await {
                    Ok(report) => println!("{report}"),
                    Err(e) => {
                        log::error!("Failed to sync {}: {e}", src.id());
                        failed += 1;
                    }
                }
                steps.inc(1);
            }
            steps.finish(format!("{} sources, {failed} failed", sources.len()));

            if failed > 0 {
                return Err(format!("{failed} source(s) failed").into());
            }
        }
    }

    Ok(())
}
