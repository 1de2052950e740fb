//! CLI entry point for loadlog.
//!
//! Two commands:
//! - `run` records a logging session from the mock loadcell source until
//!   Ctrl-C or a sample budget, then drains, closes and merges;
//! - `merge` re-merges an existing session directory, for sessions whose
//!   process died before finalization.
//!
//! The interrupt path matters: Ctrl-C flips a watch channel, which cancels
//! the pending sensor read inside the acquisition loop, and the single
//! `shutdown()` call afterwards performs the final drain and merge. Exit
//! code is zero only when that whole sequence, merge included, succeeds.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use loadlog::acquisition::{run_acquisition, MockLoadcell};
use loadlog::config::Settings;
use loadlog::supervisor::{PersistenceOptions, PersistenceSupervisor};
use loadlog::{logging, merge, session};

#[derive(Parser)]
#[command(name = "loadlog")]
#[command(about = "Loadcell telemetry logger with durable segmented storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session until Ctrl-C or the sample budget is reached
    Run {
        /// Named configuration under config/ (default: "default")
        #[arg(long)]
        config: Option<String>,

        /// Experiment name used in the session directory
        #[arg(long)]
        experiment: Option<String>,

        /// Stop after this many accepted samples
        #[arg(long)]
        samples: Option<u64>,
    },

    /// Merge the segments of an existing session directory
    Merge {
        /// Session directory holding numbered segment files
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            experiment,
            samples,
        } => run(config, experiment, samples).await,
        Commands::Merge { dir } => merge_session(&dir),
    }
}

async fn run(
    config: Option<String>,
    experiment: Option<String>,
    samples: Option<u64>,
) -> Result<()> {
    let mut settings = Settings::new(config.as_deref())?;
    if let Some(name) = experiment {
        settings.acquisition.experiment = name;
    }
    if let Some(n) = samples {
        settings.acquisition.max_samples = Some(n);
    }
    logging::init(&settings.log_level.0)?;

    let session_dir = session::create_session(&settings)?;
    println!("Recording session at {}", session_dir.display());
    println!("Press Ctrl+C to stop and save.");

    let supervisor =
        PersistenceSupervisor::start(&session_dir, PersistenceOptions::from_settings(&settings))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupt received: draining and saving.");
            let _ = stop_tx.send(true);
        }
    });

    let mut source = MockLoadcell::new(settings.acquisition.sample_period);
    let stats = match run_acquisition(
        &mut source,
        &supervisor,
        stop_rx,
        settings.acquisition.max_samples,
    )
    .await
    {
        Ok(stats) => stats,
        Err(e) => {
            // Data already accepted must still be drained and merged.
            let _ = supervisor.shutdown().await;
            return Err(e.into());
        }
    };

    let report = supervisor.shutdown().await?;

    println!();
    println!("Session complete.");
    println!(
        "  accepted: {} samples ({} decode errors skipped)",
        stats.accepted, stats.decode_errors
    );
    println!(
        "  written:  {} rows across {} segment(s)",
        report.state.total_rows_written, report.state.active_segment_id
    );
    if let Some(merge) = &report.merge {
        println!(
            "  merged:   {} rows ({} dropped) -> {}",
            merge.rows,
            merge.dropped_rows,
            merge.artifact.display()
        );
    }
    Ok(())
}

fn merge_session(dir: &Path) -> Result<()> {
    logging::init("info")?;
    let report = merge::merge(dir)?;
    println!(
        "Merged {} rows ({} dropped) -> {}",
        report.rows,
        report.dropped_rows,
        report.artifact.display()
    );
    Ok(())
}
