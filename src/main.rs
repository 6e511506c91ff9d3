use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use enrollment_reconcile::{
    Changelog, CleanStore, OutputPaths, PriorState, ReconcileConfig, ReconcileError, Reconciler,
    RunLogSink, RunOutcome, SqliteCleanStore, SqliteSource, ValidationHarness,
};

const EXIT_FAILURE: u8 = 1;
const EXIT_VALIDATION_ABORT: u8 = 2;

#[derive(Parser)]
#[command(name = "enrollment-reconcile")]
#[command(about = "Incremental reconciliation of raw student enrollment data into a clean store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append new students to the clean store, rebuild the CSV mirror, bump the changelog
    Run {
        /// TOML config file (defaults to ./reconcile.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reference date for age computation (YYYY-MM-DD, default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Validate the delta without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show clean store size and current changelog version
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            as_of,
            dry_run,
        } => run_reconcile(config, as_of, dry_run),
        Commands::Status { config } => show_status(config).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("\n❌ {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run_reconcile(config: Option<PathBuf>, as_of: Option<NaiveDate>, dry_run: bool) -> Result<ExitCode> {
    let config = ReconcileConfig::load_or_default(config.as_deref())?;
    let as_of = as_of.unwrap_or_else(|| Local::now().date_naive());

    println!("🎓 Enrollment Reconcile - raw → clean store");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Source:      {}", config.source.path.display());
    println!("   Clean store: {} ({})", config.clean_store.path.display(), config.clean_store.table);
    println!("   As of:       {}", as_of);
    if dry_run {
        println!("   Mode:        dry run (nothing is written)");
    }

    let sink = RunLogSink::open(&config.logging)?;
    let source = SqliteSource::new(&config.source.path, config.source.tables());
    let mut store = SqliteCleanStore::new(&config.clean_store.path, &config.clean_store.table);
    let outputs = OutputPaths {
        csv_mirror: config.outputs.csv_mirror.clone(),
        changelog: config.outputs.changelog.clone(),
    };

    let result = Reconciler::new(&source, &mut store, outputs, as_of)
        .with_harness(ValidationHarness::with_max_dropped_ratio(
            config.validation.max_dropped_ratio,
        ))
        .with_table_label(&config.clean_store.table)
        .dry_run(dry_run)
        .run_with_sink(sink.dispatch());

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match result {
        Ok(RunOutcome::Persisted(summary)) => {
            println!("✅ Persisted {} new rows", summary.rows_appended);
            println!("✓ Clean store now holds {} rows", summary.total_rows);
            if let Some(version) = summary.version {
                println!("✓ Changelog version {}", version);
            }
            if !summary.identity_gaps.is_empty() {
                println!("⚠️  {} rows dropped (missing job_id/num_course_taken)", summary.identity_gaps.len());
            }
            for advisory in summary.report.advisories() {
                println!("⚠️  {}", advisory);
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::NoNewData {
            already_stored,
            identity_gaps,
            ..
        }) => {
            println!("✓ No new data ({} rows already stored)", already_stored);
            if identity_gaps > 0 {
                println!("⚠️  {} new rows dropped (missing job_id/num_course_taken)", identity_gaps);
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::DryRun(summary)) => {
            println!("✓ Dry run: {} rows would be appended", summary.delta_rows - summary.identity_gaps.len());
            println!(
                "✓ Checks: {} passed, {} skipped, {} advisory",
                summary.report.passed_count(),
                summary.report.skipped_count(),
                summary.report.advisories().len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(ReconcileError::Validation(failure)) => {
            println!("❌ Validation failed, nothing was written");
            for outcome in failure.report.blocking_failures() {
                println!("   • {}", outcome);
            }
            println!("   See {} for details", config.logging.file.display());
            Ok(ExitCode::from(EXIT_VALIDATION_ABORT))
        }
        Err(err) => Err(err).context("Reconciliation failed"),
    }
}

fn show_status(config: Option<PathBuf>) -> Result<()> {
    let config = ReconcileConfig::load_or_default(config.as_deref())?;
    let store = SqliteCleanStore::new(&config.clean_store.path, &config.clean_store.table);

    println!("📊 Clean store status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match store.prior_state() {
        PriorState::Present(snapshot) => {
            println!("✓ {} rows in {}", snapshot.row_count, config.clean_store.table);
        }
        PriorState::FirstRun(reason) => {
            println!("• {} (next run is a first run)", reason.describe());
        }
    }

    let changelog = Changelog::load(&config.outputs.changelog)?;
    match changelog.latest() {
        Some(entry) => {
            println!("✓ Changelog version {}", entry.version);
            if let Some(rows) = entry.rows_added() {
                println!("  last batch: {} rows", rows);
            }
        }
        None => println!("• Changelog is empty (next version {})", changelog.next_version()),
    }

    Ok(())
}
