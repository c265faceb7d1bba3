//! One-shot address enrichment
//!
//! Runs a single enrichment synchronously and prints the report.
//!
//! Usage:
//!   cargo run --features database,cli --bin address_enrich -- \
//!     --archive-dir /data/fias \
//!     --archive-name fias_dbf.zip \
//!     --workers 4 \
//!     --dry-run
//!
//! Every flag falls back to the environment variable the server reads.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use address_enrich::{
    AddressEnrichmentService, AmbiguityPolicy, DatabaseManager, EnrichConfig, FileResult,
    RunReport, WriteMode,
};

/// Stamp FIAS codes onto the KLADR dictionaries from a DBF archive
#[derive(Parser, Debug)]
#[command(name = "address_enrich")]
#[command(about = "Enrich KLADR street and settlement dictionaries with FIAS codes")]
struct Args {
    /// Directory holding the archive; staging happens here too
    #[arg(long, env = "ADDRESS_FILE_PATH")]
    archive_dir: PathBuf,

    /// Archive file name inside the directory
    #[arg(long, env = "ADDRESS_FILE_NAME")]
    archive_name: String,

    /// Records (or staged rows) per flush
    #[arg(long, env = "ENRICH_CHUNK_SIZE", default_value_t = address_enrich::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Files processed concurrently
    #[arg(long, short = 'w', env = "ENRICH_WORKER_POOL_SIZE", default_value_t = address_enrich::config::DEFAULT_WORKER_POOL_SIZE)]
    workers: usize,

    /// What to do when an exact lookup returns several rows (match-all | reject)
    #[arg(long, env = "ENRICH_AMBIGUITY_POLICY", default_value = "match-all")]
    ambiguity: AmbiguityPolicy,

    /// Run the whole pipeline but write nothing
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "address_enrich=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = EnrichConfig::new(&args.archive_dir, &args.archive_name)
        .with_chunk_size(args.chunk_size)
        .with_worker_pool_size(args.workers)
        .with_ambiguity_policy(args.ambiguity);
    config.validate().context("Invalid enrichment configuration")?;

    let db = DatabaseManager::with_default_config()
        .await
        .context("Failed to connect to database")?;
    let store = db
        .dictionary_store()
        .context("Invalid dictionary table binding")?;

    let write_mode = if args.dry_run {
        WriteMode::DryRun
    } else {
        WriteMode::Persist
    };
    let service =
        AddressEnrichmentService::new(config, Arc::new(store)).with_write_mode(write_mode);

    let report = service.run().await.context("Enrichment run aborted")?;
    db.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.dry_run);
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &RunReport, dry_run: bool) {
    println!("Run {}{}", report.run_id, if dry_run { " (dry run)" } else { "" });
    println!(
        "{:<16} {:>10} {:>10} {:>8} {:>8} {:>10}",
        "FILE", "PROCESSED", "MATCHED", "EXACT", "PREFIX", "NO MATCH"
    );

    for outcome in &report.files {
        match &outcome.result {
            FileResult::Success(stats) => println!(
                "{:<16} {:>10} {:>10} {:>8} {:>8} {:>10}",
                outcome.file,
                stats.processed,
                stats.matches.matched,
                stats.matches.exact_hits,
                stats.matches.prefix_hits,
                stats.matches.no_match
            ),
            FileResult::Failure { cause, partial } => println!(
                "{:<16} FAILED after {} records: {}",
                outcome.file, partial.processed, cause.message
            ),
        }
    }

    println!();
    println!(
        "Processed {} records, {} matches, {} rows written; {} of {} files failed",
        report.processed,
        report.matched,
        report.rows_written,
        report.failed_files,
        report.files.len()
    );
}
