//! High-level runner API for the SBB schedule loader.
//!
//! This module provides a simplified public interface that hides the
//! internals of pooling, file discovery, workers and progress tracking.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordination::{Coordinator, LoadConfig};
use crate::db::{PoolArgsBuilder, to_insert_statement};
use crate::formats::read_schedule_file;
use crate::io::SourceUri;

pub use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_PORT, MAX_BATCH_SIZE};
pub use crate::coordination::{FileOutcome, FileStatus, RunReport, RunSettings};
pub use crate::formats::RecordErrorPolicy;

/// Arguments for running a load
#[derive(Debug, Clone)]
pub struct LoadArgs {
    // Connection configuration
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,

    // Source configuration: a file, a directory of *.csv files or a file:// URI
    pub source: String,

    // Performance tuning
    pub batch_size: usize,
    pub worker_count: usize,

    // Options
    pub on_bad_record: RecordErrorPolicy,
    pub report_path: Option<PathBuf>,
    pub dry_run: bool,
    pub quiet: bool,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<crate::db::Pool>,
}

/// Run a load with the specified arguments
///
/// Discovers the source files and loads each of them in its own transaction.
/// A file that fails does not stop the run; its error is recorded in the
/// returned report. Only problems that prevent the run as a whole (bad
/// source, unreachable database, table creation, unwritable report) are
/// returned as `Err`.
///
/// # Example
///
/// ```no_run
/// use sbb_data_loader::runner::{LoadArgs, RecordErrorPolicy, run_load};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgs {
///     host: "localhost".to_string(),
///     port: 5432,
///     username: "sbb".to_string(),
///     password: None,
///     database: "sbb".to_string(),
///     source: "/data/istdaten".to_string(),
///     batch_size: 3000,
///     worker_count: 4,
///     on_bad_record: RecordErrorPolicy::Abort,
///     report_path: None,
///     dry_run: false,
///     quiet: true,
/// };
///
/// let report = run_load(args, CancellationToken::new()).await?;
/// println!("Loaded {} records", report.records_loaded());
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs, cancel: CancellationToken) -> Result<RunReport> {
    let source_uri = SourceUri::parse(&args.source)?;
    let files = source_uri.discover_files().await?;
    if files.is_empty() {
        warn!("No schedule files found in {}", args.source);
    }

    let report = if args.dry_run {
        parse_only(&args, files).await
    } else {
        load_files(&args, files, cancel).await?
    };

    if let Some(ref report_path) = args.report_path {
        report.write(report_path).await?;
        info!("Run report written to {}", report_path.display());
    }

    Ok(report)
}

async fn load_files(
    args: &LoadArgs,
    files: Vec<PathBuf>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let pool = if let Some(ref test_pool) = args.test_pool {
        test_pool.clone()
    } else {
        create_pool(args).await?
    };

    #[cfg(not(test))]
    let pool = create_pool(args).await?;

    let coordinator = Coordinator::new(pool, cancel);
    let load_config = LoadConfig {
        source: args.source.clone(),
        batch_size: args.batch_size,
        worker_count: args.worker_count,
        policy: args.on_bad_record,
        quiet: args.quiet,
    };

    coordinator.run_load(files, &load_config).await
}

async fn create_pool(args: &LoadArgs) -> Result<crate::db::Pool> {
    let pool_args = PoolArgsBuilder::default()
        .host(&args.host)
        .port(args.port)
        .username(&args.username)
        .password(args.password.clone())
        .database(&args.database)
        // One connection per worker; each worker holds its connection for a whole file
        .max_pool_size(args.worker_count.max(1) as u32)
        .build()?;
    crate::db::pool::pool(pool_args).await
}

/// Decode every file without connecting to the database
async fn parse_only(args: &LoadArgs, files: Vec<PathBuf>) -> RunReport {
    let started_at = Utc::now();
    let mut outcomes = Vec::with_capacity(files.len());

    for path in files {
        let start = Instant::now();
        let outcome = match read_schedule_file(&path, args.on_bad_record).await {
            Ok(parsed) => {
                info!(
                    "Parsed {} records from {} ({} skipped)",
                    parsed.records.len(),
                    path.display(),
                    parsed.skipped.len()
                );
                FileOutcome::parsed(path, &parsed, start.elapsed().as_millis() as u64)
            }
            Err(e) => {
                warn!(error_kind = e.kind(), "{}", e);
                FileOutcome::failed(&e, start.elapsed().as_millis() as u64)
            }
        };
        outcomes.push(outcome);
    }

    RunReport {
        run_id: Uuid::new_v4().to_string(),
        source: args.source.clone(),
        started_at,
        finished_at: Utc::now(),
        settings: RunSettings {
            batch_size: args.batch_size,
            workers: args.worker_count,
            on_bad_record: args.on_bad_record,
            dry_run: true,
        },
        files: outcomes,
        index_error: None,
    }
}

/// Outcome of [`export_sql`]
#[derive(Debug, Default)]
pub struct ExportSummary {
    /// Statements written to the output
    pub statements: u64,
    /// One error message per file that was left out
    pub failed_files: Vec<String>,
}

/// Write one literal INSERT statement per decoded record of `source` to `out`
///
/// Statements of a file are only written once the whole file has decoded, so
/// a file with a bad line under the abort policy contributes nothing. The
/// export carries on with the remaining files and lists the ones it left out
/// in the returned summary. Only source discovery and output errors abort it.
pub async fn export_sql<W: Write>(
    source: &str,
    on_bad_record: RecordErrorPolicy,
    out: &mut W,
) -> Result<ExportSummary> {
    let files = SourceUri::parse(source)?.discover_files().await?;
    let mut summary = ExportSummary::default();

    for path in files {
        let parsed = match read_schedule_file(&path, on_bad_record).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error_kind = e.kind(), "{}", e);
                summary.failed_files.push(e.to_string());
                continue;
            }
        };
        for record in &parsed.records {
            writeln!(out, "{}", to_insert_statement(record))
                .context("Failed to write SQL output")?;
            summary.statements += 1;
        }
    }

    out.flush().context("Failed to write SQL output")?;
    Ok(summary)
}
