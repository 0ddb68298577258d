use clap::{Parser, Subcommand};
use sbb_data_loader::runner::{
    DEFAULT_BATCH_SIZE, DEFAULT_PORT, FileStatus, LoadArgs, MAX_BATCH_SIZE, RecordErrorPolicy,
    RunReport, export_sql, run_load,
};
use std::io::BufWriter;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Clone)]
#[command(about = "Load SBB actual-vs-planned stop data into Postgres")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Load schedule files into the SbbData table
    Load {
        /// Schedule file, directory of *.csv files, or file:// URI
        #[arg(short, long)]
        source: String,

        /// Database host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Database port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Database username
        #[arg(short, long)]
        username: String,

        /// Database password
        #[arg(long, env = "SBB_DB_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Database name
        #[arg(short, long)]
        database: String,

        /// Rows per INSERT statement
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_BATCH_SIZE as u32,
            value_parser = clap::value_parser!(u32).range(1..=MAX_BATCH_SIZE as i64)
        )]
        batch_size: u32,

        /// Number of files loaded in parallel
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// What to do with a line that does not decode (abort, skip)
        #[arg(long, default_value = "abort")]
        on_bad_record: String,

        /// Write a JSON report of every file's outcome to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Parse the files and report row counts without loading anything
        #[arg(long)]
        dry_run: bool,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print one INSERT statement per record to stdout
    Sql {
        /// Schedule file, directory of *.csv files, or file:// URI
        #[arg(short, long)]
        source: String,

        /// What to do with a line that does not decode (abort, skip)
        #[arg(long, default_value = "abort")]
        on_bad_record: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Load {
            source,
            host,
            port,
            username,
            password,
            database,
            batch_size,
            workers,
            on_bad_record,
            report,
            dry_run,
            quiet,
        } => {
            init_tracing(quiet);
            let load_args = LoadArgs {
                host,
                port,
                username,
                password,
                database,
                source,
                batch_size: batch_size as usize,
                worker_count: workers,
                on_bad_record: RecordErrorPolicy::parse(&on_bad_record)?,
                report_path: report,
                dry_run,
                quiet,
            };
            run_loader(load_args).await?;
        }
        Command::Sql {
            source,
            on_bad_record,
        } => {
            // Logs go to stderr so stdout stays valid SQL
            init_tracing(true);
            let policy = RecordErrorPolicy::parse(&on_bad_record)?;
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let summary = export_sql(&source, policy, &mut out).await?;
            if !summary.failed_files.is_empty() {
                anyhow::bail!(
                    "{} files were left out of the export, {} statements written",
                    summary.failed_files.len(),
                    summary.statements
                );
            }
        }
    }
    Ok(())
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if quiet {
        EnvFilter::new("sbb_data_loader=warn,sqlx=off")
    } else {
        EnvFilter::new("sbb_data_loader=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_loader(load_args: LoadArgs) -> anyhow::Result<()> {
    let quiet = load_args.quiet;
    if !quiet {
        println!("SBB Data Loader");
        println!("===============");
        println!("Source: {}", load_args.source);
        println!(
            "Database: {}@{}:{}/{}",
            load_args.username, load_args.host, load_args.port, load_args.database
        );
        println!("Workers: {}", load_args.worker_count);
        println!("Batch size: {}", load_args.batch_size);
        if load_args.dry_run {
            println!("DRY RUN MODE - No data will be loaded");
        }
        println!();
    }

    // Ctrl-C stops workers at the next batch boundary and rolls back open files
    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, rolling back files in progress...");
            ctrl_c_token.cancel();
        }
    });

    let report = run_load(load_args, cancel).await?;
    print_summary(&report);

    if report.files_failed() > 0 {
        anyhow::bail!(
            "{} of {} files failed to load",
            report.files_failed(),
            report.files.len()
        );
    }
    if let Some(ref error) = report.index_error {
        anyhow::bail!("all files loaded but the stop_id index was not created: {}", error);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let duration = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();

    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", report.run_id);
    println!(
        "Files processed: {} ({} failed)",
        report.files.len(),
        report.files_failed()
    );
    if report.settings.dry_run {
        println!("Records parsed: {}", report.records_parsed());
    } else {
        println!("Records loaded: {}", report.records_loaded());
    }
    println!("Records skipped: {}", report.records_skipped());
    println!("Duration: {:.2}s", duration.as_secs_f64());
    if duration.as_secs_f64() > 0.0 && !report.settings.dry_run {
        println!(
            "Throughput: {:.2} records/sec",
            report.records_loaded() as f64 / duration.as_secs_f64()
        );
    }

    let failures: Vec<_> = report.files.iter().filter(|f| !f.is_success()).collect();
    if !failures.is_empty() {
        println!();
        println!("Failed files:");
        for file in failures {
            match (file.status, &file.error) {
                (FileStatus::NotStarted, _) => {
                    println!("  {}: not started (run cancelled)", file.path.display())
                }
                (_, Some(error)) => println!("  {}", error),
                (_, None) => println!("  {}", file.path.display()),
            }
        }
    }
}
