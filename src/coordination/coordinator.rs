use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::loader::BatchLoader;
use super::report::{FileOutcome, RunReport, RunSettings};
use crate::config::MAX_BATCH_SIZE;
use crate::db::Pool;
use crate::formats::RecordErrorPolicy;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Configuration for a multi-file load
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub source: String,
    pub batch_size: usize,
    pub worker_count: usize,
    pub policy: RecordErrorPolicy,
    pub quiet: bool,
}

/// Files not yet claimed by a worker, tagged with their discovery index
type FileQueue = Arc<Mutex<VecDeque<(usize, PathBuf)>>>;

/// The Coordinator runs one [`BatchLoader`] per discovered file.
///
/// A failed file is logged and recorded, and the run moves on to the next one.
pub struct Coordinator {
    pool: Pool,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(pool: Pool, cancel: CancellationToken) -> Self {
        Self { pool, cancel }
    }

    /// Load every file in `files` and report each file's outcome
    ///
    /// Entries of the returned report follow the order of `files`, whatever
    /// order the workers finished in. The table is created before any worker
    /// starts and the `stop_id` index once all of them are done. Failing to
    /// create the table fails the run; a failed index is recorded in the report.
    pub async fn run_load(&self, files: Vec<PathBuf>, config: &LoadConfig) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let worker_count = config.worker_count.clamp(1, files.len().max(1));
        info!(
            "Starting load run {}: {} files, {} workers",
            run_id,
            files.len(),
            worker_count
        );

        if !files.is_empty() {
            self.ensure_table_exists().await?;
        }

        let queue: FileQueue = Arc::new(Mutex::new(
            files.iter().cloned().enumerate().collect::<VecDeque<_>>(),
        ));

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let loader = BatchLoader::new(
            self.pool.clone(),
            config.batch_size,
            config.policy,
            self.cancel.clone(),
            telemetry_tx,
        )
        .defer_index();

        let batch_size = loader.batch_size();
        if batch_size != config.batch_size {
            warn!(
                "Batch size {} is outside 1..={}, using {}",
                config.batch_size, MAX_BATCH_SIZE, batch_size
            );
        }

        let mut worker_handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker_loader = loader.clone();
            let worker_queue = Arc::clone(&queue);
            let cancel = self.cancel.clone();
            worker_handles.push(tokio::spawn(async move {
                run_worker(worker_id, worker_loader, worker_queue, cancel).await
            }));
        }

        // Drop the coordinator's copy of the sender so the channel closes when workers finish
        drop(loader);

        let prog_jh = Self::setup_progress_tracking(config, files.len(), telemetry_rx);

        let worker_results = futures::future::join_all(worker_handles).await;

        // Wait for the progress bar to finish so we don't collide output
        if let Some(jh) = prog_jh {
            let _ = jh.await;
        }

        let mut outcomes: Vec<Option<FileOutcome>> = vec![None; files.len()];
        for (i, result) in worker_results.into_iter().enumerate() {
            match result {
                Ok(finished) => {
                    for (idx, outcome) in finished {
                        outcomes[idx] = Some(outcome);
                    }
                }
                Err(e) => {
                    warn!("Worker {} panicked: {:#}", i, e);
                }
            }
        }

        let index_error = if files.is_empty() {
            None
        } else {
            self.ensure_stop_index().await
        };

        let files: Vec<FileOutcome> = outcomes
            .into_iter()
            .zip(files)
            .map(|(outcome, path)| outcome.unwrap_or_else(|| FileOutcome::not_started(path)))
            .collect();

        let report = RunReport {
            run_id,
            source: config.source.clone(),
            started_at,
            finished_at: Utc::now(),
            settings: RunSettings {
                batch_size,
                workers: worker_count,
                on_bad_record: config.policy,
                dry_run: false,
            },
            files,
            index_error,
        };

        info!(
            "Load complete: {} of {} files loaded, {} records loaded, {} records skipped",
            report.files_loaded(),
            report.files.len(),
            report.records_loaded(),
            report.records_skipped()
        );

        Ok(report)
    }

    /// Create the destination table before workers start inserting
    async fn ensure_table_exists(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to connect to the database")?;
        conn.ensure_table().await.context("Failed to create table")?;
        Ok(())
    }

    /// Create the `stop_id` index, returning the error message on failure
    ///
    /// Committed files stay committed when this fails.
    async fn ensure_stop_index(&self) -> Option<String> {
        let result = match self.pool.acquire().await {
            Ok(mut conn) => conn.ensure_stop_index().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to create stop_id index: {}", e);
                Some(e.to_string())
            }
        }
    }

    /// Setup progress tracking with progress bars
    fn setup_progress_tracking(
        config: &LoadConfig,
        total_files: usize,
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if config.quiet {
            return None;
        }

        let multi_progress = MultiProgress::new();

        let files_bar = multi_progress.add(ProgressBar::new(total_files as u64));
        files_bar.set_style(bar_style(
            "[{elapsed_precise}] Files: [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ));

        // Row totals are only known once each file has been parsed
        let rows_bar = multi_progress.add(ProgressBar::new(0));
        rows_bar.set_style(bar_style(
            "[{elapsed_precise}] Rows:  [{bar:30.green/blue}] {human_pos}/{human_len} ({percent}%) | {per_sec}",
        ));

        let stats_bar = multi_progress.add(ProgressBar::new(0));
        stats_bar.set_style(bar_style("[{elapsed_precise}] Batch Time: {msg}"));

        Some(tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);

                files_bar.set_position(stats.files_completed as u64);
                if stats.files_failed > 0 {
                    files_bar.set_message(format!("{} failed", stats.files_failed));
                }
                rows_bar.set_length(stats.records_expected);
                rows_bar.set_position(stats.records_loaded);

                let (p50, p90, p99) = stats.get_percentiles();
                if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                    stats_bar
                        .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                }
            }

            files_bar.finish();
            rows_bar.finish();

            let (p50, p90, p99) = stats.get_percentiles();
            if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
                stats_bar
                    .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
            } else {
                stats_bar.finish();
            }
        }))
    }
}

/// Claim files from the queue until it is empty or the run is cancelled
async fn run_worker(
    worker_id: usize,
    loader: BatchLoader,
    queue: FileQueue,
    cancel: CancellationToken,
) -> Vec<(usize, FileOutcome)> {
    let mut finished = Vec::new();

    loop {
        if cancel.is_cancelled() {
            info!(worker_id, "run cancelled, worker stopping");
            break;
        }

        let Some((idx, path)) = queue.lock().await.pop_front() else {
            break;
        };

        let start = Instant::now();
        let outcome = match loader.load(&path).await {
            Ok(result) => FileOutcome::loaded(result),
            Err(e) => {
                warn!(worker_id, error_kind = e.kind(), "{}", e);
                FileOutcome::failed(&e, start.elapsed().as_millis() as u64)
            }
        };
        finished.push((idx, outcome));
    }

    finished
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
