use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MAX_BATCH_SIZE, MAX_RETRIES};
use crate::db::{Pool, PoolConnection};
use crate::error::LoadError;
use crate::formats::{RecordErrorPolicy, SkippedLine, read_schedule_file};
use crate::telemetry::TelemetryEvent;

/// Outcome of a successfully committed file
#[derive(Debug, Clone)]
pub struct FileLoadResult {
    pub path: PathBuf,
    pub records_loaded: u64,
    pub records_skipped: u64,
    /// Records left out under the skip policy
    pub skipped_lines: Vec<SkippedLine>,
    pub batches: usize,
    pub bytes_read: u64,
    pub duration: Duration,
}

/// Loads one schedule file into `SbbData` inside a single transaction
#[derive(Clone)]
pub struct BatchLoader {
    pool: Pool,
    batch_size: usize,
    policy: RecordErrorPolicy,
    cancel: CancellationToken,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    /// Whether each file builds the `stop_id` index after its commit
    build_index: bool,
}

impl BatchLoader {
    pub fn new(
        pool: Pool,
        batch_size: usize,
        policy: RecordErrorPolicy,
        cancel: CancellationToken,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            pool,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            policy,
            cancel,
            telemetry_tx,
            build_index: true,
        }
    }

    /// Leave the `stop_id` index to the caller
    ///
    /// Used when several loaders share a run. Creating the index takes a lock
    /// that waits for every open insert transaction on the table, so it is
    /// built once after all files are done.
    pub fn defer_index(mut self) -> Self {
        self.build_index = false;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Load a single file
    ///
    /// Either every decoded record of the file is committed or none is. The
    /// connection goes back to the pool on every path.
    pub async fn load(&self, path: &Path) -> Result<FileLoadResult, LoadError> {
        let result = self.load_file(path).await;

        let (records_skipped, failed) = match &result {
            Ok(r) => (r.records_skipped, false),
            Err(_) => (0, true),
        };
        let _ = self.telemetry_tx.send(TelemetryEvent::FileCompleted {
            records_skipped,
            failed,
        });

        result
    }

    async fn load_file(&self, path: &Path) -> Result<FileLoadResult, LoadError> {
        let start = Instant::now();
        let load_failed = |source: sqlx::Error| LoadError::LoadFailed {
            path: path.to_path_buf(),
            source,
        };
        let cancelled = || LoadError::Cancelled {
            path: path.to_path_buf(),
        };

        let mut conn = self.acquire_with_retry(path).await?;

        let parsed = read_schedule_file(path, self.policy).await?;
        let _ = self.telemetry_tx.send(TelemetryEvent::FileStarted {
            records: parsed.records.len() as u64,
        });
        debug!(
            file = %path.display(),
            records = parsed.records.len(),
            skipped = parsed.skipped.len(),
            "parsed file"
        );

        conn.ensure_table().await.map_err(load_failed)?;

        let mut tx = conn.begin().await.map_err(load_failed)?;
        let mut records_loaded = 0u64;
        let mut batches = 0usize;

        for batch in parsed.records.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                let _ = tx.rollback().await;
                self.rolled_back(records_loaded);
                return Err(cancelled());
            }

            let batch_start = Instant::now();
            match tx.insert_batch(batch).await {
                Ok(_) => {
                    batches += 1;
                    records_loaded += batch.len() as u64;
                    let _ = self.telemetry_tx.send(TelemetryEvent::BatchLoaded {
                        records_loaded: batch.len() as u64,
                        duration_ms: batch_start.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        batch = batches,
                        "batch insert failed, rolling back: {}",
                        e
                    );
                    let _ = tx.rollback().await;
                    self.rolled_back(records_loaded);
                    return Err(load_failed(e));
                }
            }
        }

        if self.cancel.is_cancelled() {
            let _ = tx.rollback().await;
            self.rolled_back(records_loaded);
            return Err(cancelled());
        }
        if let Err(e) = tx.commit().await {
            self.rolled_back(records_loaded);
            return Err(load_failed(e));
        }

        if self.build_index {
            // Built after the commit so the bulk insert does not maintain the index row by row
            conn.ensure_stop_index().await.map_err(load_failed)?;
        }

        let duration = start.elapsed();
        info!(
            "Loaded {} records from {} in {} batches ({:.2}s)",
            records_loaded,
            path.display(),
            batches,
            duration.as_secs_f64()
        );

        Ok(FileLoadResult {
            path: path.to_path_buf(),
            records_loaded,
            records_skipped: parsed.skipped.len() as u64,
            skipped_lines: parsed.skipped,
            batches,
            bytes_read: parsed.bytes_read,
            duration,
        })
    }

    /// Take back rows already reported through `BatchLoaded`
    fn rolled_back(&self, records: u64) {
        if records > 0 {
            let _ = self.telemetry_tx.send(TelemetryEvent::RolledBack { records });
        }
    }

    /// Acquire a connection, backing off exponentially between attempts
    ///
    /// Only socket-level failures are retried. A pool timeout has already
    /// waited the full connect timeout, and an authentication or protocol
    /// error will not change on a second try.
    async fn acquire_with_retry(&self, path: &Path) -> Result<PoolConnection, LoadError> {
        let mut attempt = 0;
        loop {
            match self.pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(e @ sqlx::Error::Io(_))
                    if attempt < MAX_RETRIES - 1 && !self.cancel.is_cancelled() =>
                {
                    let delay_ms = 100 * 2u64.pow(attempt);
                    warn!(attempt, delay_ms, "failed to acquire connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(LoadError::Connection {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}
