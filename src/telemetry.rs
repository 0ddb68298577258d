/// Telemetry events sent from workers to coordinator for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker started processing a file
    FileStarted { records: u64 },
    /// Batch of records was inserted (not yet committed)
    BatchLoaded { records_loaded: u64, duration_ms: u64 },
    /// Batches of a file were rolled back after being reported as loaded
    RolledBack { records: u64 },
    /// Worker finished a file, successfully or not
    FileCompleted { records_skipped: u64, failed: bool },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub files_started: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub records_expected: u64,
    pub records_loaded: u64,
    pub records_skipped: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::FileStarted { records } => {
                self.files_started += 1;
                self.records_expected += records;
            }
            TelemetryEvent::BatchLoaded {
                records_loaded,
                duration_ms,
            } => {
                self.records_loaded += records_loaded;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::RolledBack { records } => {
                self.records_loaded = self.records_loaded.saturating_sub(*records);
            }
            TelemetryEvent::FileCompleted {
                records_skipped,
                failed,
            } => {
                self.files_completed += 1;
                self.records_skipped += records_skipped;
                if *failed {
                    self.files_failed += 1;
                }
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
