use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use super::loader::FileLoadResult;
use crate::error::LoadError;
use crate::formats::{ParsedFile, RecordErrorPolicy, SkippedLine};

/// Final state of one input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// All decoded records were committed
    Loaded,
    /// Decoded without touching the database
    Parsed,
    /// Nothing from the file was committed
    Failed,
    /// The run was cancelled before a worker claimed the file
    NotStarted,
}

/// A data line left out of the load
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub line: u64,
    pub error: String,
}

impl From<&SkippedLine> for SkippedEntry {
    fn from(skipped: &SkippedLine) -> Self {
        Self {
            line: skipped.line_number,
            error: skipped.error.to_string(),
        }
    }
}

/// Per-file entry of a [`RunReport`]
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    pub records_parsed: u64,
    pub records_loaded: u64,
    pub records_skipped: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_lines: Vec<SkippedEntry>,
    pub batches: usize,
    pub bytes_read: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn loaded(result: FileLoadResult) -> Self {
        Self {
            path: result.path,
            status: FileStatus::Loaded,
            records_parsed: result.records_loaded,
            records_loaded: result.records_loaded,
            records_skipped: result.records_skipped,
            skipped_lines: result.skipped_lines.iter().map(SkippedEntry::from).collect(),
            batches: result.batches,
            bytes_read: result.bytes_read,
            duration_ms: result.duration.as_millis() as u64,
            error_kind: None,
            error: None,
        }
    }

    /// Outcome of a dry run over `path`
    pub fn parsed(path: PathBuf, parsed: &ParsedFile, duration_ms: u64) -> Self {
        Self {
            path,
            status: FileStatus::Parsed,
            records_parsed: parsed.records.len() as u64,
            records_loaded: 0,
            records_skipped: parsed.skipped.len() as u64,
            skipped_lines: parsed.skipped.iter().map(SkippedEntry::from).collect(),
            batches: 0,
            bytes_read: parsed.bytes_read,
            duration_ms,
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(error: &LoadError, duration_ms: u64) -> Self {
        Self {
            path: error.path().clone(),
            status: FileStatus::Failed,
            records_parsed: 0,
            records_loaded: 0,
            records_skipped: 0,
            skipped_lines: Vec::new(),
            batches: 0,
            bytes_read: 0,
            duration_ms,
            error_kind: Some(error.kind().to_string()),
            error: Some(error.to_string()),
        }
    }

    pub fn not_started(path: PathBuf) -> Self {
        Self {
            path,
            status: FileStatus::NotStarted,
            records_parsed: 0,
            records_loaded: 0,
            records_skipped: 0,
            skipped_lines: Vec::new(),
            batches: 0,
            bytes_read: 0,
            duration_ms: 0,
            error_kind: Some("cancelled".to_string()),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FileStatus::Loaded | FileStatus::Parsed)
    }
}

/// Settings a run was started with, echoed into the report
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub on_bad_record: RecordErrorPolicy,
    pub dry_run: bool,
}

/// Outcome of a whole run, one entry per discovered file in discovery order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub settings: RunSettings,
    pub files: Vec<FileOutcome>,
    /// Set when the `stop_id` index could not be created after the load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
}

impl RunReport {
    pub fn records_parsed(&self) -> u64 {
        self.files.iter().map(|f| f.records_parsed).sum()
    }

    pub fn records_loaded(&self) -> u64 {
        self.files.iter().map(|f| f.records_loaded).sum()
    }

    pub fn records_skipped(&self) -> u64 {
        self.files.iter().map(|f| f.records_skipped).sum()
    }

    pub fn files_loaded(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }

    pub fn files_failed(&self) -> usize {
        self.files.len() - self.files_loaded()
    }

    pub fn has_failures(&self) -> bool {
        self.files_failed() > 0 || self.index_error.is_some()
    }

    /// Write the report as pretty-printed JSON, creating parent directories
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create report directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report file {}", path.display()))?;

        Ok(())
    }
}
