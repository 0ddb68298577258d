use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::record::{DELIMITER, MalformedRecord, ScheduleRecord};
use crate::error::LoadError;

/// What to do with a data line that does not decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordErrorPolicy {
    /// The first bad line fails the whole file
    #[default]
    Abort,
    /// Bad lines are logged, counted and left out of the load
    Skip,
}

impl RecordErrorPolicy {
    /// Parse policy from string (case-insensitive)
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(RecordErrorPolicy::Abort),
            "skip" => Ok(RecordErrorPolicy::Skip),
            _ => Err(anyhow::anyhow!(
                "Unsupported record error policy: {}. Supported policies: abort, skip",
                s
            )),
        }
    }
}

/// A data line that was left out under [`RecordErrorPolicy::Skip`]
#[derive(Debug, Clone)]
pub struct SkippedLine {
    pub line_number: u64,
    pub error: MalformedRecord,
}

/// Decoded content of one schedule file
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub records: Vec<ScheduleRecord>,
    pub skipped: Vec<SkippedLine>,
    pub bytes_read: u64,
}

/// Read a schedule file from disk, dropping its header line
pub async fn read_schedule_file(
    path: &Path,
    policy: RecordErrorPolicy,
) -> Result<ParsedFile, LoadError> {
    let buffer = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_schedule_bytes(path, &buffer, policy)
}

/// Decode the raw bytes of a schedule file
///
/// The first line is always the header and is never decoded. Fields are not
/// quoted in the export, so quote characters are kept as data.
pub fn parse_schedule_bytes(
    path: &Path,
    buffer: &[u8],
    policy: RecordErrorPolicy,
) -> Result<ParsedFile, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .quoting(false)
        .has_headers(true)
        // Field counts are checked by the record parser so the error names the line
        .flexible(true)
        .from_reader(buffer);

    let mut parsed = ParsedFile {
        bytes_read: buffer.len() as u64,
        ..Default::default()
    };

    for result in csv_reader.records() {
        let row = result.map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let line_number = row.position().map(|p| p.line()).unwrap_or(0);
        let fields: Vec<&str> = row.iter().collect();

        match ScheduleRecord::from_fields(&fields) {
            Ok(record) => parsed.records.push(record),
            Err(error) => match policy {
                RecordErrorPolicy::Abort => {
                    return Err(LoadError::MalformedRecord {
                        path: path.to_path_buf(),
                        line: line_number,
                        source: error,
                    });
                }
                RecordErrorPolicy::Skip => {
                    warn!(
                        file = %path.display(),
                        line = line_number,
                        "skipping malformed record: {}",
                        error
                    );
                    parsed.skipped.push(SkippedLine { line_number, error });
                }
            },
        }
    }

    Ok(parsed)
}
