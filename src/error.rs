//! Error types for loading schedule files

use std::path::PathBuf;

use thiserror::Error;

use crate::formats::MalformedRecord;

/// Why loading a single file failed.
///
/// Every variant that concerns a file carries its path so that a multi-file
/// run can report failures and move on to the next file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A data line could not be decoded.
    #[error("{}: malformed record on line {line}: {source}", .path.display())]
    MalformedRecord {
        path: PathBuf,
        line: u64,
        #[source]
        source: MalformedRecord,
    },

    /// The file could not be read.
    #[error("{}: failed to read file: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No connection to the destination could be obtained.
    #[error("{}: could not connect to the database: {source}", .path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// DDL, a batch or the commit failed.
    ///
    /// A failure before the commit rolls the file's transaction back.
    #[error("{}: load failed: {source}", .path.display())]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// The run was cancelled before the file's transaction committed.
    #[error("{}: load cancelled, no rows were committed", .path.display())]
    Cancelled { path: PathBuf },
}

impl LoadError {
    pub fn path(&self) -> &PathBuf {
        match self {
            LoadError::MalformedRecord { path, .. }
            | LoadError::Io { path, .. }
            | LoadError::Connection { path, .. }
            | LoadError::LoadFailed { path, .. }
            | LoadError::Cancelled { path } => path,
        }
    }

    /// Short machine-readable category used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::MalformedRecord { .. } => "malformed_record",
            LoadError::Io { .. } => "io",
            LoadError::Connection { .. } => "connection",
            LoadError::LoadFailed { .. } => "load_failed",
            LoadError::Cancelled { .. } => "cancelled",
        }
    }
}
