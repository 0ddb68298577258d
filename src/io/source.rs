use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use url::Url;

/// Extension of the schedule exports picked up from a directory
const SOURCE_EXTENSION: &str = "csv";

/// Where the schedule files of a run come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    Local(PathBuf),
}

impl SourceUri {
    /// Parse a plain path or a `file://` URI
    pub fn parse(uri: &str) -> Result<Self> {
        match Url::parse(uri) {
            Ok(url) => match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("Invalid file:// URI: {}", uri))?;
                    Ok(SourceUri::Local(path))
                }
                // A single letter is a Windows drive, not a scheme
                scheme if scheme.len() == 1 => Ok(SourceUri::Local(PathBuf::from(uri))),
                scheme => Err(anyhow!(
                    "Unsupported URI scheme: {}. Only local paths and file:// URIs are supported",
                    scheme
                )),
            },
            Err(_) => Ok(SourceUri::Local(PathBuf::from(uri))),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SourceUri::Local(path) => path,
        }
    }

    /// List the files to load
    ///
    /// A file is returned as is. A directory yields its `*.csv` entries
    /// (not recursive) sorted by name so runs are reproducible.
    pub async fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let path = self.path();
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Source not found: {}", path.display()))?;

        if metadata.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut entries = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to list directory {}", path.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let is_csv = entry_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION));
            if is_csv && entry.file_type().await?.is_file() {
                files.push(entry_path);
            }
        }
        files.sort();

        Ok(files)
    }
}
