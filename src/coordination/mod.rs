//! Per-file loading and the multi-file run around it

pub mod coordinator;
pub mod loader;
pub mod report;

pub use coordinator::{Coordinator, LoadConfig};
pub use loader::{BatchLoader, FileLoadResult};
pub use report::{FileOutcome, FileStatus, RunReport, RunSettings};
