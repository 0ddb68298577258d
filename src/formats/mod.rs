//! SBB schedule file format: line decoding and file reading

pub mod reader;
pub mod record;

pub use reader::{ParsedFile, RecordErrorPolicy, SkippedLine, read_schedule_file};
pub use record::{FIELD_COUNT, MalformedRecord, ScheduleRecord};
