//! Discovery of the schedule files to load

pub mod source;

pub use source::SourceUri;
