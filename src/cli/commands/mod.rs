//! CLI command implementations

pub mod completions;
pub mod ingest;
pub mod init;
pub mod stats;
pub mod synth;
