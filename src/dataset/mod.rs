//! Dataset producer: scans sparse sample × feature tables into the store
//!
//! Features are normalized (a feature row points at its parameters row by
//! name), samples carry their natural id directly, and every non-zero cell
//! becomes a value link between a sample and a feature.

pub mod ingest;
pub mod schema;
pub mod stats;
pub mod synth;

pub use ingest::{IngestStats, Ingestor};
pub use schema::init_schema;
pub use stats::{table_stats, TableStat};
pub use synth::{generate, SynthOptions, SynthStats};

use miette::Diagnostic;
use thiserror::Error;

use crate::core::error::{CacheError, StoreError};

#[derive(Debug, Error, Diagnostic)]
pub enum DatasetError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("CSV error: {0}")]
    #[diagnostic(code(dsml::dataset::csv))]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(dsml::dataset::io))]
    Io(#[from] std::io::Error),

    #[error("line {line}: missing sample id")]
    #[diagnostic(
        code(dsml::dataset::sample_id),
        help("the first column of every row must name the sample")
    )]
    MissingSampleId { line: u64 },

    #[error("line {line}, column {column:?}: {value:?} is not a finite number")]
    #[diagnostic(code(dsml::dataset::value))]
    InvalidValue {
        line: u64,
        column: String,
        value: String,
    },

    #[error("dataset has no feature columns")]
    #[diagnostic(
        code(dsml::dataset::header),
        help("expected a header row: sample id column followed by feature names")
    )]
    NoFeatures,

    #[error("invalid generator options: {0}")]
    #[diagnostic(code(dsml::dataset::options))]
    InvalidOptions(String),
}
