//! Error types for the caches and their store collaborators

use miette::Diagnostic;
use thiserror::Error;

/// Failures raised by a store collaborator (lookup or insert)
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    #[diagnostic(code(dsml::store::sqlite))]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown table '{0}'")]
    #[diagnostic(code(dsml::store::unknown_table))]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    #[diagnostic(code(dsml::store::unknown_column))]
    UnknownColumn { table: String, column: String },

    #[error("row has {found} values but {expected} columns were named")]
    #[diagnostic(code(dsml::store::arity))]
    ArityMismatch { expected: usize, found: usize },

    #[error("uniqueness constraint violated on table '{0}'")]
    #[diagnostic(code(dsml::store::unique))]
    UniqueViolation(String),

    #[error("store unavailable: {0}")]
    #[diagnostic(code(dsml::store::unavailable))]
    Unavailable(String),
}

/// Failures of the interning caches and the resolution protocol
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// More rows came back than keys were requested: duplicate rows under a
    /// supposedly unique key, or a key-matching defect. The whole phase is
    /// rejected and no ids from it are applied.
    #[error("lookup on '{table}' returned {returned} rows for {requested} requested keys")]
    #[diagnostic(
        code(dsml::cache::row_count_exceeded),
        help("add a uniqueness constraint on the key columns and remove duplicate rows")
    )]
    RowCountExceeded {
        table: String,
        requested: usize,
        returned: usize,
    },

    #[error("cannot decode row from '{table}': {message}")]
    #[diagnostic(code(dsml::cache::decode))]
    KeyDecode { table: String, message: String },

    #[error("invalid cache configuration for '{table}': {message}")]
    #[diagnostic(code(dsml::cache::config))]
    InvalidConfig { table: String, message: String },

    #[error("{count} entities in '{table}' have no surrogate id")]
    #[diagnostic(
        code(dsml::cache::unresolved),
        help("run the resolution protocol again once the store is reachable")
    )]
    Unresolved { table: String, count: usize },
}
