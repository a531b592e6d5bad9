//! Store collaborators consumed by the caches
//!
//! The caches never talk SQL. They build one [`LookupRequest`] per phase
//! carrying every pending key, and one [`InsertBatch`] that is flushed once.
//! Implementations decide how to execute those against a real store.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use rusqlite::types::Value;

use crate::core::error::StoreError;

/// One stored row, values in the order of the requested columns
pub type Row = Vec<Value>;

/// Batched lookup: every stored row whose key columns match any key tuple
#[derive(Debug, Clone)]
pub struct LookupRequest<'a> {
    pub table: &'a str,
    pub select_columns: Vec<&'a str>,
    pub key_columns: Vec<&'a str>,
    pub keys: Vec<Row>,
}

impl<'a> LookupRequest<'a> {
    pub fn new(table: &'a str, select_columns: Vec<&'a str>, key_columns: Vec<&'a str>) -> Self {
        Self {
            table,
            select_columns,
            key_columns,
            keys: Vec::new(),
        }
    }

    pub fn add_key(&mut self, key: Row) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Rows accumulated for a single multi-row insert
#[derive(Debug, Clone)]
pub struct InsertBatch {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl InsertBatch {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Hand the accumulated rows to the store in one call
    ///
    /// Generated ids are not returned; they are picked up by a later lookup.
    pub fn flush<S: BatchedInsert + ?Sized>(self, store: &S) -> Result<usize, StoreError> {
        if self.rows.is_empty() {
            return Ok(0);
        }
        store.insert(&self)
    }
}

/// Executes a batched keyed lookup
pub trait KeyedLookup {
    fn lookup(&self, request: &LookupRequest<'_>) -> Result<Vec<Row>, StoreError>;
}

/// Executes a flushed insert batch, returning the number of rows written
pub trait BatchedInsert {
    fn insert(&self, batch: &InsertBatch) -> Result<usize, StoreError>;
}

impl<S: KeyedLookup + ?Sized> KeyedLookup for &S {
    fn lookup(&self, request: &LookupRequest<'_>) -> Result<Vec<Row>, StoreError> {
        (**self).lookup(request)
    }
}

impl<S: BatchedInsert + ?Sized> BatchedInsert for &S {
    fn insert(&self, batch: &InsertBatch) -> Result<usize, StoreError> {
        (**self).insert(batch)
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("features"), "\"features\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_empty_batch_flush_skips_store() {
        let store = MemoryStore::new();
        store.fail_next_insert("should not be reached");
        let batch = InsertBatch::new("missing", vec!["a".to_string()]);
        assert_eq!(batch.flush(&store).unwrap(), 0);
    }
}
