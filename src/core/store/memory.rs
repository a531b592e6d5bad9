//! In-memory store collaborator
//!
//! Tables hold plain rows with an optional autoincrement id column and
//! optional uniqueness constraints. Failures can be injected for the next
//! lookup or insert to exercise error propagation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use rusqlite::types::Value;

use super::{BatchedInsert, InsertBatch, KeyedLookup, LookupRequest, Row};
use crate::core::error::StoreError;

/// Hashable mirror of a stored value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for CellKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CellKey::Null,
            Value::Integer(n) => CellKey::Integer(*n),
            Value::Real(r) => CellKey::Real(r.to_bits()),
            Value::Text(s) => CellKey::Text(s.clone()),
            Value::Blob(b) => CellKey::Blob(b.clone()),
        }
    }
}

fn row_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<CellKey> {
    values.into_iter().map(CellKey::from).collect()
}

#[derive(Debug)]
struct MemTable {
    columns: Vec<String>,
    autoincrement: Option<usize>,
    unique: Vec<Vec<usize>>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemTable {
    fn column_index(&self, table: &str, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Existing keys for every uniqueness constraint, in constraint order
    fn unique_keys(&self) -> Vec<HashSet<Vec<CellKey>>> {
        self.unique
            .iter()
            .map(|cols| {
                self.rows
                    .iter()
                    .map(|row| row_key(cols.iter().map(|&i| &row[i])))
                    .collect()
            })
            .collect()
    }
}

/// Single-threaded in-memory tables
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<HashMap<String, MemTable>>,
    fail_lookup: RefCell<Option<String>>,
    fail_insert: RefCell<Option<String>>,
    lookups: Cell<usize>,
    inserts: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table; `autoincrement` names the generated id column
    pub fn create_table(&self, name: &str, columns: &[&str], autoincrement: Option<&str>) {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let autoincrement = autoincrement.and_then(|id| columns.iter().position(|c| c == id));
        self.tables.borrow_mut().insert(
            name.to_string(),
            MemTable {
                columns,
                autoincrement,
                unique: Vec::new(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// Reject inserts that duplicate an existing row on `columns`
    pub fn add_unique(&self, table: &str, columns: &[&str]) -> Result<(), StoreError> {
        let mut tables = self.tables.borrow_mut();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let indices = columns
            .iter()
            .map(|c| t.column_index(table, c))
            .collect::<Result<Vec<_>, _>>()?;
        t.unique.push(indices);
        Ok(())
    }

    /// Append a complete row, bypassing constraints
    pub fn insert_raw(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let mut tables = self.tables.borrow_mut();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        if row.len() != t.columns.len() {
            return Err(StoreError::ArityMismatch {
                expected: t.columns.len(),
                found: row.len(),
            });
        }
        if let Some(idx) = t.autoincrement {
            if let Value::Integer(n) = row[idx] {
                t.next_id = t.next_id.max(n + 1);
            }
        }
        t.rows.push(row);
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .borrow()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Make the next lookup fail with `message`
    pub fn fail_next_lookup(&self, message: &str) {
        *self.fail_lookup.borrow_mut() = Some(message.to_string());
    }

    /// Make the next non-empty insert fail with `message`
    pub fn fail_next_insert(&self, message: &str) {
        *self.fail_insert.borrow_mut() = Some(message.to_string());
    }

    /// Number of lookup calls served so far
    pub fn lookup_calls(&self) -> usize {
        self.lookups.get()
    }

    /// Number of insert calls served so far
    pub fn insert_calls(&self) -> usize {
        self.inserts.get()
    }
}

impl KeyedLookup for MemoryStore {
    fn lookup(&self, request: &LookupRequest<'_>) -> Result<Vec<Row>, StoreError> {
        if let Some(message) = self.fail_lookup.borrow_mut().take() {
            return Err(StoreError::Unavailable(message));
        }
        self.lookups.set(self.lookups.get() + 1);

        let tables = self.tables.borrow();
        let t = tables
            .get(request.table)
            .ok_or_else(|| StoreError::UnknownTable(request.table.to_string()))?;

        let key_idx = request
            .key_columns
            .iter()
            .map(|c| t.column_index(request.table, c))
            .collect::<Result<Vec<_>, _>>()?;
        let select_idx = request
            .select_columns
            .iter()
            .map(|c| t.column_index(request.table, c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut wanted = HashSet::with_capacity(request.keys.len());
        for key in &request.keys {
            if key.len() != key_idx.len() {
                return Err(StoreError::ArityMismatch {
                    expected: key_idx.len(),
                    found: key.len(),
                });
            }
            wanted.insert(row_key(key));
        }

        Ok(t.rows
            .iter()
            .filter(|row| wanted.contains(&row_key(key_idx.iter().map(|&i| &row[i]))))
            .map(|row| select_idx.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }
}

impl BatchedInsert for MemoryStore {
    fn insert(&self, batch: &InsertBatch) -> Result<usize, StoreError> {
        if let Some(message) = self.fail_insert.borrow_mut().take() {
            return Err(StoreError::Unavailable(message));
        }
        self.inserts.set(self.inserts.get() + 1);

        let mut tables = self.tables.borrow_mut();
        let t = tables
            .get_mut(&batch.table)
            .ok_or_else(|| StoreError::UnknownTable(batch.table.clone()))?;

        let idx = batch
            .columns
            .iter()
            .map(|c| t.column_index(&batch.table, c))
            .collect::<Result<Vec<_>, _>>()?;

        // Stage every row first so a failing batch leaves the table untouched
        let mut seen = t.unique_keys();
        let mut next_id = t.next_id;
        let mut staged = Vec::with_capacity(batch.rows.len());
        for values in &batch.rows {
            if values.len() != idx.len() {
                return Err(StoreError::ArityMismatch {
                    expected: idx.len(),
                    found: values.len(),
                });
            }
            let mut row = vec![Value::Null; t.columns.len()];
            for (&i, value) in idx.iter().zip(values) {
                row[i] = value.clone();
            }
            if let Some(id_idx) = t.autoincrement {
                if row[id_idx] == Value::Null {
                    row[id_idx] = Value::Integer(next_id);
                }
                if let Value::Integer(n) = row[id_idx] {
                    next_id = next_id.max(n + 1);
                }
            }
            for (cols, keys) in t.unique.iter().zip(seen.iter_mut()) {
                if !keys.insert(row_key(cols.iter().map(|&i| &row[i]))) {
                    return Err(StoreError::UniqueViolation(batch.table.clone()));
                }
            }
            staged.push(row);
        }

        let written = staged.len();
        t.next_id = next_id;
        t.rows.extend(staged);
        Ok(written)
    }
}
