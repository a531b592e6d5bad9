//! SQLite-backed store collaborator

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use super::{quote_ident, BatchedInsert, InsertBatch, KeyedLookup, LookupRequest, Row};
use crate::core::error::StoreError;

/// Bound parameters per statement, well under SQLite's compiled-in limit
const MAX_VARIABLES: usize = 10_000;

/// Keyed lookups and batched inserts over a single SQLite connection
pub struct SqliteStore {
    conn: Connection,
    ignore_conflicts: bool,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database (tests, scratch runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            ignore_conflicts: false,
        }
    }

    /// Use `INSERT OR IGNORE`, so rows rejected by a uniqueness constraint
    /// are skipped instead of failing the batch
    pub fn with_ignore_conflicts(mut self, ignore: bool) -> Self {
        self.ignore_conflicts = ignore;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Number of rows currently in `table`
    pub fn row_count(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Whether `table` exists in the database
    pub fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Run `f` inside a transaction, committing on success and rolling back on error
    pub fn in_transaction<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StoreError::from)?;
        let value = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

/// `"k" IN (?, ...)` for one key column, `("a", "b") IN (VALUES (?, ?), ...)` otherwise
fn key_predicate(key_columns: &[&str], n_keys: usize) -> String {
    if let [column] = key_columns {
        let marks = vec!["?"; n_keys].join(", ");
        return format!("{} IN ({})", quote_ident(column), marks);
    }

    let columns: Vec<String> = key_columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "({}) IN (VALUES {})",
        columns.join(", "),
        row_placeholders(key_columns.len(), n_keys)
    )
}

/// `(?, ?), (?, ?)` for `n_rows` rows of `width` values
fn row_placeholders(width: usize, n_rows: usize) -> String {
    let row = format!("({})", vec!["?"; width].join(", "));
    vec![row; n_rows].join(", ")
}

fn check_arity(expected: usize, rows: &[Row]) -> Result<(), StoreError> {
    if expected == 0 {
        return Err(StoreError::ArityMismatch { expected: 1, found: 0 });
    }
    match rows.iter().find(|r| r.len() != expected) {
        Some(row) => Err(StoreError::ArityMismatch {
            expected,
            found: row.len(),
        }),
        None => Ok(()),
    }
}

impl KeyedLookup for SqliteStore {
    fn lookup(&self, request: &LookupRequest<'_>) -> Result<Vec<Row>, StoreError> {
        let arity = request.key_columns.len();
        check_arity(arity, &request.keys)?;
        if request.keys.is_empty() {
            return Ok(Vec::new());
        }

        let select: Vec<String> = request.select_columns.iter().map(|c| quote_ident(c)).collect();
        let prefix = format!(
            "SELECT {} FROM {} WHERE ",
            select.join(", "),
            quote_ident(request.table)
        );

        let mut found = Vec::new();
        for chunk in request.keys.chunks((MAX_VARIABLES / arity).max(1)) {
            let sql = format!("{}{}", prefix, key_predicate(&request.key_columns, chunk.len()));
            trace!(table = request.table, keys = chunk.len(), "keyed lookup");

            let mut stmt = self.conn.prepare(&sql)?;
            let width = stmt.column_count();
            let mut rows = stmt.query(params_from_iter(chunk.iter().flatten()))?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(row.get::<_, Value>(i)?);
                }
                found.push(values);
            }
        }

        Ok(found)
    }
}

impl BatchedInsert for SqliteStore {
    fn insert(&self, batch: &InsertBatch) -> Result<usize, StoreError> {
        let width = batch.columns.len();
        check_arity(width, &batch.rows)?;

        let verb = if self.ignore_conflicts {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let columns: Vec<String> = batch.columns.iter().map(|c| quote_ident(c)).collect();

        let mut written = 0;
        for chunk in batch.rows.chunks((MAX_VARIABLES / width).max(1)) {
            let sql = format!(
                "{} INTO {} ({}) VALUES {}",
                verb,
                quote_ident(&batch.table),
                columns.join(", "),
                row_placeholders(width, chunk.len())
            );
            trace!(table = %batch.table, rows = chunk.len(), "batched insert");

            let mut stmt = self.conn.prepare(&sql)?;
            written += stmt.execute(params_from_iter(chunk.iter().flatten()))?;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                r#"CREATE TABLE pairs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    a INTEGER NOT NULL,
                    b TEXT NOT NULL,
                    UNIQUE (a, b)
                );"#,
            )
            .unwrap();
        store
    }

    fn pair(a: i64, b: &str) -> Row {
        vec![Value::Integer(a), Value::Text(b.to_string())]
    }

    #[test]
    fn test_key_predicate_shapes() {
        assert_eq!(key_predicate(&["k"], 3), "\"k\" IN (?, ?, ?)");
        assert_eq!(
            key_predicate(&["a", "b"], 2),
            "(\"a\", \"b\") IN (VALUES (?, ?), (?, ?))"
        );
    }

    #[test]
    fn test_insert_then_lookup_composite_keys() {
        let store = store_with_table();
        let mut batch = InsertBatch::new("pairs", vec!["a".into(), "b".into()]);
        batch.push(pair(1, "x"));
        batch.push(pair(2, "y"));
        batch.push(pair(3, "z"));
        assert_eq!(batch.flush(&store).unwrap(), 3);
        assert_eq!(store.row_count("pairs").unwrap(), 3);

        let mut request = LookupRequest::new("pairs", vec!["id", "a", "b"], vec!["a", "b"]);
        request.add_key(pair(2, "y"));
        request.add_key(pair(3, "z"));
        request.add_key(pair(9, "nope"));
        let mut rows = store.lookup(&request).unwrap();
        rows.sort_by_key(|r| match r[1] {
            Value::Integer(n) => n,
            _ => 0,
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1..], pair(2, "y")[..]);
        assert!(matches!(rows[1][0], Value::Integer(id) if id > 0));
    }

    #[test]
    fn test_lookup_chunks_large_requests() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE nums (id INTEGER PRIMARY KEY AUTOINCREMENT, n INTEGER NOT NULL);")
            .unwrap();

        let mut batch = InsertBatch::new("nums", vec!["n".into()]);
        for n in 0..(MAX_VARIABLES as i64 * 2 + 7) {
            batch.push(vec![Value::Integer(n)]);
        }
        let total = batch.len();
        batch.flush(&store).unwrap();

        let mut request = LookupRequest::new("nums", vec!["id", "n"], vec!["n"]);
        for n in 0..total as i64 {
            request.add_key(vec![Value::Integer(n)]);
        }
        assert_eq!(store.lookup(&request).unwrap().len(), total);
    }

    #[test]
    fn test_conflicts_fail_unless_ignored() {
        let store = store_with_table();
        let mut batch = InsertBatch::new("pairs", vec!["a".into(), "b".into()]);
        batch.push(pair(1, "x"));
        batch.clone().flush(&store).unwrap();

        assert!(matches!(batch.clone().flush(&store), Err(StoreError::Sqlite(_))));

        let store = store.with_ignore_conflicts(true);
        assert_eq!(batch.flush(&store).unwrap(), 0);
        assert_eq!(store.row_count("pairs").unwrap(), 1);
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let store = store_with_table();
        let mut batch = InsertBatch::new("pairs", vec!["a".into(), "b".into()]);
        batch.push(vec![Value::Integer(1)]);
        assert!(matches!(
            batch.flush(&store),
            Err(StoreError::ArityMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = store_with_table();
        let result: Result<(), StoreError> = store.in_transaction(|s| {
            let mut batch = InsertBatch::new("pairs", vec!["a".into(), "b".into()]);
            batch.push(pair(1, "x"));
            batch.flush(s)?;
            Err(StoreError::Unavailable("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.row_count("pairs").unwrap(), 0);
        assert!(store.has_table("pairs").unwrap());
        assert!(!store.has_table("nope").unwrap());
    }
}
