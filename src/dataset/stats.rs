//! Row counts for the dataset tables

use serde::Serialize;

use crate::core::config::TableNames;
use crate::core::error::StoreError;
use crate::core::store::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStat {
    /// What the table holds (`features`, `samples`, ...)
    pub role: &'static str,
    pub table: String,
    pub exists: bool,
    pub rows: i64,
}

pub fn table_stats(store: &SqliteStore, tables: &TableNames) -> Result<Vec<TableStat>, StoreError> {
    let roles = [
        ("feature_parameters", &tables.feature_parameters),
        ("features", &tables.features),
        ("samples", &tables.samples),
        ("values", &tables.values),
    ];

    roles
        .into_iter()
        .map(|(role, table)| {
            let exists = store.has_table(table)?;
            let rows = if exists { store.row_count(table)? } else { 0 };
            Ok(TableStat {
                role,
                table: table.clone(),
                exists,
                rows,
            })
        })
        .collect()
}
