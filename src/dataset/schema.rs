//! Table layout for the dataset

use crate::core::config::TableNames;
use crate::core::error::StoreError;
use crate::core::store::{quote_ident, MemoryStore, SqliteStore};

pub const ID: &str = "id";
pub const FEATURE_NAME: &str = "name";
pub const PARAMETERS_ID: &str = "parameters_id";
pub const SAMPLE_NATURAL_ID: &str = "natural_id";
pub const VALUE_SAMPLE_ID: &str = "sample_id";
pub const VALUE_FEATURE_ID: &str = "feature_id";
pub const VALUE: &str = "value";

/// `CREATE TABLE IF NOT EXISTS` statements for every dataset table
pub fn schema_sql(tables: &TableNames) -> String {
    let params = quote_ident(&tables.feature_parameters);
    let features = quote_ident(&tables.features);
    let samples = quote_ident(&tables.samples);
    let values = quote_ident(&tables.values);

    format!(
        r#"
CREATE TABLE IF NOT EXISTS {params} (
    {ID} INTEGER PRIMARY KEY AUTOINCREMENT,
    {FEATURE_NAME} TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS {features} (
    {ID} INTEGER PRIMARY KEY AUTOINCREMENT,
    {PARAMETERS_ID} INTEGER NOT NULL UNIQUE REFERENCES {params}({ID})
);

CREATE TABLE IF NOT EXISTS {samples} (
    {ID} INTEGER PRIMARY KEY AUTOINCREMENT,
    {SAMPLE_NATURAL_ID} TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS {values} (
    {VALUE_SAMPLE_ID} INTEGER NOT NULL REFERENCES {samples}({ID}),
    {VALUE_FEATURE_ID} INTEGER NOT NULL REFERENCES {features}({ID}),
    {VALUE} REAL NOT NULL,
    PRIMARY KEY ({VALUE_SAMPLE_ID}, {VALUE_FEATURE_ID})
);
"#
    )
}

/// Create the dataset tables if they do not exist yet
pub fn init_schema(store: &SqliteStore, tables: &TableNames) -> Result<(), StoreError> {
    store.execute_batch(&schema_sql(tables))
}

/// Same layout on an in-memory store
pub fn init_memory_schema(store: &MemoryStore, tables: &TableNames) -> Result<(), StoreError> {
    store.create_table(&tables.feature_parameters, &[ID, FEATURE_NAME], Some(ID));
    store.add_unique(&tables.feature_parameters, &[FEATURE_NAME])?;

    store.create_table(&tables.features, &[ID, PARAMETERS_ID], Some(ID));
    store.add_unique(&tables.features, &[PARAMETERS_ID])?;

    store.create_table(&tables.samples, &[ID, SAMPLE_NATURAL_ID], Some(ID));
    store.add_unique(&tables.samples, &[SAMPLE_NATURAL_ID])?;

    store.create_table(
        &tables.values,
        &[VALUE_SAMPLE_ID, VALUE_FEATURE_ID, VALUE],
        None,
    );
    store.add_unique(&tables.values, &[VALUE_SAMPLE_ID, VALUE_FEATURE_ID])
}
