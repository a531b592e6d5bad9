//! Sparse CSV ingestion
//!
//! The feature cache lives for the whole run; sample and value caches are
//! flushed and cleared every `flush_every` samples so memory stays bounded
//! by the flush interval plus the number of distinct features.

use std::io::Read;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use super::schema::{
    FEATURE_NAME, ID, PARAMETERS_ID, SAMPLE_NATURAL_ID, VALUE, VALUE_FEATURE_ID, VALUE_SAMPLE_ID,
};
use super::DatasetError;
use crate::core::cache::{EntityCache, LinkCache, NormalizedCache};
use crate::core::config::TableNames;
use crate::core::entity::Entity;
use crate::core::error::CacheError;
use crate::core::store::{BatchedInsert, KeyedLookup};

type FeatureKey = (String,);
type SampleKey = (String,);

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Data rows read
    pub rows: usize,
    /// Distinct features seen
    pub features: usize,
    /// Samples flushed (a sample repeated across flushes counts once per flush)
    pub samples: usize,
    /// Non-zero cells flushed
    pub values: usize,
    pub flushes: usize,
    /// Rows written to any table
    pub inserted: usize,
}

pub struct Ingestor {
    flush_every: usize,
    features: NormalizedCache<FeatureKey>,
    samples: EntityCache<SampleKey>,
    values: LinkCache<SampleKey, FeatureKey, (f64,)>,
    pending: usize,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(tables: &TableNames, flush_every: usize) -> Result<Self, CacheError> {
        let features = NormalizedCache::new(
            tables.features.as_str(),
            tables.feature_parameters.as_str(),
            [FEATURE_NAME],
        )?
        .with_id_column(ID)
        .with_parameters_id_column(PARAMETERS_ID);
        let samples = EntityCache::new(tables.samples.as_str(), [ID], [SAMPLE_NATURAL_ID])?;
        let values = LinkCache::new(
            tables.values.as_str(),
            [VALUE_SAMPLE_ID, VALUE_FEATURE_ID],
            [VALUE],
        )?;

        Ok(Self {
            flush_every: flush_every.max(1),
            features,
            samples,
            values,
            pending: 0,
            stats: IngestStats::default(),
        })
    }

    pub fn features(&self) -> &NormalizedCache<FeatureKey> {
        &self.features
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            features: self.features.size(),
            ..self.stats
        }
    }

    /// Queue one sample and its non-zero cells
    pub fn add_sample<'a>(
        &mut self,
        natural_id: &str,
        cells: impl IntoIterator<Item = (&'a str, f64)>,
    ) {
        let sample = self.samples.add(Entity::new((natural_id.to_string(),)));
        for (name, value) in cells {
            if value == 0.0 {
                continue;
            }
            let feature = self.features.add(Entity::new((name.to_string(),)));
            let link = self.values.link(&sample, &feature, (value,));
            if link.payload().0 != value {
                warn!(
                    sample = natural_id,
                    feature = name,
                    kept = link.payload().0,
                    dropped = value,
                    "duplicate cell, keeping first value"
                );
            }
        }
        self.pending += 1;
    }

    /// Resolve everything queued so far, then drop the sample-level caches
    pub fn flush<S>(&mut self, store: &S) -> Result<(), CacheError>
    where
        S: KeyedLookup + BatchedInsert + ?Sized,
    {
        let features = self.features.resolve(store)?;
        self.features.ensure_resolved()?;
        let samples = self.samples.resolve(store)?;
        self.samples.ensure_resolved()?;
        let values = self.values.resolve(store)?;
        self.values.ensure_resolved()?;

        self.stats.samples += self.samples.size();
        self.stats.values += self.values.size();
        self.stats.inserted += features.parameters.created
            + features.entities.created
            + samples.created
            + values.created;
        self.stats.flushes += 1;
        debug!(
            samples = self.samples.size(),
            values = self.values.size(),
            features = self.features.size(),
            "flushed"
        );

        self.samples.clear();
        self.values.clear();
        self.pending = 0;
        Ok(())
    }

    /// Scan a sparse CSV: a header row, then one row per sample
    ///
    /// The first column holds the sample id, the others feature values.
    /// Empty and zero cells are off; `NaN` and infinite cells are rejected.
    /// A sample repeated with a different value for the same feature keeps
    /// the first value, both within a flush and against rows already stored.
    pub fn ingest_csv<R, S>(&mut self, reader: R, store: &S) -> Result<IngestStats, DatasetError>
    where
        R: Read,
        S: KeyedLookup + BatchedInsert + ?Sized,
    {
        let span = info_span!("ingest", flush_every = self.flush_every);
        let _guard = span.enter();

        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let names: Vec<String> = csv.headers()?.iter().skip(1).map(String::from).collect();
        if names.is_empty() {
            return Err(DatasetError::NoFeatures);
        }

        let mut record = csv::StringRecord::new();
        while csv.read_record(&mut record)? {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let natural_id = match record.get(0) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => return Err(DatasetError::MissingSampleId { line }),
            };

            let mut cells = Vec::new();
            for (name, raw) in names.iter().zip(record.iter().skip(1)) {
                if raw.is_empty() {
                    continue;
                }
                let invalid = || DatasetError::InvalidValue {
                    line,
                    column: name.clone(),
                    value: raw.to_string(),
                };
                let value: f64 = raw.parse().map_err(|_| invalid())?;
                // SQLite stores NaN as NULL
                if !value.is_finite() {
                    return Err(invalid());
                }
                cells.push((name.as_str(), value));
            }

            self.add_sample(&natural_id, cells);
            self.stats.rows += 1;
            if self.pending >= self.flush_every {
                self.flush(store)?;
            }
        }

        if self.pending > 0 || self.stats.flushes == 0 {
            self.flush(store)?;
        }

        let stats = self.stats();
        info!(
            rows = stats.rows,
            features = stats.features,
            values = stats.values,
            flushes = stats.flushes,
            "ingest complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{MemoryStore, SqliteStore};
    use crate::dataset::schema::{init_memory_schema, init_schema};

    const CSV: &str = "\
sample,f0,f1,f2
a,0.5,,0
b,,1.5,2.5
c,0,0,
";

    fn memory_store(tables: &TableNames) -> MemoryStore {
        let store = MemoryStore::new();
        init_memory_schema(&store, tables).unwrap();
        store
    }

    #[test]
    fn test_ingest_sparse_rows() {
        let tables = TableNames::default();
        let store = memory_store(&tables);
        let mut ingestor = Ingestor::new(&tables, 53).unwrap();

        let stats = ingestor.ingest_csv(CSV.as_bytes(), &store).unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.features, 3);
        assert_eq!(stats.values, 3);
        assert_eq!(stats.flushes, 1);

        assert_eq!(store.row_count(&tables.samples), 3);
        assert_eq!(store.row_count(&tables.feature_parameters), 3);
        assert_eq!(store.row_count(&tables.features), 3);
        assert_eq!(store.row_count(&tables.values), 3);
        assert_eq!(stats.inserted, 12);
    }

    #[test]
    fn test_flush_interval_bounds_sample_cache() {
        let tables = TableNames::default();
        let store = memory_store(&tables);
        let mut ingestor = Ingestor::new(&tables, 2).unwrap();

        let mut csv = String::from("sample,x,y\n");
        for k in 0..7 {
            csv.push_str(&format!("s{},{},1\n", k, k));
        }
        let stats = ingestor.ingest_csv(csv.as_bytes(), &store).unwrap();

        // 3 full flushes of 2 samples, then the remainder
        assert_eq!(stats.flushes, 4);
        assert_eq!(stats.samples, 7);
        assert_eq!(store.row_count(&tables.samples), 7);
        // s0 has x = 0, so 13 values
        assert_eq!(store.row_count(&tables.values), 13);
        assert_eq!(store.row_count(&tables.features), 2);
    }

    #[test]
    fn test_reingest_adds_nothing() {
        let tables = TableNames::default();
        let store = SqliteStore::open_in_memory().unwrap();
        init_schema(&store, &tables).unwrap();

        Ingestor::new(&tables, 2)
            .unwrap()
            .ingest_csv(CSV.as_bytes(), &store)
            .unwrap();
        let stats = Ingestor::new(&tables, 2)
            .unwrap()
            .ingest_csv(CSV.as_bytes(), &store)
            .unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(store.row_count(&tables.samples).unwrap(), 3);
        assert_eq!(store.row_count(&tables.values).unwrap(), 3);
    }

    #[test]
    fn test_bad_cells_are_reported() {
        let tables = TableNames::default();
        let store = memory_store(&tables);

        let err = Ingestor::new(&tables, 10)
            .unwrap()
            .ingest_csv("sample,f0\na,abc\n".as_bytes(), &store)
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidValue { line: 2, .. }));

        let err = Ingestor::new(&tables, 10)
            .unwrap()
            .ingest_csv("sample,f0\n,1\n".as_bytes(), &store)
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingSampleId { .. }));

        for bad in ["NaN", "inf", "-inf"] {
            let err = Ingestor::new(&tables, 10)
                .unwrap()
                .ingest_csv(format!("sample,f0,f1\na,{},1\n", bad).as_bytes(), &store)
                .unwrap_err();
            match err {
                DatasetError::InvalidValue { line, column, value } => {
                    assert_eq!(line, 2);
                    assert_eq!(column, "f0");
                    assert_eq!(value, bad);
                }
                other => panic!("expected InvalidValue, got {:?}", other),
            }
        }
        assert_eq!(store.row_count(&tables.samples), 0);

        let err = Ingestor::new(&tables, 10)
            .unwrap()
            .ingest_csv("sample\na\n".as_bytes(), &store)
            .unwrap_err();
        assert!(matches!(err, DatasetError::NoFeatures));
    }

    #[test]
    fn test_non_finite_cell_reported_before_sqlite_write() {
        let tables = TableNames::default();
        let store = SqliteStore::open_in_memory().unwrap();
        init_schema(&store, &tables).unwrap();

        let err = Ingestor::new(&tables, 1)
            .unwrap()
            .ingest_csv("sample,f0,f1\na,1,2\nb,NaN,1\n".as_bytes(), &store)
            .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::InvalidValue { line: 3, ref column, .. } if column == "f0"
        ));
        // Only the row before the bad one was flushed
        assert_eq!(store.row_count(&tables.samples).unwrap(), 1);
        assert_eq!(store.row_count(&tables.values).unwrap(), 2);
    }

    #[test]
    fn test_repeated_cell_keeps_first_value() {
        let tables = TableNames::default();
        let store = SqliteStore::open_in_memory().unwrap();
        init_schema(&store, &tables).unwrap();

        let stats = Ingestor::new(&tables, 53)
            .unwrap()
            .ingest_csv("sample,f0\na,1.5\na,2.5\n".as_bytes(), &store)
            .unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.values, 1);

        // Against the stored row as well
        Ingestor::new(&tables, 53)
            .unwrap()
            .ingest_csv("sample,f0\na,9\n".as_bytes(), &store)
            .unwrap();

        let value: f64 = store
            .connection()
            .query_row("SELECT value FROM \"values\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 1.5);
    }

    #[test]
    fn test_store_failure_surfaces() {
        let tables = TableNames::default();
        let store = memory_store(&tables);
        store.fail_next_insert("disk full");

        let err = Ingestor::new(&tables, 10)
            .unwrap()
            .ingest_csv(CSV.as_bytes(), &store)
            .unwrap_err();
        assert!(matches!(err, DatasetError::Cache(CacheError::Store(_))));
    }
}
