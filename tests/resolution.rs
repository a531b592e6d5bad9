//! Resolution protocol against SQLite
//!
//! These tests drive the caches through real SQL: batched `IN` lookups,
//! multi-row inserts, autoincrement ids and uniqueness constraints.

use dsml::core::{
    CacheError, CompositeId, Entity, EntityCache, LinkCache, NormalizedCache, RowId, SqliteStore,
    StoreError, SurrogateId,
};
use tempfile::TempDir;

const PARAMETERS_DDL: &str = r#"
CREATE TABLE feature_parameters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name INTEGER NOT NULL UNIQUE
);
CREATE TABLE features (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parameters_id INTEGER NOT NULL UNIQUE REFERENCES feature_parameters(id)
);
"#;

fn open_on_disk(tmp: &TempDir) -> SqliteStore {
    let store = SqliteStore::open(tmp.path().join("resolution.db")).unwrap();
    store.execute_batch(PARAMETERS_DDL).unwrap();
    store
}

fn feature_cache() -> NormalizedCache<(i64,)> {
    NormalizedCache::new("features", "feature_parameters", ["name"]).unwrap()
}

#[test]
fn test_ten_thousand_parameters_in_two_batches() {
    let tmp = TempDir::new().unwrap();
    let store = open_on_disk(&tmp);
    let mut cache = feature_cache();

    let values: Vec<i64> = (0..10_000).map(|n| n * 7 + 3).collect();

    for &v in &values[..5_000] {
        cache.add(Entity::new((v,)));
    }
    assert_eq!(cache.create_parameter_ids(&store).unwrap(), 5_000);
    cache.load_parameter_ids(&store).unwrap();
    assert_eq!(store.row_count("feature_parameters").unwrap(), 5_000);
    assert!(cache.iter().all(|e| e.parameters_id().is_assigned()));

    // Nothing left to create
    assert_eq!(cache.create_parameter_ids(&store).unwrap(), 0);
    assert_eq!(store.row_count("feature_parameters").unwrap(), 5_000);

    for &v in &values[5_000..] {
        cache.add(Entity::new((v,)));
    }
    assert_eq!(cache.size(), 10_000);
    cache.create_parameter_ids(&store).unwrap();
    cache.load_parameter_ids(&store).unwrap();
    assert_eq!(store.row_count("feature_parameters").unwrap(), 10_000);
    assert!(cache.iter().all(|e| e.parameters_id().is_assigned()));
}

#[test]
fn test_entity_level_requires_parameter_level() {
    let tmp = TempDir::new().unwrap();
    let store = open_on_disk(&tmp);
    let mut cache = feature_cache();
    for n in 0..100 {
        cache.add(Entity::new((n,)));
    }

    let stats = cache.resolve_entities(&store).unwrap();
    assert_eq!(stats.created, 0);
    assert_eq!(cache.unresolved_count(), 100);
    assert_eq!(store.row_count("features").unwrap(), 0);

    let stats = cache.resolve(&store).unwrap();
    assert_eq!(stats.parameters.created, 100);
    assert_eq!(stats.entities.created, 100);
    cache.ensure_resolved().unwrap();

    let e = cache.find_by_parameters(&(42,)).unwrap();
    assert_eq!(cache.find_by_parameters_id(e.parameters_id()), Some(e.clone()));
    assert_eq!(cache.find_by_id(e.id()), Some(e));
}

#[test]
fn test_resolution_survives_a_fresh_cache() {
    let tmp = TempDir::new().unwrap();
    let store = open_on_disk(&tmp);

    let mut first = feature_cache();
    let a = first.add(Entity::new((1,)));
    first.resolve(&store).unwrap();

    // A new producer run sees the rows written by the previous one
    let mut second = feature_cache();
    let again = second.add(Entity::new((1,)));
    let stats = second.resolve(&store).unwrap();
    assert_eq!(stats.parameters.existing, 1);
    assert_eq!(stats.entities.existing, 1);
    assert_eq!(again.id(), a.id());
    assert_eq!(again.parameters_id(), a.parameters_id());
}

fn sample_store(unique: bool) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let constraint = if unique { "UNIQUE" } else { "" };
    store
        .execute_batch(&format!(
            "CREATE TABLE samples (id INTEGER PRIMARY KEY AUTOINCREMENT, natural_id TEXT NOT NULL {});",
            constraint
        ))
        .unwrap();
    store
}

fn sample_cache() -> EntityCache<(String,)> {
    EntityCache::new("samples", ["id"], ["natural_id"]).unwrap()
}

fn sample(name: &str) -> Entity<(String,)> {
    Entity::new((name.to_string(),))
}

#[test]
fn test_concurrent_writer_converges_with_ignore_conflicts() {
    let store = sample_store(true).with_ignore_conflicts(true);
    let mut ours = sample_cache();
    let mut theirs = sample_cache();

    let mine = ours.add(sample("s1"));
    ours.load_ids(&store).unwrap();

    // Another writer creates the same row between our phases
    let other = theirs.add(sample("s1"));
    theirs.resolve(&store).unwrap();

    assert_eq!(ours.create_ids(&store).unwrap(), 0);
    ours.load_ids(&store).unwrap();
    assert_eq!(mine.id(), other.id());
    assert_eq!(store.row_count("samples").unwrap(), 1);
}

#[test]
fn test_concurrent_writer_without_ignore_surfaces_constraint() {
    let store = sample_store(true);
    let mut ours = sample_cache();
    let mut theirs = sample_cache();

    ours.add(sample("s1"));
    ours.load_ids(&store).unwrap();
    theirs.add(sample("s1"));
    theirs.resolve(&store).unwrap();

    let err = ours.create_ids(&store).unwrap_err();
    assert!(matches!(err, CacheError::Store(StoreError::Sqlite(_))));

    // Re-running the protocol converges
    ours.resolve(&store).unwrap();
    ours.ensure_resolved().unwrap();
}

#[test]
fn test_missing_uniqueness_fails_loudly() {
    let store = sample_store(false);
    let mut ours = sample_cache();
    let mut theirs = sample_cache();

    let mine = ours.add(sample("s1"));
    ours.load_ids(&store).unwrap();
    theirs.add(sample("s1"));
    theirs.resolve(&store).unwrap();

    // The duplicate row gets written, and the next lookup sees two rows for one key
    assert_eq!(ours.create_ids(&store).unwrap(), 1);
    let err = ours.load_ids(&store).unwrap_err();
    assert!(matches!(
        err,
        CacheError::RowCountExceeded {
            requested: 1,
            returned: 2,
            ..
        }
    ));
    assert!(!mine.id().is_assigned());
}

#[test]
fn test_create_in_transaction_rolls_back() {
    let store = sample_store(true);
    let mut cache = sample_cache();
    for n in 0..10 {
        cache.add(sample(&format!("s{}", n)));
    }

    let result: Result<usize, CacheError> = store.in_transaction(|s| {
        cache.create_ids(s)?;
        Err(CacheError::Store(StoreError::Unavailable("abort".into())))
    });
    assert!(result.is_err());
    assert_eq!(store.row_count("samples").unwrap(), 0);
    assert_eq!(cache.unresolved_count(), 10);

    let stats = store.in_transaction(|s| cache.resolve(s)).unwrap();
    assert_eq!(stats.generated, 10);
}

#[test]
fn test_links_resolve_against_composite_primary_key() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .execute_batch(
            r#"
CREATE TABLE samples (id INTEGER PRIMARY KEY AUTOINCREMENT, natural_id TEXT NOT NULL UNIQUE);
CREATE TABLE features (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);
CREATE TABLE "values" (
    sample_id INTEGER NOT NULL REFERENCES samples(id),
    feature_id INTEGER NOT NULL REFERENCES features(id),
    value REAL NOT NULL,
    PRIMARY KEY (sample_id, feature_id)
);
"#,
        )
        .unwrap();

    let mut samples = sample_cache();
    let mut features: EntityCache<(String,)> =
        EntityCache::new("features", ["id"], ["name"]).unwrap();
    let mut values: LinkCache<(String,), (String,), (f64,)> =
        LinkCache::new("values", ["sample_id", "feature_id"], ["value"]).unwrap();

    let mut links = Vec::new();
    for s in 0..30 {
        let source = samples.add(sample(&format!("s{}", s)));
        for f in 0..(s % 5 + 1) {
            let target = features.add(Entity::new((format!("f{}", f),)));
            links.push(values.link(&source, &target, (s as f64 + f as f64 / 10.0,)));
        }
    }
    assert!(links.iter().all(|l| l.id() == CompositeId::UNASSIGNED));

    samples.resolve(&store).unwrap();
    features.resolve(&store).unwrap();
    let stats = values.resolve(&store).unwrap();
    assert_eq!(stats.created, links.len());
    values.ensure_resolved().unwrap();
    assert_eq!(store.row_count("values").unwrap(), links.len() as i64);

    let (sample_id, feature_id) = links[0].id().split();
    assert_eq!(sample_id, links[0].source().id());
    assert_eq!(feature_id, links[0].target().id());
    assert_ne!(sample_id, RowId::UNASSIGNED);

    // A second pass over the same links writes nothing
    values.clear();
    for link in &links {
        values.link(link.source(), link.target(), *link.payload());
    }
    let stats = values.resolve(&store).unwrap();
    assert_eq!(stats.existing, links.len());
    assert_eq!(stats.created, 0);
}
