//! Interning entity caches and the surrogate-id resolution protocol
//!
//! A cache deduplicates entities by parameters and reconciles them with a
//! store table in three phases:
//! 1. `load_ids` - one batched lookup for every unresolved entity
//! 2. `create_ids` - one batched insert for whatever is still unresolved
//! 3. `load_ids` again - pick up the ids the store generated
//!
//! Uniqueness of the key columns is the store's job. Without it, rows
//! created concurrently by another writer come back as duplicates and the
//! lookup fails with [`CacheError::RowCountExceeded`].

mod link;
mod normalized;

pub use link::LinkCache;
pub use normalized::{NormalizedCache, NormalizedStats};

use std::collections::HashMap;
use std::hash::Hash;

use rusqlite::types::Value;
use tracing::{debug, error, trace, Span};

use crate::core::entity::{Entity, EntityRef};
use crate::core::error::CacheError;
use crate::core::id::{RowId, SurrogateId};
use crate::core::keys::KeyTuple;
use crate::core::store::{BatchedInsert, InsertBatch, KeyedLookup, LookupRequest, Row};

/// Outcome of one lookup phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Keys sent in the batched lookup
    pub requested: usize,
    /// Rows the store returned
    pub returned: usize,
    /// Entities that received an id
    pub assigned: usize,
    /// Returned rows that matched no pending entity
    pub ignored: usize,
}

/// Outcome of a full load → create → load run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Resolved from rows that already existed
    pub existing: usize,
    /// Rows written by the create phase
    pub created: usize,
    /// Resolved from rows generated by the create phase
    pub generated: usize,
    /// Still unresolved afterwards
    pub unresolved: usize,
}

impl ResolveStats {
    pub(crate) fn from_phases(
        first: LoadStats,
        created: usize,
        second: LoadStats,
        unresolved: usize,
    ) -> Self {
        Self {
            existing: first.assigned,
            created,
            generated: second.assigned,
            unresolved,
        }
    }

    pub fn resolved(&self) -> usize {
        self.existing + self.generated
    }
}

/// Insertion-ordered, hash-indexed set of shared handles
pub(crate) struct Interner<K, H> {
    items: Vec<H>,
    index: HashMap<K, H>,
}

impl<K: Eq + Hash, H: Clone> Interner<K, H> {
    pub(crate) fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<&H> {
        self.index.get(key)
    }

    /// Return the handle stored under `key`, creating it with `make` if absent
    pub(crate) fn intern(&mut self, key: K, make: impl FnOnce() -> H) -> (H, bool) {
        if let Some(existing) = self.index.get(&key) {
            return (existing.clone(), false);
        }
        let handle = make();
        self.items.push(handle.clone());
        self.index.insert(key, handle.clone());
        (handle, true)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, H> {
        self.items.iter()
    }
}

/// The store may never return more rows than keys were requested
pub(crate) fn check_row_count(
    table: &str,
    requested: usize,
    returned: usize,
) -> Result<(), CacheError> {
    if returned > requested {
        error!(table, requested, returned, "lookup returned more rows than requested keys");
        return Err(CacheError::RowCountExceeded {
            table: table.to_string(),
            requested,
            returned,
        });
    }
    Ok(())
}

/// Split a returned row into its leading `head` values and the rest
pub(crate) fn split_row<'r>(
    table: &str,
    row: &'r Row,
    head: usize,
    width: usize,
) -> Result<(&'r [Value], &'r [Value]), CacheError> {
    if row.len() != width {
        return Err(CacheError::KeyDecode {
            table: table.to_string(),
            message: format!("expected {} columns, found {}", width, row.len()),
        });
    }
    Ok(row.split_at(head))
}

pub(crate) fn decode_key<K: KeyTuple>(table: &str, values: &[Value]) -> Result<K, CacheError> {
    K::from_values(values).ok_or_else(|| CacheError::KeyDecode {
        table: table.to_string(),
        message: format!("key columns do not match the parameter tuple: {:?}", values),
    })
}

pub(crate) fn validate_columns(
    table: &str,
    what: &str,
    columns: &[String],
    arity: usize,
) -> Result<(), CacheError> {
    if columns.len() != arity {
        return Err(CacheError::InvalidConfig {
            table: table.to_string(),
            message: format!("{} {} columns configured, tuple has {}", columns.len(), what, arity),
        });
    }
    if columns.iter().any(|c| c.trim().is_empty()) {
        return Err(CacheError::InvalidConfig {
            table: table.to_string(),
            message: format!("empty {} column name", what),
        });
    }
    Ok(())
}

pub(crate) fn to_strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    items.into_iter().map(Into::into).collect()
}

pub(crate) fn as_strs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

/// Cache for entities whose parameters are stored in the entity table itself
pub struct EntityCache<P, I = RowId> {
    table: String,
    id_columns: Vec<String>,
    key_columns: Vec<String>,
    entities: Interner<P, EntityRef<P, I>>,
    span: Span,
}

impl<P: KeyTuple, I: SurrogateId> EntityCache<P, I> {
    /// Create a cache for `table`
    ///
    /// `id_columns` must match the id arity and `key_columns` the parameter
    /// tuple, field for field.
    pub fn new<A, B>(
        table: impl Into<String>,
        id_columns: impl IntoIterator<Item = A>,
        key_columns: impl IntoIterator<Item = B>,
    ) -> Result<Self, CacheError>
    where
        A: Into<String>,
        B: Into<String>,
    {
        let table = table.into();
        let id_columns = to_strings(id_columns);
        let key_columns = to_strings(key_columns);
        validate_columns(&table, "id", &id_columns, I::ARITY)?;
        validate_columns(&table, "key", &key_columns, P::ARITY)?;

        let span = tracing::debug_span!("entity_cache", table = %table);
        Ok(Self {
            table,
            id_columns,
            key_columns,
            entities: Interner::new(),
            span,
        })
    }

    /// Log this cache's activity under `span` instead of its default span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn find_by_parameters(&self, parameters: &P) -> Option<EntityRef<P, I>> {
        self.entities.get(parameters).cloned()
    }

    pub fn find_by_id(&self, id: I) -> Option<EntityRef<P, I>> {
        if !id.is_assigned() {
            return None;
        }
        self.entities.iter().find(|e| e.id() == id).cloned()
    }

    /// Intern `entity`, returning the existing handle if its parameters are already cached
    pub fn add(&mut self, entity: Entity<P, I>) -> EntityRef<P, I> {
        let _guard = self.span.enter();
        let key = entity.parameters().clone();
        let (handle, inserted) = self.entities.intern(key, || EntityRef::new(entity));
        trace!(inserted, size = self.entities.len(), "add");
        handle
    }

    pub fn size(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.len() == 0
    }

    /// Forget every entity; handles held elsewhere stay valid
    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef<P, I>> {
        self.entities.iter()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entities.iter().filter(|e| !e.id().is_assigned()).count()
    }

    /// Fail unless every cached entity has an id
    pub fn ensure_resolved(&self) -> Result<(), CacheError> {
        match self.unresolved_count() {
            0 => Ok(()),
            count => Err(CacheError::Unresolved {
                table: self.table.clone(),
                count,
            }),
        }
    }

    /// Phase 1 and 3: resolve unassigned entities against existing rows
    pub fn load_ids<S: KeyedLookup + ?Sized>(&mut self, store: &S) -> Result<LoadStats, CacheError> {
        let _guard = self.span.enter();

        let mut request = LookupRequest::new(
            &self.table,
            self.id_columns
                .iter()
                .chain(&self.key_columns)
                .map(String::as_str)
                .collect(),
            as_strs(&self.key_columns),
        );
        for entity in self.entities.iter().filter(|e| !e.id().is_assigned()) {
            request.add_key(entity.parameters().to_values());
        }

        let mut stats = LoadStats {
            requested: request.len(),
            ..LoadStats::default()
        };
        if request.is_empty() {
            debug!("load_ids: nothing pending");
            return Ok(stats);
        }

        let rows = store.lookup(&request)?;
        stats.returned = rows.len();
        check_row_count(&self.table, stats.requested, stats.returned)?;

        // Decode everything before touching any entity
        let width = I::ARITY + P::ARITY;
        let mut resolved = Vec::with_capacity(rows.len());
        for row in &rows {
            let (id, key) = split_row(&self.table, row, I::ARITY, width)?;
            resolved.push((I::from_values(&self.table, id)?, decode_key::<P>(&self.table, key)?));
        }

        for (id, parameters) in resolved {
            match self.entities.get(&parameters) {
                Some(entity) => {
                    if entity.assign_id(id) {
                        stats.assigned += 1;
                    }
                }
                None => stats.ignored += 1,
            }
        }

        debug!(
            requested = stats.requested,
            returned = stats.returned,
            assigned = stats.assigned,
            "load_ids"
        );
        Ok(stats)
    }

    /// Phase 2: insert every still-unresolved entity in one batch
    pub fn create_ids<S: BatchedInsert + ?Sized>(&mut self, store: &S) -> Result<usize, CacheError> {
        let _guard = self.span.enter();

        let mut batch = InsertBatch::new(self.table.clone(), self.key_columns.clone());
        for entity in self.entities.iter().filter(|e| !e.id().is_assigned()) {
            batch.push(entity.parameters().to_values());
        }

        let pending = batch.len();
        let written = batch.flush(store)?;
        debug!(pending, written, "create_ids");
        Ok(written)
    }

    /// Run load → create → load
    pub fn resolve<S>(&mut self, store: &S) -> Result<ResolveStats, CacheError>
    where
        S: KeyedLookup + BatchedInsert + ?Sized,
    {
        let first = self.load_ids(store)?;
        let created = self.create_ids(store)?;
        let second = self.load_ids(store)?;
        Ok(ResolveStats::from_phases(
            first,
            created,
            second,
            self.unresolved_count(),
        ))
    }
}

impl<'a, P, I> IntoIterator for &'a EntityCache<P, I>
where
    P: KeyTuple,
    I: SurrogateId,
{
    type Item = &'a EntityRef<P, I>;
    type IntoIter = std::slice::Iter<'a, EntityRef<P, I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::CompositeId;
    use crate::core::store::MemoryStore;

    type SampleCache = EntityCache<(i64,)>;

    fn sample_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("samples", &["id", "natural_id"], Some("id"));
        store.add_unique("samples", &["natural_id"]).unwrap();
        store
    }

    fn sample_cache() -> SampleCache {
        EntityCache::new("samples", ["id"], ["natural_id"]).unwrap()
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut cache = sample_cache();
        let a = cache.add(Entity::new((1,)));
        let b = cache.add(Entity::new((1,)));
        assert_eq!(a, b);
        assert_eq!(cache.size(), 1);

        cache.add(Entity::new((2,)));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_find_by_parameters_returns_added_handle() {
        let mut cache = sample_cache();
        let handles: Vec<_> = (0..20).map(|n| cache.add(Entity::new((n,)))).collect();
        for h in &handles {
            assert_eq!(cache.find_by_parameters(h.parameters()).as_ref(), Some(h));
        }
        assert!(cache.find_by_parameters(&(99,)).is_none());
    }

    #[test]
    fn test_clear_keeps_outstanding_handles() {
        let mut cache = sample_cache();
        let handle = cache.add(Entity::new((7,)));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(handle.parameters(), &(7,));
        assert!(cache.find_by_parameters(&(7,)).is_none());

        // A fresh generation creates a new instance
        let again = cache.add(Entity::new((7,)));
        assert_ne!(handle, again);
    }

    #[test]
    fn test_resolve_assigns_every_id() {
        let store = sample_store();
        let mut cache = sample_cache();
        for n in 0..50 {
            cache.add(Entity::new((n,)));
        }

        let stats = cache.resolve(&store).unwrap();
        assert_eq!(stats.existing, 0);
        assert_eq!(stats.created, 50);
        assert_eq!(stats.generated, 50);
        assert_eq!(stats.unresolved, 0);
        cache.ensure_resolved().unwrap();
        assert_eq!(store.row_count("samples"), 50);

        // One lookup per phase, one insert for the whole batch
        assert_eq!(store.lookup_calls(), 2);
        assert_eq!(store.insert_calls(), 1);

        let h = cache.find_by_parameters(&(10,)).unwrap();
        assert_eq!(cache.find_by_id(h.id()), Some(h));
        assert!(cache.find_by_id(RowId::UNASSIGNED).is_none());
    }

    #[test]
    fn test_load_resolves_existing_rows_and_ignores_strangers() {
        let store = sample_store();
        store
            .insert_raw("samples", vec![Value::Integer(40), Value::Integer(4)])
            .unwrap();
        store
            .insert_raw("samples", vec![Value::Integer(41), Value::Integer(5)])
            .unwrap();

        let mut cache = sample_cache();
        let four = cache.add(Entity::new((4,)));
        let six = cache.add(Entity::new((6,)));

        let stats = cache.load_ids(&store).unwrap();
        assert_eq!(stats.requested, 2);
        assert_eq!(stats.returned, 1);
        assert_eq!(four.id(), RowId(40));
        assert!(!six.id().is_assigned());

        let stats = cache.resolve(&store).unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(six.id(), RowId(42));
        assert_eq!(four.id(), RowId(40));
    }

    #[test]
    fn test_resolved_ids_never_change() {
        let store = sample_store();
        let mut cache = sample_cache();
        let first = cache.add(Entity::new((1,)));
        cache.resolve(&store).unwrap();
        let id = first.id();

        cache.add(Entity::new((2,)));
        cache.resolve(&store).unwrap();
        cache.resolve(&store).unwrap();
        assert_eq!(first.id(), id);
    }

    #[test]
    fn test_create_twice_adds_no_rows() {
        let store = sample_store();
        let mut cache = sample_cache();
        for n in 0..10 {
            cache.add(Entity::new((n,)));
        }
        cache.resolve(&store).unwrap();
        assert_eq!(cache.create_ids(&store).unwrap(), 0);
        assert_eq!(store.row_count("samples"), 10);
    }

    #[test]
    fn test_duplicate_rows_fail_the_phase() {
        let store = MemoryStore::new();
        store.create_table("samples", &["id", "natural_id"], Some("id"));
        store
            .insert_raw("samples", vec![Value::Integer(1), Value::Integer(3)])
            .unwrap();
        store
            .insert_raw("samples", vec![Value::Integer(2), Value::Integer(3)])
            .unwrap();

        let mut cache = sample_cache();
        let three = cache.add(Entity::new((3,)));
        let err = cache.load_ids(&store).unwrap_err();
        assert!(matches!(
            err,
            CacheError::RowCountExceeded {
                requested: 1,
                returned: 2,
                ..
            }
        ));
        assert!(!three.id().is_assigned());
    }

    #[test]
    fn test_store_failure_propagates_and_keeps_progress() {
        let store = sample_store();
        let mut cache = sample_cache();
        let early = cache.add(Entity::new((1,)));
        cache.resolve(&store).unwrap();

        let late = cache.add(Entity::new((2,)));
        store.fail_next_insert("connection reset");
        let err = cache.resolve(&store).unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
        assert!(early.id().is_assigned());
        assert!(!late.id().is_assigned());
        assert!(matches!(
            cache.ensure_resolved(),
            Err(CacheError::Unresolved { count: 1, .. })
        ));

        // Re-running the protocol converges
        cache.resolve(&store).unwrap();
        assert!(late.id().is_assigned());
    }

    #[test]
    fn test_lookup_failure_propagates_and_keeps_progress() {
        let store = sample_store();
        let mut cache = sample_cache();
        let early = cache.add(Entity::new((1,)));
        cache.resolve(&store).unwrap();
        let early_id = early.id();

        let late = cache.add(Entity::new((2,)));
        store.fail_next_lookup("timeout");
        let err = cache.load_ids(&store).unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
        assert_eq!(early.id(), early_id);
        assert!(!late.id().is_assigned());
        assert_eq!(cache.unresolved_count(), 1);

        cache.resolve(&store).unwrap();
        assert_eq!(early.id(), early_id);
        assert!(late.id().is_assigned());
    }

    #[test]
    fn test_composite_ids_resolve_from_existing_rows() {
        let store = MemoryStore::new();
        store.create_table("cells", &["row", "col", "label"], None);
        store
            .insert_raw(
                "cells",
                vec![Value::Integer(1), Value::Integer(2), Value::Text("a".into())],
            )
            .unwrap();

        let mut cache: EntityCache<(String,), CompositeId<2>> =
            EntityCache::new("cells", ["row", "col"], ["label"]).unwrap();
        let a = cache.add(Entity::new(("a".to_string(),)));
        let b = cache.add(Entity::new(("b".to_string(),)));
        cache.load_ids(&store).unwrap();

        assert_eq!(a.id(), CompositeId([1, 2]));
        assert_eq!(b.id(), CompositeId::UNASSIGNED);
        assert_eq!(cache.unresolved_count(), 1);
    }

    #[test]
    fn test_config_must_match_tuple_arity() {
        let err = EntityCache::<(i64, i64)>::new("t", ["id"], ["a"]).err().unwrap();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
        let err = EntityCache::<(i64,), CompositeId<2>>::new("t", ["id"], ["a"]).err().unwrap();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
        assert!(EntityCache::<(i64,)>::new("t", ["id"], [" "]).is_err());
    }
}
