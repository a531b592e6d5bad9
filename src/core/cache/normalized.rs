//! Two-level cache: parameters normalized into their own table
//!
//! Distinct parameter tuples live once in a parameters table. The entity
//! table only stores a foreign key to it, so entity rows are resolved by
//! `parameters_id` after the parameters themselves have been resolved.

use std::collections::HashMap;

use tracing::{debug, trace, Span};

use super::{
    as_strs, check_row_count, decode_key, split_row, to_strings, validate_columns, Interner,
    LoadStats, ResolveStats,
};
use crate::core::entity::{Entity, EntityRef};
use crate::core::error::CacheError;
use crate::core::id::{RowId, SurrogateId};
use crate::core::keys::KeyTuple;
use crate::core::store::{BatchedInsert, InsertBatch, KeyedLookup, LookupRequest};

const DEFAULT_ID_COLUMN: &str = "id";
const DEFAULT_PARAMETERS_ID_COLUMN: &str = "parameters_id";

/// Outcome of a full two-level resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizedStats {
    pub parameters: ResolveStats,
    pub entities: ResolveStats,
}

/// Cache for entities whose parameters live in a separate table
pub struct NormalizedCache<P> {
    table: String,
    parameters_table: String,
    key_columns: Vec<String>,
    id_column: String,
    parameters_id_column: String,
    entities: Interner<P, EntityRef<P>>,
    span: Span,
}

impl<P: KeyTuple> NormalizedCache<P> {
    pub fn new<K: Into<String>>(
        table: impl Into<String>,
        parameters_table: impl Into<String>,
        key_columns: impl IntoIterator<Item = K>,
    ) -> Result<Self, CacheError> {
        let table = table.into();
        let parameters_table = parameters_table.into();
        let key_columns = to_strings(key_columns);
        validate_columns(&parameters_table, "key", &key_columns, P::ARITY)?;
        if table == parameters_table {
            return Err(CacheError::InvalidConfig {
                table,
                message: "entity and parameters tables must differ".to_string(),
            });
        }

        let span = tracing::debug_span!(
            "normalized_cache",
            table = %table,
            parameters_table = %parameters_table
        );
        Ok(Self {
            table,
            parameters_table,
            key_columns,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            parameters_id_column: DEFAULT_PARAMETERS_ID_COLUMN.to_string(),
            entities: Interner::new(),
            span,
        })
    }

    /// Surrogate key column of both tables (default `id`)
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Foreign-key column of the entity table (default `parameters_id`)
    pub fn with_parameters_id_column(mut self, column: impl Into<String>) -> Self {
        self.parameters_id_column = column.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn parameters_table(&self) -> &str {
        &self.parameters_table
    }

    pub fn find_by_parameters(&self, parameters: &P) -> Option<EntityRef<P>> {
        self.entities.get(parameters).cloned()
    }

    pub fn find_by_id(&self, id: RowId) -> Option<EntityRef<P>> {
        if !id.is_assigned() {
            return None;
        }
        self.entities.iter().find(|e| e.id() == id).cloned()
    }

    pub fn find_by_parameters_id(&self, id: RowId) -> Option<EntityRef<P>> {
        if !id.is_assigned() {
            return None;
        }
        self.entities
            .iter()
            .find(|e| e.parameters_id() == id)
            .cloned()
    }

    pub fn add(&mut self, entity: Entity<P>) -> EntityRef<P> {
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

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef<P>> {
        self.entities.iter()
    }

    /// Entities without an entity-level id
    pub fn unresolved_count(&self) -> usize {
        self.entities.iter().filter(|e| !e.id().is_assigned()).count()
    }

    pub fn ensure_resolved(&self) -> Result<(), CacheError> {
        match self.unresolved_count() {
            0 => Ok(()),
            count => Err(CacheError::Unresolved {
                table: self.table.clone(),
                count,
            }),
        }
    }

    /// Resolve `parameters_id` for entities whose parameters row already exists
    pub fn load_parameter_ids<S: KeyedLookup + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<LoadStats, CacheError> {
        let _guard = self.span.enter();

        let mut select = vec![self.id_column.as_str()];
        select.extend(as_strs(&self.key_columns));
        let mut request =
            LookupRequest::new(&self.parameters_table, select, as_strs(&self.key_columns));
        for entity in self
            .entities
            .iter()
            .filter(|e| !e.parameters_id().is_assigned())
        {
            request.add_key(entity.parameters().to_values());
        }

        let mut stats = LoadStats {
            requested: request.len(),
            ..LoadStats::default()
        };
        if request.is_empty() {
            debug!("load_parameter_ids: nothing pending");
            return Ok(stats);
        }

        let rows = store.lookup(&request)?;
        stats.returned = rows.len();
        check_row_count(&self.parameters_table, stats.requested, stats.returned)?;

        let mut resolved = Vec::with_capacity(rows.len());
        for row in &rows {
            let (id, key) = split_row(&self.parameters_table, row, 1, 1 + P::ARITY)?;
            resolved.push((
                RowId::from_values(&self.parameters_table, id)?,
                decode_key::<P>(&self.parameters_table, key)?,
            ));
        }

        for (id, parameters) in resolved {
            match self.entities.get(&parameters) {
                Some(entity) => {
                    if entity.assign_parameters_id(id) {
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
            "load_parameter_ids"
        );
        Ok(stats)
    }

    /// Insert parameter rows for entities still lacking a `parameters_id`
    pub fn create_parameter_ids<S: BatchedInsert + ?Sized>(
        &mut self,
        store: &S,
    ) -> Result<usize, CacheError> {
        let _guard = self.span.enter();

        let mut batch = InsertBatch::new(self.parameters_table.clone(), self.key_columns.clone());
        for entity in self
            .entities
            .iter()
            .filter(|e| !e.parameters_id().is_assigned())
        {
            batch.push(entity.parameters().to_values());
        }

        let pending = batch.len();
        let written = batch.flush(store)?;
        debug!(pending, written, "create_parameter_ids");
        Ok(written)
    }

    /// Resolve entity ids by `parameters_id`
    ///
    /// Entities whose parameters are unresolved are skipped: the parameter
    /// level has to run first.
    pub fn load_ids<S: KeyedLookup + ?Sized>(&mut self, store: &S) -> Result<LoadStats, CacheError> {
        let _guard = self.span.enter();

        let pending: HashMap<RowId, &EntityRef<P>> = self
            .entities
            .iter()
            .filter(|e| !e.id().is_assigned() && e.parameters_id().is_assigned())
            .map(|e| (e.parameters_id(), e))
            .collect();

        let mut request = LookupRequest::new(
            &self.table,
            vec![self.id_column.as_str(), self.parameters_id_column.as_str()],
            vec![self.parameters_id_column.as_str()],
        );
        for parameters_id in pending.keys() {
            request.add_key(parameters_id.to_values());
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

        let mut resolved = Vec::with_capacity(rows.len());
        for row in &rows {
            let (id, parameters_id) = split_row(&self.table, row, 1, 2)?;
            resolved.push((
                RowId::from_values(&self.table, id)?,
                RowId::from_values(&self.table, parameters_id)?,
            ));
        }

        for (id, parameters_id) in resolved {
            match pending.get(&parameters_id) {
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

    /// Insert entity rows (foreign key only) for resolved parameters
    pub fn create_ids<S: BatchedInsert + ?Sized>(&mut self, store: &S) -> Result<usize, CacheError> {
        let _guard = self.span.enter();

        let mut batch = InsertBatch::new(
            self.table.clone(),
            vec![self.parameters_id_column.clone()],
        );
        for entity in self
            .entities
            .iter()
            .filter(|e| !e.id().is_assigned() && e.parameters_id().is_assigned())
        {
            batch.push(entity.parameters_id().to_values());
        }

        let pending = batch.len();
        let written = batch.flush(store)?;
        debug!(pending, written, "create_ids");
        Ok(written)
    }

    /// Load → create → load against the parameters table
    pub fn resolve_parameters<S>(&mut self, store: &S) -> Result<ResolveStats, CacheError>
    where
        S: KeyedLookup + BatchedInsert + ?Sized,
    {
        let first = self.load_parameter_ids(store)?;
        let created = self.create_parameter_ids(store)?;
        let second = self.load_parameter_ids(store)?;
        let unresolved = self
            .entities
            .iter()
            .filter(|e| !e.parameters_id().is_assigned())
            .count();
        Ok(ResolveStats::from_phases(first, created, second, unresolved))
    }

    /// Load → create → load against the entity table
    pub fn resolve_entities<S>(&mut self, store: &S) -> Result<ResolveStats, CacheError>
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

    /// Full protocol: parameters first, then entities
    pub fn resolve<S>(&mut self, store: &S) -> Result<NormalizedStats, CacheError>
    where
        S: KeyedLookup + BatchedInsert + ?Sized,
    {
        let parameters = self.resolve_parameters(store)?;
        let entities = self.resolve_entities(store)?;
        Ok(NormalizedStats {
            parameters,
            entities,
        })
    }
}

impl<'a, P: KeyTuple> IntoIterator for &'a NormalizedCache<P> {
    type Item = &'a EntityRef<P>;
    type IntoIter = std::slice::Iter<'a, EntityRef<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
