//! Link cache: associations between two resolved parents
//!
//! A link row is keyed by the pair of parent ids. Links become eligible for
//! persistence only once both parents are resolved; until then they stay
//! pending and are skipped by every phase.

use std::collections::HashMap;

use tracing::{debug, trace, Span};

use super::{check_row_count, to_strings, validate_columns, Interner, LoadStats, ResolveStats};
use crate::core::entity::{EntityRef, Link, LinkRef};
use crate::core::error::CacheError;
use crate::core::id::{CompositeId, SurrogateId};
use crate::core::keys::{Columns, KeyTuple};
use crate::core::store::{BatchedInsert, InsertBatch, KeyedLookup, LookupRequest};

/// Cache of links, deduplicated by their parents' parameters
pub struct LinkCache<PA, PB, V> {
    table: String,
    parent_columns: Vec<String>,
    payload_columns: Vec<String>,
    links: Interner<(PA, PB), LinkRef<PA, PB, V>>,
    span: Span,
}

impl<PA: KeyTuple, PB: KeyTuple, V: Columns> LinkCache<PA, PB, V> {
    /// `parent_columns` names the source and target id columns, in that order
    pub fn new<A: Into<String>, B: Into<String>>(
        table: impl Into<String>,
        parent_columns: impl IntoIterator<Item = A>,
        payload_columns: impl IntoIterator<Item = B>,
    ) -> Result<Self, CacheError> {
        let table = table.into();
        let parent_columns = to_strings(parent_columns);
        let payload_columns = to_strings(payload_columns);
        validate_columns(&table, "parent", &parent_columns, CompositeId::<2>::ARITY)?;
        validate_columns(&table, "payload", &payload_columns, V::ARITY)?;

        let span = tracing::debug_span!("link_cache", table = %table);
        Ok(Self {
            table,
            parent_columns,
            payload_columns,
            links: Interner::new(),
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Intern a link; a second link between the same parents returns the first
    pub fn add(&mut self, link: Link<PA, PB, V>) -> LinkRef<PA, PB, V> {
        let _guard = self.span.enter();
        let (handle, inserted) = self.links.intern(link.key(), || LinkRef::new(link));
        trace!(inserted, size = self.links.len(), "add");
        handle
    }

    /// Shorthand for `add(Link::new(source, target, payload))`
    pub fn link(
        &mut self,
        source: &EntityRef<PA>,
        target: &EntityRef<PB>,
        payload: V,
    ) -> LinkRef<PA, PB, V> {
        self.add(Link::new(source, target, payload))
    }

    pub fn find(&self, source: &PA, target: &PB) -> Option<LinkRef<PA, PB, V>> {
        self.links.get(&(source.clone(), target.clone())).cloned()
    }

    pub fn find_by_id(&self, id: CompositeId<2>) -> Option<LinkRef<PA, PB, V>> {
        if !id.is_assigned() {
            return None;
        }
        self.links.iter().find(|l| l.id() == id).cloned()
    }

    pub fn size(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.len() == 0
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LinkRef<PA, PB, V>> {
        self.links.iter()
    }

    /// Links whose parents are not both resolved yet
    pub fn unresolved_count(&self) -> usize {
        self.links.iter().filter(|l| !l.id().is_assigned()).count()
    }

    /// Links not yet known to have a row
    pub fn unpersisted_count(&self) -> usize {
        self.links.iter().filter(|l| !l.is_persisted()).count()
    }

    pub fn ensure_resolved(&self) -> Result<(), CacheError> {
        match self.unpersisted_count() {
            0 => Ok(()),
            count => Err(CacheError::Unresolved {
                table: self.table.clone(),
                count,
            }),
        }
    }

    fn pending(&self) -> impl Iterator<Item = &LinkRef<PA, PB, V>> {
        self.links
            .iter()
            .filter(|l| l.id().is_assigned() && !l.is_persisted())
    }

    /// Mark links whose composite key already has a row
    pub fn load_ids<S: KeyedLookup + ?Sized>(&mut self, store: &S) -> Result<LoadStats, CacheError> {
        let _guard = self.span.enter();

        let pending: HashMap<CompositeId<2>, &LinkRef<PA, PB, V>> =
            self.pending().map(|l| (l.id(), l)).collect();

        let columns: Vec<&str> = self.parent_columns.iter().map(String::as_str).collect();
        let mut request = LookupRequest::new(&self.table, columns.clone(), columns);
        for id in pending.keys() {
            request.add_key(id.to_values());
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

        let ids = rows
            .iter()
            .map(|row| CompositeId::<2>::from_values(&self.table, row))
            .collect::<Result<Vec<_>, _>>()?;

        for id in ids {
            match pending.get(&id) {
                Some(link) if !link.is_persisted() => {
                    link.mark_persisted();
                    stats.assigned += 1;
                }
                Some(_) => {}
                None => stats.ignored += 1,
            }
        }

        debug!(
            requested = stats.requested,
            returned = stats.returned,
            persisted = stats.assigned,
            "load_ids"
        );
        Ok(stats)
    }

    /// Insert rows for resolved links that have none yet
    pub fn create_ids<S: BatchedInsert + ?Sized>(&mut self, store: &S) -> Result<usize, CacheError> {
        let _guard = self.span.enter();

        let columns = self
            .parent_columns
            .iter()
            .chain(&self.payload_columns)
            .cloned()
            .collect();
        let mut batch = InsertBatch::new(self.table.clone(), columns);
        for link in self.pending() {
            let mut row = link.id().to_values();
            row.extend(link.payload().to_values());
            batch.push(row);
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
            self.unpersisted_count(),
        ))
    }
}

impl<'a, PA: KeyTuple, PB: KeyTuple, V: Columns> IntoIterator for &'a LinkCache<PA, PB, V> {
    type Item = &'a LinkRef<PA, PB, V>;
    type IntoIter = std::slice::Iter<'a, LinkRef<PA, PB, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
