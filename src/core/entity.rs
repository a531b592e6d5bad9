//! Entities, shared handles and links
//!
//! An entity pairs immutable parameters with surrogate-id slots that only
//! the resolution protocol fills in. Caches hand out [`EntityRef`] handles;
//! a handle stays valid after its cache is cleared.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::core::id::{CompositeId, RowId, SurrogateId};
use crate::core::keys::{Columns, KeyTuple};

/// Anything with a surrogate id that may still be unassigned
pub trait Identified {
    type Id: SurrogateId;

    fn id(&self) -> Self::Id;

    fn is_resolved(&self) -> bool {
        self.id().is_assigned()
    }
}

/// Entities whose parameters live in a separate, normalized table
pub trait Normalized {
    fn parameters_id(&self) -> RowId;
}

/// A value-keyed record awaiting (or holding) its surrogate ids
pub struct Entity<P, I = RowId> {
    id: Cell<I>,
    parameters_id: Cell<RowId>,
    parameters: P,
}

impl<P: KeyTuple, I: SurrogateId> Entity<P, I> {
    /// Create an unresolved entity
    pub fn new(parameters: P) -> Self {
        Self {
            id: Cell::new(I::UNASSIGNED),
            parameters_id: Cell::new(RowId::UNASSIGNED),
            parameters,
        }
    }

    pub fn parameters(&self) -> &P {
        &self.parameters
    }

    pub fn id(&self) -> I {
        self.id.get()
    }

    pub fn parameters_id(&self) -> RowId {
        self.parameters_id.get()
    }

    /// Set the id if still unassigned; returns whether it was set
    pub(crate) fn assign_id(&self, id: I) -> bool {
        if self.id.get().is_assigned() || !id.is_assigned() {
            return false;
        }
        self.id.set(id);
        true
    }

    /// Set the parameters id if still unassigned; returns whether it was set
    pub(crate) fn assign_parameters_id(&self, id: RowId) -> bool {
        if self.parameters_id.get().is_assigned() || !id.is_assigned() {
            return false;
        }
        self.parameters_id.set(id);
        true
    }
}

impl<P: KeyTuple, I: SurrogateId> Identified for Entity<P, I> {
    type Id = I;

    fn id(&self) -> I {
        self.id.get()
    }
}

impl<P: KeyTuple, I: SurrogateId> Normalized for Entity<P, I> {
    fn parameters_id(&self) -> RowId {
        self.parameters_id.get()
    }
}

impl<P: fmt::Debug, I: Copy + fmt::Debug> fmt::Debug for Entity<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id.get())
            .field("parameters_id", &self.parameters_id.get())
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Shared handle to a cached entity
///
/// Two handles are equal when they point at the same instance. Within one
/// cache generation that is equivalent to having equal parameters.
pub struct EntityRef<P, I = RowId>(Rc<Entity<P, I>>);

impl<P, I> EntityRef<P, I> {
    pub(crate) fn new(entity: Entity<P, I>) -> Self {
        EntityRef(Rc::new(entity))
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<P, I> Clone for EntityRef<P, I> {
    fn clone(&self) -> Self {
        EntityRef(Rc::clone(&self.0))
    }
}

impl<P, I> Deref for EntityRef<P, I> {
    type Target = Entity<P, I>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<P, I> PartialEq for EntityRef<P, I> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<P, I> Eq for EntityRef<P, I> {}

impl<P: fmt::Debug, I: Copy + fmt::Debug> fmt::Debug for EntityRef<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Association between two cached entities plus a payload
///
/// A link never owns its parents' lifetime; its identity is derived from
/// the parents' ids each time it is asked for.
pub struct Link<PA, PB, V> {
    source: EntityRef<PA>,
    target: EntityRef<PB>,
    payload: V,
    persisted: Cell<bool>,
}

impl<PA: KeyTuple, PB: KeyTuple, V: Columns> Link<PA, PB, V> {
    pub fn new(source: &EntityRef<PA>, target: &EntityRef<PB>, payload: V) -> Self {
        Self {
            source: source.clone(),
            target: target.clone(),
            payload,
            persisted: Cell::new(false),
        }
    }

    pub fn source(&self) -> &EntityRef<PA> {
        &self.source
    }

    pub fn target(&self) -> &EntityRef<PB> {
        &self.target
    }

    pub fn payload(&self) -> &V {
        &self.payload
    }

    /// Concatenation of both parent ids, or the sentinel while either is unassigned
    pub fn id(&self) -> CompositeId<2> {
        let source = self.source.id();
        let target = self.target.id();
        if source.is_assigned() && target.is_assigned() {
            CompositeId::concat(source, target)
        } else {
            CompositeId::UNASSIGNED
        }
    }

    /// Whether a row for this link is known to exist in the store
    pub fn is_persisted(&self) -> bool {
        self.persisted.get()
    }

    pub(crate) fn mark_persisted(&self) {
        self.persisted.set(true);
    }

    /// Dedup key: the pair of parent parameters
    pub(crate) fn key(&self) -> (PA, PB) {
        (
            self.source.parameters().clone(),
            self.target.parameters().clone(),
        )
    }
}

impl<PA: KeyTuple, PB: KeyTuple, V: Columns> Identified for Link<PA, PB, V> {
    type Id = CompositeId<2>;

    fn id(&self) -> CompositeId<2> {
        Link::id(self)
    }
}

impl<PA: fmt::Debug, PB: fmt::Debug, V: fmt::Debug> fmt::Debug for Link<PA, PB, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("payload", &self.payload)
            .field("persisted", &self.persisted.get())
            .finish()
    }
}

/// Shared handle to a cached link
pub struct LinkRef<PA, PB, V>(Rc<Link<PA, PB, V>>);

impl<PA, PB, V> LinkRef<PA, PB, V> {
    pub(crate) fn new(link: Link<PA, PB, V>) -> Self {
        LinkRef(Rc::new(link))
    }
}

impl<PA, PB, V> Clone for LinkRef<PA, PB, V> {
    fn clone(&self) -> Self {
        LinkRef(Rc::clone(&self.0))
    }
}

impl<PA, PB, V> Deref for LinkRef<PA, PB, V> {
    type Target = Link<PA, PB, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<PA, PB, V> PartialEq for LinkRef<PA, PB, V> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<PA, PB, V> Eq for LinkRef<PA, PB, V> {}

impl<PA: fmt::Debug, PB: fmt::Debug, V: fmt::Debug> fmt::Debug for LinkRef<PA, PB, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
