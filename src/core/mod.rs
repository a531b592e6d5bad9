//! Core module - interning caches, surrogate ids and store collaborators

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod keys;
pub mod store;

pub use cache::{
    EntityCache, LinkCache, LoadStats, NormalizedCache, NormalizedStats, ResolveStats,
};
pub use config::{Config, TableNames};
pub use entity::{Entity, EntityRef, Identified, Link, LinkRef, Normalized};
pub use error::{CacheError, StoreError};
pub use id::{CompositeId, RowId, SurrogateId};
pub use keys::{ColumnValue, Columns, KeyScalar, KeyTuple};
pub use store::{BatchedInsert, InsertBatch, KeyedLookup, LookupRequest, MemoryStore, SqliteStore};
