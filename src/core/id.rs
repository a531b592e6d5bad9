//! Surrogate ids: scalar row ids and fixed-arity composite ids
//!
//! A surrogate id is assigned by the store. The zero value (all parts zero
//! for composite ids) is the "unassigned" sentinel, and every "needs
//! resolution" check compares against it.

use std::fmt;
use std::hash::Hash;

use rusqlite::types::Value;

use crate::core::error::CacheError;

/// Common interface for scalar and composite surrogate ids
pub trait SurrogateId: Copy + Eq + Hash + fmt::Debug {
    /// Number of integer columns this id occupies
    const ARITY: usize;

    /// The unassigned sentinel
    const UNASSIGNED: Self;

    /// Whether the store has assigned this id
    fn is_assigned(&self) -> bool {
        *self != Self::UNASSIGNED
    }

    /// The id's integer parts in column order
    fn parts(&self) -> Vec<i64>;

    /// Build an id from exactly `ARITY` parts
    fn from_parts(parts: &[i64]) -> Option<Self>;

    /// Parts as store values, for lookup keys and inserted rows
    fn to_values(&self) -> Vec<Value> {
        self.parts().into_iter().map(Value::Integer).collect()
    }

    /// Decode an id from the leading id columns of a returned row
    fn from_values(table: &str, values: &[Value]) -> Result<Self, CacheError> {
        let mut parts = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            match value {
                Value::Integer(n) => parts.push(*n),
                other => {
                    return Err(CacheError::KeyDecode {
                        table: table.to_string(),
                        message: format!("id column {} is not an integer: {:?}", i, other),
                    })
                }
            }
        }
        Self::from_parts(&parts).ok_or_else(|| CacheError::KeyDecode {
            table: table.to_string(),
            message: format!("expected {} id columns, found {}", Self::ARITY, parts.len()),
        })
    }
}

/// Scalar surrogate key (an autoincrement row id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RowId(pub i64);

impl RowId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl SurrogateId for RowId {
    const ARITY: usize = 1;
    const UNASSIGNED: Self = RowId(0);

    fn parts(&self) -> Vec<i64> {
        vec![self.0]
    }

    fn from_parts(parts: &[i64]) -> Option<Self> {
        match parts {
            [n] => Some(RowId(*n)),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        RowId(n)
    }
}

/// Composite surrogate key spanning `N` integer columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositeId<const N: usize>(pub [i64; N]);

impl<const N: usize> CompositeId<N> {
    pub fn new(parts: [i64; N]) -> Self {
        CompositeId(parts)
    }

    /// Concatenate two ids whose arities add up to `N`
    ///
    /// Returns `None` when the arities do not fit.
    pub fn join<A: SurrogateId, B: SurrogateId>(a: &A, b: &B) -> Option<Self> {
        if A::ARITY + B::ARITY != N {
            return None;
        }
        let mut parts = a.parts();
        parts.extend(b.parts());
        Self::from_parts(&parts)
    }

    /// Split into a leading id and a trailing id whose arities add up to `N`
    pub fn decompose<A: SurrogateId, B: SurrogateId>(&self) -> Option<(A, B)> {
        if A::ARITY + B::ARITY != N {
            return None;
        }
        let (head, tail) = self.0.split_at(A::ARITY);
        Some((A::from_parts(head)?, B::from_parts(tail)?))
    }
}

impl CompositeId<2> {
    /// Pair of two scalar ids, as used by link tables
    pub fn concat(a: RowId, b: RowId) -> Self {
        CompositeId([a.0, b.0])
    }

    pub fn split(self) -> (RowId, RowId) {
        (RowId(self.0[0]), RowId(self.0[1]))
    }
}

impl<const N: usize> Default for CompositeId<N> {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl<const N: usize> SurrogateId for CompositeId<N> {
    const ARITY: usize = N;
    const UNASSIGNED: Self = CompositeId([0; N]);

    fn parts(&self) -> Vec<i64> {
        self.0.to_vec()
    }

    fn from_parts(parts: &[i64]) -> Option<Self> {
        let parts: [i64; N] = parts.try_into().ok()?;
        Some(CompositeId(parts))
    }
}

impl<const N: usize> fmt::Display for CompositeId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
