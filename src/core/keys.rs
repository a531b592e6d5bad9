//! Parameter tuples and column values
//!
//! Parameters are an entity's logical identity: a fixed-arity tuple of
//! scalars whose field order matches the key columns configured on a cache.

use std::fmt;
use std::hash::Hash;

use rusqlite::types::Value;

/// A scalar that can be written to a store column
pub trait ColumnValue {
    fn to_value(&self) -> Value;
}

/// A scalar usable inside a dedup key: comparable, hashable and decodable
pub trait KeyScalar: ColumnValue + Clone + Eq + Hash + fmt::Debug {
    fn from_value(value: &Value) -> Option<Self>;
}

impl ColumnValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl KeyScalar for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl ColumnValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl KeyScalar for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => i32::try_from(*n).ok(),
            _ => None,
        }
    }
}

impl ColumnValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl KeyScalar for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(0) => Some(false),
            Value::Integer(1) => Some(true),
            _ => None,
        }
    }
}

impl ColumnValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl KeyScalar for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

// Reals are payload-only: they have no total equality, so they never key a cache.
impl ColumnValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

/// A fixed-arity row fragment
pub trait Columns {
    const ARITY: usize;

    fn to_values(&self) -> Vec<Value>;
}

/// Parameters of an entity: the dedup key of a cache
pub trait KeyTuple: Columns + Clone + Eq + Hash + fmt::Debug {
    /// Decode from exactly `ARITY` values, in key column order
    fn from_values(values: &[Value]) -> Option<Self>;
}

impl Columns for () {
    const ARITY: usize = 0;

    fn to_values(&self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! impl_tuple {
    ($arity:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: ColumnValue),+> Columns for ($($name,)+) {
            const ARITY: usize = $arity;

            fn to_values(&self) -> Vec<Value> {
                vec![$(self.$idx.to_value()),+]
            }
        }

        impl<$($name: KeyScalar),+> KeyTuple for ($($name,)+) {
            fn from_values(values: &[Value]) -> Option<Self> {
                if values.len() != $arity {
                    return None;
                }
                Some(($($name::from_value(&values[$idx])?,)+))
            }
        }
    };
}

impl_tuple!(1; A: 0);
impl_tuple!(2; A: 0, B: 1);
impl_tuple!(3; A: 0, B: 1, C: 2);
impl_tuple!(4; A: 0, B: 1, C: 2, D: 3);
impl_tuple!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_arity() {
        assert_eq!(<(i64,) as Columns>::ARITY, 1);
        assert_eq!(<(i64, String, bool) as Columns>::ARITY, 3);
        assert_eq!(<() as Columns>::ARITY, 0);
    }

    #[test]
    fn test_decode_mixed_tuple() {
        let values = vec![Value::Integer(4), Value::Text("petal".into()), Value::Integer(1)];
        let decoded = <(i64, String, bool)>::from_values(&values).unwrap();
        assert_eq!(decoded, (4, "petal".to_string(), true));
        assert_eq!(decoded.to_values(), values);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(<(i64,)>::from_values(&[Value::Text("4".into())]).is_none());
        assert!(<(i64,)>::from_values(&[Value::Integer(1), Value::Integer(2)]).is_none());
        assert!(<(i32,)>::from_values(&[Value::Integer(i64::MAX)]).is_none());
        assert!(<(bool,)>::from_values(&[Value::Integer(2)]).is_none());
    }

    #[test]
    fn test_real_payload_columns() {
        assert_eq!((0.5f64,).to_values(), vec![Value::Real(0.5)]);
    }
}
