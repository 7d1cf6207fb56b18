//! Key types used to identify rows.
//!
//! Primary keys come back from the database as `sea_orm::Value`s of whatever
//! width the backend picked. `RefractKey` normalises them so the same row
//! compares equal no matter which join it arrived through.

use crate::entity_metadata::AttributeType;
use sea_orm::Value;
use std::fmt;
use uuid::Uuid;

/// A single primary key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefractKey {
    Int(i64),
    String(String),
    Uuid(Uuid),
}

impl RefractKey {
    /// Read a key out of a database value. `None` for SQL NULL and for
    /// values that cannot identify a row.
    pub fn from_db_value(value: &Value) -> Option<Self> {
        match value {
            Value::TinyInt(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::SmallInt(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::Int(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::BigInt(Some(v)) => Some(Self::Int(*v)),
            Value::TinyUnsigned(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::SmallUnsigned(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::Unsigned(Some(v)) => Some(Self::Int(i64::from(*v))),
            Value::BigUnsigned(Some(v)) => i64::try_from(*v).ok().map(Self::Int),
            Value::String(Some(s)) => Some(Self::String((**s).clone())),
            Value::Uuid(Some(u)) => Some(Self::Uuid(**u)),
            _ => None,
        }
    }

    /// Convert to a database value shaped for a column of type `ty`.
    pub fn to_db_value(&self, ty: AttributeType) -> Value {
        match (self, ty) {
            (Self::Int(v), AttributeType::Integer) => match i32::try_from(*v) {
                Ok(narrow) => Value::Int(Some(narrow)),
                Err(_) => Value::BigInt(Some(*v)),
            },
            (Self::Int(v), _) => Value::BigInt(Some(*v)),
            (Self::String(s), _) => Value::String(Some(Box::new(s.clone()))),
            (Self::Uuid(u), AttributeType::Uuid) => Value::Uuid(Some(Box::new(*u))),
            (Self::Uuid(u), _) => Value::String(Some(Box::new(u.to_string()))),
        }
    }
}

impl fmt::Display for RefractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "{}", value),
            Self::Uuid(value) => write!(f, "{}", value),
        }
    }
}

impl From<i32> for RefractKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for RefractKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for RefractKey {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for RefractKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Uuid> for RefractKey {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// Full identity of a row: one component per primary key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub Vec<RefractKey>);

impl RowKey {
    /// Build a row key from the primary key values of a tuple. Any NULL or
    /// unusable component means the tuple is absent (outer-joined miss).
    pub fn from_values<'a, I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut parts = Vec::new();
        for value in values {
            parts.push(RefractKey::from_db_value(value)?);
        }
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts))
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_normalise() {
        assert_eq!(
            RefractKey::from_db_value(&Value::Int(Some(7))),
            RefractKey::from_db_value(&Value::BigInt(Some(7)))
        );
        assert_eq!(RefractKey::from_db_value(&Value::Int(None)), None);
    }

    #[test]
    fn test_db_value_conversion() {
        let key = RefractKey::from(42);
        assert_eq!(key.to_db_value(AttributeType::Integer), Value::Int(Some(42)));
        assert_eq!(key.to_db_value(AttributeType::BigInteger), Value::BigInt(Some(42)));

        let uuid = Uuid::new_v4();
        let key = RefractKey::from(uuid);
        assert_eq!(
            key.to_db_value(AttributeType::Uuid),
            Value::Uuid(Some(Box::new(uuid)))
        );
    }

    #[test]
    fn test_row_key_absent_when_any_part_is_null() {
        let values = [Value::Int(Some(1)), Value::Int(None)];
        assert!(RowKey::from_values(values.iter()).is_none());

        let values = [Value::Int(Some(1)), Value::Int(Some(2))];
        let key = RowKey::from_values(values.iter()).unwrap();
        assert_eq!(key.to_string(), "1,2");
    }
}
