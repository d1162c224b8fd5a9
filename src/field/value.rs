//! Typed field values (§3.1, §4.3).

use std::cmp::Ordering;

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldType {
    Int64,
    Float64,
    Text,
    Blob,
}

/// A field value, or `Null`. Nullability is per-field; whether `Null`
/// is legal for a given field is enforced by `Schema` at record-build
/// time, not by this type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int64(i64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

impl FieldValue {
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Int64(_) => Some(FieldType::Int64),
            FieldValue::Float64(_) => Some(FieldType::Float64),
            FieldValue::Text(_) => Some(FieldType::Text),
            FieldValue::Blob(_) => Some(FieldType::Blob),
            FieldValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Base (ascending) comparison. NULL sorts greater than every
    /// non-null value (§4.1.2); direction is applied by the caller.
    pub fn compare_base(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Null, _) => Ordering::Greater,
            (_, FieldValue::Null) => Ordering::Less,
            (FieldValue::Int64(a), FieldValue::Int64(b)) => a.cmp(b),
            (FieldValue::Float64(a), FieldValue::Float64(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Blob(a), FieldValue::Blob(b)) => a.cmp(b),
            _ => panic!("comparing field values of different types"),
        }
    }
}
