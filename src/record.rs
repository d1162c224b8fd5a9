//! Records and composite-key comparison/encoding (§3.1, §4.1.2, §4.3).

use crate::error::{Result, StorageError};
use crate::field::{codec, FieldValue};
use crate::schema::Schema;
use std::cmp::Ordering;

/// A full record: ordered key fields followed by ordered value fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Vec<FieldValue>,
    pub value: Vec<FieldValue>,
}

impl Record {
    pub fn new(key: Vec<FieldValue>, value: Vec<FieldValue>) -> Self {
        Self { key, value }
    }

    /// Validate arity and nullability of `self.key`/`self.value` against `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        validate_tuple(&self.key, &schema.key_fields)?;
        validate_tuple(&self.value, &schema.value_fields)?;
        Ok(())
    }
}

fn validate_tuple(values: &[FieldValue], defs: &[crate::schema::FieldDef]) -> Result<()> {
    if values.len() != defs.len() {
        return Err(StorageError::bad_argument(format!(
            "expected {} fields, got {}",
            defs.len(),
            values.len()
        )));
    }
    for (v, d) in values.iter().zip(defs.iter()) {
        if v.is_null() {
            if !d.nullable {
                return Err(StorageError::bad_argument(format!("field {} is not nullable", d.name)));
            }
            continue;
        }
        if v.field_type() != Some(d.ty) {
            return Err(StorageError::bad_argument(format!(
                "field {} has wrong type",
                d.name
            )));
        }
    }
    Ok(())
}

/// Composite comparison over the leading `key.len().min(other.len())`
/// fields, each compared under its schema direction (§4.1.2). If one
/// side is a strict prefix of the other, the shorter side sorts first
/// (standard lexicographic prefix ordering) — this is what lets a
/// partial boundary like `fetch`'s key prefix or a truncated range
/// bound descend to the correct leftmost/rightmost subtree instead of
/// comparing Equal to every full-length key sharing that prefix.
pub fn compare_keys(schema: &Schema, a: &[FieldValue], b: &[FieldValue]) -> Ordering {
    for (i, def) in schema.key_fields.iter().enumerate() {
        if i >= a.len() || i >= b.len() {
            break;
        }
        let ord = codec::compare(&a[i], &b[i], def.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Whether `key` begins with `prefix` under the schema's per-field
/// comparison (used for `fetch` and the compiled LIKE-prefix equality).
pub fn key_starts_with(schema: &Schema, key: &[FieldValue], prefix: &[FieldValue]) -> bool {
    if prefix.len() > key.len() {
        return false;
    }
    for (i, def) in schema.key_fields.iter().enumerate().take(prefix.len()) {
        if codec::compare(&key[i], &prefix[i], def.direction) != Ordering::Equal {
            return false;
        }
    }
    true
}

/// Encode a composite key tuple: a leading null bitmap followed by the
/// inline bytes of every non-null field, in field order (§4.3).
pub fn encode_key(key: &[FieldValue]) -> Result<Vec<u8>> {
    encode_tuple(key)
}

/// Decode a composite key tuple previously written by `encode_key`.
pub fn decode_key(schema: &Schema, bytes: &[u8]) -> Result<Vec<FieldValue>> {
    decode_tuple(&schema.key_fields, bytes)
}

/// Encode a value tuple the same way a key tuple is encoded: a leading
/// null bitmap followed by the inline bytes of every non-null field.
pub fn encode_value(value: &[FieldValue]) -> Result<Vec<u8>> {
    encode_tuple(value)
}

/// Decode a value tuple previously written by `encode_value`.
pub fn decode_value(schema: &Schema, bytes: &[u8]) -> Result<Vec<FieldValue>> {
    decode_tuple(&schema.value_fields, bytes)
}

fn encode_tuple(fields: &[FieldValue]) -> Result<Vec<u8>> {
    let bitmap_bytes = Schema::null_bitmap_bytes(fields.len());
    let mut buf = vec![0u8; bitmap_bytes];
    for (i, v) in fields.iter().enumerate() {
        if v.is_null() {
            buf[i / 8] |= 1 << (i % 8);
        } else {
            codec::write(&mut buf, v)?;
        }
    }
    Ok(buf)
}

fn decode_tuple(defs: &[crate::schema::FieldDef], bytes: &[u8]) -> Result<Vec<FieldValue>> {
    let bitmap_bytes = Schema::null_bitmap_bytes(defs.len());
    if bytes.len() < bitmap_bytes {
        return Err(StorageError::corruption("truncated tuple null bitmap"));
    }
    let bitmap = &bytes[0..bitmap_bytes];
    let mut offset = bitmap_bytes;
    let mut out = Vec::with_capacity(defs.len());
    for (i, def) in defs.iter().enumerate() {
        let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            out.push(FieldValue::Null);
        } else {
            let (v, n) = codec::read(def.ty, &bytes[offset..])?;
            offset += n;
            out.push(v);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::schema::FieldDef;
    use crate::types::Direction;

    fn composite_schema() -> Schema {
        Schema::new(
            vec![
                FieldDef::key("a", FieldType::Int64, Direction::Ascending, false),
                FieldDef::key("b", FieldType::Text, Direction::Descending, false),
            ],
            vec![FieldDef::value("v", FieldType::Int64, false)],
        )
    }

    #[test]
    fn test_composite_compare_second_field_descends() {
        let schema = composite_schema();
        let k1 = vec![FieldValue::Int64(1), FieldValue::Text("b".into())];
        let k2 = vec![FieldValue::Int64(1), FieldValue::Text("a".into())];
        // "b" > "a" ascending, but field is declared descending so k1 < k2
        assert_eq!(compare_keys(&schema, &k1, &k2), Ordering::Less);
    }

    #[test]
    fn test_key_encode_roundtrip_with_null() {
        let schema = Schema::new(
            vec![FieldDef::key("a", FieldType::Int64, Direction::Ascending, true)],
            vec![],
        );
        let key = vec![FieldValue::Null];
        let bytes = encode_key(&key).unwrap();
        let decoded = decode_key(&schema, &bytes).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_key_starts_with() {
        let schema = composite_schema();
        let key = vec![FieldValue::Int64(1), FieldValue::Text("x".into())];
        let prefix = vec![FieldValue::Int64(1)];
        assert!(key_starts_with(&schema, &key, &prefix));
        let bad_prefix = vec![FieldValue::Int64(2)];
        assert!(!key_starts_with(&schema, &key, &bad_prefix));
    }

    #[test]
    fn test_value_encode_roundtrip() {
        let schema = composite_schema();
        let value = vec![FieldValue::Int64(99)];
        let bytes = encode_value(&value).unwrap();
        let decoded = decode_value(&schema, &bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
