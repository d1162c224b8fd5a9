//! Field codec (§4.3): encode/decode typed fields to/from area bytes.
//!
//! Fixed types (`Int64`, `Float64`) have a constant archive size.
//! Variable types (`Text`, `Blob`) are written with a 2-byte length
//! prefix when inline; the decision to move a variable value
//! out-of-band instead (§4.4) is made by the caller (`record` module),
//! which knows the configured `outside_threshold`.

use crate::error::{Result, StorageError};
use crate::field::value::{FieldType, FieldValue};
use crate::types::Direction;
use std::cmp::Ordering;

/// Number of bytes a fixed-size field occupies, or `None` for variable types.
pub fn fixed_size(ty: FieldType) -> Option<usize> {
    match ty {
        FieldType::Int64 => Some(8),
        FieldType::Float64 => Some(8),
        FieldType::Text | FieldType::Blob => None,
    }
}

/// Size of `value` once encoded inline (length prefix included for
/// variable types).
pub fn archive_size(value: &FieldValue) -> usize {
    match value {
        FieldValue::Int64(_) => 8,
        FieldValue::Float64(_) => 8,
        FieldValue::Text(s) => 2 + s.len(),
        FieldValue::Blob(b) => 2 + b.len(),
        FieldValue::Null => 0,
    }
}

/// Encode `value` inline into `buf`, returning the number of bytes written.
/// `value` must not be `Null` (nulls are represented purely by the
/// record's null bitmap and occupy zero bytes).
pub fn write(buf: &mut Vec<u8>, value: &FieldValue) -> Result<()> {
    match value {
        FieldValue::Int64(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        FieldValue::Float64(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        FieldValue::Text(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > u16::MAX as usize {
                return Err(StorageError::bad_argument("text field exceeds 65535 bytes inline"));
            }
            buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        FieldValue::Blob(b) => {
            if b.len() > u16::MAX as usize {
                return Err(StorageError::bad_argument("blob field exceeds 65535 bytes inline"));
            }
            buf.extend_from_slice(&(b.len() as u16).to_be_bytes());
            buf.extend_from_slice(b);
        }
        FieldValue::Null => {}
    }
    Ok(())
}

/// Decode a field of declared type `ty` from the head of `bytes`.
/// Returns the value and the number of bytes consumed.
pub fn read(ty: FieldType, bytes: &[u8]) -> Result<(FieldValue, usize)> {
    match ty {
        FieldType::Int64 => {
            if bytes.len() < 8 {
                return Err(StorageError::corruption("truncated int64 field"));
            }
            let v = i64::from_be_bytes(bytes[0..8].try_into().unwrap());
            Ok((FieldValue::Int64(v), 8))
        }
        FieldType::Float64 => {
            if bytes.len() < 8 {
                return Err(StorageError::corruption("truncated float64 field"));
            }
            let v = f64::from_be_bytes(bytes[0..8].try_into().unwrap());
            Ok((FieldValue::Float64(v), 8))
        }
        FieldType::Text => {
            if bytes.len() < 2 {
                return Err(StorageError::corruption("truncated text length"));
            }
            let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
            if bytes.len() < 2 + len {
                return Err(StorageError::corruption("truncated text field"));
            }
            let s = String::from_utf8(bytes[2..2 + len].to_vec())
                .map_err(|_| StorageError::corruption("invalid utf8 in text field"))?;
            Ok((FieldValue::Text(s), 2 + len))
        }
        FieldType::Blob => {
            if bytes.len() < 2 {
                return Err(StorageError::corruption("truncated blob length"));
            }
            let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
            if bytes.len() < 2 + len {
                return Err(StorageError::corruption("truncated blob field"));
            }
            Ok((FieldValue::Blob(bytes[2..2 + len].to_vec()), 2 + len))
        }
    }
}

/// Compare two values of the same field under `direction`.
pub fn compare(a: &FieldValue, b: &FieldValue, direction: Direction) -> Ordering {
    direction.apply(a.compare_base(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int64_roundtrip() {
        let mut buf = Vec::new();
        write(&mut buf, &FieldValue::Int64(-42)).unwrap();
        let (v, n) = read(FieldType::Int64, &buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(v, FieldValue::Int64(-42));
    }

    #[test]
    fn test_text_roundtrip() {
        let mut buf = Vec::new();
        write(&mut buf, &FieldValue::Text("hello".into())).unwrap();
        let (v, n) = read(FieldType::Text, &buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(v, FieldValue::Text("hello".into()));
    }

    #[test]
    fn test_compare_direction() {
        let a = FieldValue::Int64(1);
        let b = FieldValue::Int64(2);
        assert_eq!(compare(&a, &b, Direction::Ascending), Ordering::Less);
        assert_eq!(compare(&a, &b, Direction::Descending), Ordering::Greater);
    }
}
