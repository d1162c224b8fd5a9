//! Key-information slots (§3.1, C7).
//!
//! A node page holds one `KeyInfoSlot` per entry: the key, in either of
//! the two physical layouts the format supports, and a link that is a
//! child pointer on interior pages or a value-object locator on leaves.
//! Byte-order of the encoded key is *not* guaranteed to match key
//! order once per-field `Direction` or signed/variable fields are in
//! play, so this module never compares keys — callers (the engine
//! layer) decode via `record::decode_key` and use `record::compare_keys`.

use crate::types::{decode_varint, encode_varint, ObjectId, PageId};

/// Where the encoded key bytes live.
#[derive(Debug, Clone)]
pub enum KeyRepr {
    /// Key bytes stored directly in the slot (schema's inline mode).
    Inline(Vec<u8>),
    /// Key bytes stored in a key object elsewhere; the slot only holds
    /// the locator (schema's indirect mode, for wide/variable keys).
    Indirect(ObjectId),
}

/// What a key-information slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLink {
    /// Interior slot: child page holding keys described by this entry.
    Child(PageId),
    /// Leaf slot: value-object locator for this key's record.
    Value(ObjectId),
}

impl SlotLink {
    pub fn as_child(self) -> Option<PageId> {
        match self {
            SlotLink::Child(p) => Some(p),
            SlotLink::Value(_) => None,
        }
    }

    pub fn as_value(self) -> Option<ObjectId> {
        match self {
            SlotLink::Value(oid) => Some(oid),
            SlotLink::Child(_) => None,
        }
    }
}

/// One entry of a node page's key table.
#[derive(Debug, Clone)]
pub struct KeyInfoSlot {
    pub key: KeyRepr,
    pub link: SlotLink,
}

impl KeyInfoSlot {
    pub fn new_leaf_inline(key: Vec<u8>, value: ObjectId) -> Self {
        Self {
            key: KeyRepr::Inline(key),
            link: SlotLink::Value(value),
        }
    }

    pub fn new_leaf_indirect(key_object: ObjectId, value: ObjectId) -> Self {
        Self {
            key: KeyRepr::Indirect(key_object),
            link: SlotLink::Value(value),
        }
    }

    pub fn new_interior_inline(key: Vec<u8>, child: PageId) -> Self {
        Self {
            key: KeyRepr::Inline(key),
            link: SlotLink::Child(child),
        }
    }

    pub fn new_interior_indirect(key_object: ObjectId, child: PageId) -> Self {
        Self {
            key: KeyRepr::Indirect(key_object),
            link: SlotLink::Child(child),
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.key, KeyRepr::Indirect(_))
    }

    pub fn inline_key(&self) -> Option<&[u8]> {
        match &self.key {
            KeyRepr::Inline(bytes) => Some(bytes),
            KeyRepr::Indirect(_) => None,
        }
    }

    pub fn key_object(&self) -> Option<ObjectId> {
        match &self.key {
            KeyRepr::Indirect(oid) => Some(*oid),
            KeyRepr::Inline(_) => None,
        }
    }

    /// Encoded size of this slot, as it would be written to a page.
    pub fn encoded_size(&self) -> usize {
        let key_part = match &self.key {
            KeyRepr::Inline(bytes) => 1 + varint_len(bytes.len() as u64) + bytes.len(),
            KeyRepr::Indirect(_) => 1 + 8,
        };
        let link_part = 8;
        key_part + link_part
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        match &self.key {
            KeyRepr::Inline(bytes) => {
                buf.push(0);
                buf.extend(encode_varint(bytes.len() as u64));
                buf.extend_from_slice(bytes);
            }
            KeyRepr::Indirect(oid) => {
                buf.push(1);
                buf.extend_from_slice(&oid.to_bytes());
            }
        }
        match self.link {
            SlotLink::Child(page_id) => {
                buf.extend_from_slice(&page_id.value().to_be_bytes());
                buf.extend_from_slice(&[0u8; 4]);
            }
            SlotLink::Value(oid) => {
                buf.extend_from_slice(&oid.to_bytes());
            }
        }
        buf
    }

    /// Decode a slot; `is_leaf` selects whether the link word is a
    /// value `ObjectId` or a child `PageId`.
    pub fn decode(bytes: &[u8], is_leaf: bool) -> Option<(Self, usize)> {
        let mode = *bytes.first()?;
        let mut offset = 1;
        let key = match mode {
            0 => {
                let (len, n) = decode_varint(&bytes[offset..])?;
                offset += n;
                let len = len as usize;
                if offset + len > bytes.len() {
                    return None;
                }
                let k = bytes[offset..offset + len].to_vec();
                offset += len;
                KeyRepr::Inline(k)
            }
            1 => {
                if offset + 8 > bytes.len() {
                    return None;
                }
                let oid = ObjectId::from_bytes(&bytes[offset..offset + 8]);
                offset += 8;
                KeyRepr::Indirect(oid)
            }
            _ => return None,
        };
        if offset + 8 > bytes.len() {
            return None;
        }
        let link_bytes = &bytes[offset..offset + 8];
        let link = if is_leaf {
            SlotLink::Value(ObjectId::from_bytes(link_bytes))
        } else {
            let page_id = u32::from_be_bytes([link_bytes[0], link_bytes[1], link_bytes[2], link_bytes[3]]);
            SlotLink::Child(PageId::new(page_id))
        };
        offset += 8;
        Some((Self { key, link }, offset))
    }
}

fn varint_len(value: u64) -> usize {
    encode_varint(value).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_leaf_slot_roundtrip() {
        let slot = KeyInfoSlot::new_leaf_inline(b"hello".to_vec(), ObjectId::new(PageId::new(3), 1));
        let encoded = slot.encode();
        let (decoded, n) = KeyInfoSlot::decode(&encoded, true).unwrap();
        assert_eq!(n, encoded.len());
        assert_eq!(decoded.inline_key(), Some(b"hello".as_slice()));
        assert_eq!(decoded.link.as_value(), Some(ObjectId::new(PageId::new(3), 1)));
    }

    #[test]
    fn test_indirect_interior_slot_roundtrip() {
        let key_obj = ObjectId::new(PageId::new(9), 2);
        let slot = KeyInfoSlot::new_interior_indirect(key_obj, PageId::new(42));
        let encoded = slot.encode();
        let (decoded, n) = KeyInfoSlot::decode(&encoded, false).unwrap();
        assert_eq!(n, encoded.len());
        assert!(decoded.is_indirect());
        assert_eq!(decoded.key_object(), Some(key_obj));
        assert_eq!(decoded.link.as_child(), Some(PageId::new(42)));
    }
}
