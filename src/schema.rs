//! Record schema: ordered key/value field definitions (§3.1).

use crate::field::FieldType;
use crate::tokenizer::TokenizerConfig;
use crate::types::Direction;
use serde::{Deserialize, Serialize};

/// Inline key slots (§3.1) can hold at most this many bytes of encoded
/// composite key; wider keys fall back to indirect (key-object) mode.
pub const MAX_INLINE_KEY_BYTES: usize = 12;

/// One field's static definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    /// Sort direction; only meaningful for key fields (§4.1.2).
    pub direction: Direction,
}

impl FieldDef {
    pub fn key(name: impl Into<String>, ty: FieldType, direction: Direction, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
            direction,
        }
    }

    pub fn value(name: impl Into<String>, ty: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
            direction: Direction::Ascending,
        }
    }
}

/// Whether the key table stores the composite key bytes directly in
/// the slot, or indirectly via a key-object OID (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyInfoMode {
    Inline,
    Indirect,
}

/// The full record shape for a file: an ordered list of key fields
/// followed by an ordered list of value fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub key_fields: Vec<FieldDef>,
    pub value_fields: Vec<FieldDef>,
    /// Tokenizer configuration for text-typed key fields (C10). `None`
    /// means text keys compare and scan as raw bytes, with no
    /// normalization, n-gram, or LIKE-prefix support.
    #[serde(default)]
    pub tokenizer: Option<TokenizerConfig>,
}

impl Schema {
    pub fn new(key_fields: Vec<FieldDef>, value_fields: Vec<FieldDef>) -> Self {
        assert!(!key_fields.is_empty(), "a schema must declare at least one key field");
        Self {
            key_fields,
            value_fields,
            tokenizer: None,
        }
    }

    pub fn with_tokenizer(mut self, config: TokenizerConfig) -> Self {
        self.tokenizer = Some(config);
        self
    }

    /// Upper bound on the encoded size of a composite key tuple when
    /// every variable field is at its fixed-size-only worst case; used
    /// only to pick the key-info mode at schema-build time. Variable
    /// fields force indirect mode unless the caller opts into a fixed
    /// budget, since their length is data-dependent.
    pub fn key_info_mode(&self) -> KeyInfoMode {
        let mut total = 0usize;
        for f in &self.key_fields {
            total += 1; // null bitmap bit, rounded below
            match crate::field::codec::fixed_size(f.ty) {
                Some(n) => total += n,
                None => return KeyInfoMode::Indirect,
            }
        }
        let bitmap_bytes = self.key_fields.len().div_ceil(8);
        if bitmap_bytes + total <= MAX_INLINE_KEY_BYTES {
            KeyInfoMode::Inline
        } else {
            KeyInfoMode::Indirect
        }
    }

    pub fn null_bitmap_bytes(fields: usize) -> usize {
        fields.div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    #[test]
    fn test_inline_mode_for_small_int_key() {
        let schema = Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("payload", FieldType::Blob, false)],
        );
        assert_eq!(schema.key_info_mode(), KeyInfoMode::Inline);
    }

    #[test]
    fn test_indirect_mode_for_text_key() {
        let schema = Schema::new(
            vec![FieldDef::key("name", FieldType::Text, Direction::Ascending, false)],
            vec![],
        );
        assert_eq!(schema.key_info_mode(), KeyInfoMode::Indirect);
    }
}
