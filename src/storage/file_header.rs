//! Database file header (§6.1).
//!
//! Page 0 carries file-wide metadata: identification, the B+tree root
//! and depth, the ends of the leaf chain (for full forward/backward
//! scans without a root descent), a running record count, and the
//! serialized `Schema` the file was created with.

use crate::error::{Result, StorageError};
use crate::schema::{FieldDef, Schema};
use crate::tokenizer::TokenizerConfig;
use crate::types::{PageId, PAGE_SIZE};
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 16] = b"BPlusTreeEngine\0";
pub const FORMAT_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = PAGE_SIZE;

/// Fixed-size prefix of the header page; the schema JSON blob and the
/// tokenizer descriptor blob follow, in that order (§6.1).
const FIXED_SIZE: usize = 16 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 8 + 4;
/// Width of the `tokenizer_descriptor_length` field that follows the
/// schema blob.
const TOKENIZER_LEN_SIZE: usize = 2;

/// The schema blob's own wire shape (§6.1 `schema_length` + blob):
/// field definitions only. The tokenizer descriptor is persisted as a
/// separate, independently-sized blob so a file can be inspected or
/// rewritten without touching it.
#[derive(Serialize, Deserialize)]
struct SchemaWire {
    key_fields: Vec<FieldDef>,
    value_fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub format_version: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub first_free_page: PageId,
    pub free_page_count: u32,
    pub root_page: PageId,
    pub tree_depth: u32,
    pub first_leaf_page: PageId,
    pub last_leaf_page: PageId,
    pub record_count: u64,
    pub schema: Option<Schema>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE as u32,
            page_count: 1,
            first_free_page: PageId::new(0),
            free_page_count: 0,
            root_page: PageId::new(0),
            tree_depth: 0,
            first_leaf_page: PageId::new(0),
            last_leaf_page: PageId::new(0),
            record_count: 0,
            schema: None,
        }
    }

    pub fn with_schema(schema: Schema) -> Self {
        Self {
            schema: Some(schema),
            ..Self::new()
        }
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_SIZE {
            return Err(StorageError::invalid_db("header too short"));
        }
        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let format_version = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
        let page_size = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        let page_count = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
        let first_free_page = u32::from_be_bytes(bytes[28..32].try_into().unwrap());
        let free_page_count = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        let root_page = u32::from_be_bytes(bytes[36..40].try_into().unwrap());
        let tree_depth = u32::from_be_bytes(bytes[40..44].try_into().unwrap());
        let first_leaf_page = u32::from_be_bytes(bytes[44..48].try_into().unwrap());
        let last_leaf_page = u32::from_be_bytes(bytes[48..52].try_into().unwrap());
        let record_count = u64::from_be_bytes(bytes[52..60].try_into().unwrap());
        let schema_len = u32::from_be_bytes(bytes[60..64].try_into().unwrap()) as usize;

        let tokenizer_len_offset = FIXED_SIZE + schema_len;
        if bytes.len() < tokenizer_len_offset + TOKENIZER_LEN_SIZE {
            return Err(StorageError::corruption("truncated header"));
        }
        let tokenizer_len = u16::from_be_bytes(
            bytes[tokenizer_len_offset..tokenizer_len_offset + TOKENIZER_LEN_SIZE]
                .try_into()
                .unwrap(),
        ) as usize;
        let tokenizer_blob_offset = tokenizer_len_offset + TOKENIZER_LEN_SIZE;

        let stored_checksum_offset = tokenizer_blob_offset + tokenizer_len;
        if bytes.len() < stored_checksum_offset + 4 {
            return Err(StorageError::corruption("truncated header"));
        }
        let stored_checksum = u32::from_be_bytes(
            bytes[stored_checksum_offset..stored_checksum_offset + 4]
                .try_into()
                .unwrap(),
        );
        let computed_checksum = crc32fast::hash(&bytes[0..stored_checksum_offset]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::invalid_db(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }

        let schema_wire: Option<SchemaWire> = if schema_len == 0 {
            None
        } else {
            let blob = &bytes[FIXED_SIZE..FIXED_SIZE + schema_len];
            Some(
                serde_json::from_slice(blob)
                    .map_err(|e| StorageError::corruption(format!("bad schema blob: {e}")))?,
            )
        };

        let tokenizer: Option<TokenizerConfig> = if tokenizer_len == 0 {
            None
        } else {
            let blob = &bytes[tokenizer_blob_offset..tokenizer_blob_offset + tokenizer_len];
            Some(
                serde_json::from_slice(blob)
                    .map_err(|e| StorageError::corruption(format!("bad tokenizer descriptor blob: {e}")))?,
            )
        };

        let schema = schema_wire.map(|w| {
            let mut s = Schema::new(w.key_fields, w.value_fields);
            s.tokenizer = tokenizer;
            s
        });

        Ok(Self {
            format_version,
            page_size,
            page_count,
            first_free_page: PageId::new(first_free_page),
            free_page_count,
            root_page: PageId::new(root_page),
            tree_depth,
            first_leaf_page: PageId::new(first_leaf_page),
            last_leaf_page: PageId::new(last_leaf_page),
            record_count,
            schema,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..FILE_HEADER_SIZE].fill(0);

        let schema_blob = self
            .schema
            .as_ref()
            .map(|s| {
                serde_json::to_vec(&SchemaWire {
                    key_fields: s.key_fields.clone(),
                    value_fields: s.value_fields.clone(),
                })
                .expect("schema serializes")
            })
            .unwrap_or_default();
        let tokenizer_blob = self
            .schema
            .as_ref()
            .and_then(|s| s.tokenizer.as_ref())
            .map(|t| serde_json::to_vec(t).expect("tokenizer descriptor serializes"))
            .unwrap_or_default();
        assert!(
            tokenizer_blob.len() <= u16::MAX as usize,
            "tokenizer descriptor blob exceeds 2-byte length field"
        );

        bytes[0..16].copy_from_slice(MAGIC);
        bytes[16..20].copy_from_slice(&self.format_version.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.page_count.to_be_bytes());
        bytes[28..32].copy_from_slice(&self.first_free_page.value().to_be_bytes());
        bytes[32..36].copy_from_slice(&self.free_page_count.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.root_page.value().to_be_bytes());
        bytes[40..44].copy_from_slice(&self.tree_depth.to_be_bytes());
        bytes[44..48].copy_from_slice(&self.first_leaf_page.value().to_be_bytes());
        bytes[48..52].copy_from_slice(&self.last_leaf_page.value().to_be_bytes());
        bytes[52..60].copy_from_slice(&self.record_count.to_be_bytes());
        bytes[60..64].copy_from_slice(&(schema_blob.len() as u32).to_be_bytes());
        bytes[FIXED_SIZE..FIXED_SIZE + schema_blob.len()].copy_from_slice(&schema_blob);

        let tokenizer_len_offset = FIXED_SIZE + schema_blob.len();
        bytes[tokenizer_len_offset..tokenizer_len_offset + TOKENIZER_LEN_SIZE]
            .copy_from_slice(&(tokenizer_blob.len() as u16).to_be_bytes());
        let tokenizer_blob_offset = tokenizer_len_offset + TOKENIZER_LEN_SIZE;
        bytes[tokenizer_blob_offset..tokenizer_blob_offset + tokenizer_blob.len()].copy_from_slice(&tokenizer_blob);

        let checksum_offset = tokenizer_blob_offset + tokenizer_blob.len();
        let checksum = crc32fast::hash(&bytes[0..checksum_offset]);
        bytes[checksum_offset..checksum_offset + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn allocate_page(&mut self) -> PageId {
        let page_id = PageId::new(self.page_count);
        self.page_count += 1;
        page_id
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::schema::FieldDef;
    use crate::types::Direction;

    #[test]
    fn test_header_roundtrip_without_schema() {
        let mut header = FileHeader::new();
        header.page_count = 100;
        header.root_page = PageId::new(1);
        header.tree_depth = 3;
        header.record_count = 42;

        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        assert_eq!(restored.page_count, 100);
        assert_eq!(restored.root_page, PageId::new(1));
        assert_eq!(restored.tree_depth, 3);
        assert_eq!(restored.record_count, 42);
        assert!(restored.schema.is_none());
    }

    #[test]
    fn test_header_roundtrip_with_schema() {
        let schema = Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("name", FieldType::Text, true)],
        );
        let header = FileHeader::with_schema(schema);
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        let restored_schema = restored.schema.unwrap();
        assert_eq!(restored_schema.key_fields.len(), 1);
        assert_eq!(restored_schema.value_fields.len(), 1);
    }

    #[test]
    fn test_header_roundtrip_with_tokenizer() {
        let schema = Schema::new(
            vec![FieldDef::key("name", FieldType::Text, Direction::Ascending, false)],
            vec![],
        )
        .with_tokenizer(crate::tokenizer::TokenizerConfig::default());
        let header = FileHeader::with_schema(schema);
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        let restored_schema = restored.schema.unwrap();
        assert!(restored_schema.tokenizer.is_some());
        assert_eq!(restored_schema.tokenizer.unwrap().ngram_width, 2);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        bytes[0..16].copy_from_slice(b"InvalidMagic0000");
        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_checksum_validation() {
        let header = FileHeader::new();
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);
        bytes[20] ^= 0xFF;
        assert!(FileHeader::read(&bytes).is_err());
    }
}
