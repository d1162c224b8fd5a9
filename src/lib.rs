//! # Composite-Key B+Tree Storage Engine
//!
//! A disk-based B+tree storage engine for typed, composite-key records,
//! with out-of-band storage for oversize fields and a tokenizer core
//! for inverted-index feature extraction.
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable layers:
//!
//! - **Page Layer** (`page`): Slotted node pages plus unsorted area pages
//! - **Storage Layer** (`storage`): Disk I/O, file header, free list
//! - **Buffer Pool** (`buffer`): LRU page cache with per-page latching
//! - **B+Tree Layer** (`btree`): Composite-key tree, cursor iteration
//! - **Query Layer** (`query`): Predicate compilation over the cursor
//! - **Tokenizer** (`tokenizer`): Normalizer, word/n-gram passes, feature extraction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bplustree_engine::{Config, Db};
//! use bplustree_engine::schema::{FieldDef, Schema};
//! use bplustree_engine::field::{FieldType, FieldValue};
//! use bplustree_engine::record::Record;
//! use bplustree_engine::types::Direction;
//!
//! let schema = Schema::new(
//!     vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
//!     vec![FieldDef::value("name", FieldType::Text, true)],
//! );
//! let db = Db::open(Config::new("my_database.db", schema))?;
//!
//! db.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Text("hello".into())]))?;
//! let found = db.fetch(&[FieldValue::Int64(1)])?.next()?;
//! db.expunge(&[FieldValue::Int64(1)])?;
//! # Ok::<(), bplustree_engine::StorageError>(())
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod field;
pub mod oob;
pub mod page;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;
pub mod tokenizer;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{BTreeConfig, PageId, PAGE_SIZE};

pub use btree::{BTree, Cursor};
pub use buffer::{BufferPool, BufferPoolImpl};
pub use query::{Bound, Predicate, Query};
pub use storage::{DiskManager, DiskManagerImpl};

use field::FieldValue;
use record::Record;
use schema::Schema;
use log::warn;
use std::path::PathBuf;
use std::sync::Arc;
use types::Direction;

/// Database configuration (§6.2).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file.
    pub path: PathBuf,
    /// The file's record schema. Used only when creating a new file;
    /// an existing file's persisted schema always wins on reopen.
    pub schema: Schema,
    /// Buffer pool size in number of pages (default: 1000).
    pub buffer_pool_size: usize,
    /// Whether to sync writes immediately (default: false for performance).
    pub sync_on_write: bool,
    /// B+tree tuning knobs for node fan-out and rebalancing.
    pub btree_config: BTreeConfig,
    /// Open in read-only mode; mutating operations fail with `IllegalFileAccess`.
    pub read_only: bool,
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new<P: Into<PathBuf>>(path: P, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
            buffer_pool_size: 1000,
            sync_on_write: false,
            btree_config: BTreeConfig::default(),
            read_only: false,
        }
    }

    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    pub fn btree_config(mut self, config: BTreeConfig) -> Self {
        self.btree_config = config;
        self
    }

    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }
}

/// Node type for tree-structure visualization/debugging.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub page_id: u32,
    pub is_leaf: bool,
    pub keys: Vec<String>,
    pub values: Vec<String>,
    pub children: Vec<TreeNode>,
}

/// Main database handle: one open file (§4.1.1's "file handle `F`").
///
/// Every structural operation latches at the page level through the
/// buffer pool (see `buffer::pool::BufferFrame`); `Db` itself holds no
/// outer lock and can be freely shared behind an `Arc`.
pub struct Db {
    tree: Arc<BTree>,
    buffer_pool: Arc<BufferPoolImpl>,
    #[allow(dead_code)]
    disk_manager: Arc<DiskManagerImpl>,
    read_only: bool,
}

impl Db {
    /// Open or create a database file at the configured path.
    pub fn open(config: Config) -> Result<Self> {
        let disk_manager = Arc::new(DiskManagerImpl::open_with_schema(
            &config.path,
            config.sync_on_write,
            Some(config.schema.clone()),
        )?);
        let buffer_pool = Arc::new(BufferPoolImpl::new(disk_manager.clone(), config.buffer_pool_size));
        let schema = disk_manager.header().schema.unwrap_or(config.schema);
        let tree = Arc::new(BTree::with_config(buffer_pool.clone(), schema, config.btree_config.clone())?);

        Ok(Self {
            tree,
            buffer_pool,
            disk_manager,
            read_only: config.read_only,
        })
    }

    pub fn schema(&self) -> &Schema {
        self.tree.schema()
    }

    pub fn btree_config(&self) -> &BTreeConfig {
        self.tree.config()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StorageError::IllegalFileAccess("file opened read-only".into()));
        }
        Ok(())
    }

    /// Insert a new record (§4.1.1 `insert`).
    pub fn insert(&self, record: Record) -> Result<()> {
        self.check_writable()?;
        self.tree.insert(record)
    }

    /// Remove the record with this exact composite key (§4.1.1 `expunge`, shape 7).
    pub fn expunge(&self, key: &[FieldValue]) -> Result<()> {
        self.check_writable()?;
        if self.tree.delete(key)? {
            Ok(())
        } else {
            warn!("expunge: no record matched the given key");
            Err(StorageError::EntryNotFound)
        }
    }

    /// Replace the value fields of the record with this exact key (§4.1.1 `update`, §4.1.7).
    pub fn update(&self, key: &[FieldValue], new_value: Vec<FieldValue>) -> Result<()> {
        self.check_writable()?;
        if self.tree.update(key, new_value)? {
            Ok(())
        } else {
            warn!("update: no record matched the given key");
            Err(StorageError::EntryNotFound)
        }
    }

    /// Look up the record with this exact composite key, without opening an iterator.
    pub fn get(&self, key: &[FieldValue]) -> Result<Option<Record>> {
        self.tree.fetch(key)
    }

    /// Open an iterator over every record whose key starts with `key_prefix`
    /// (§4.1.1 `fetch`).
    pub fn fetch(&self, key_prefix: &[FieldValue]) -> Result<Query> {
        Query::compile(&self.tree, &Predicate::Prefix(key_prefix.to_vec()), Direction::Ascending)
    }

    /// Compile and open a structured predicate scan (§4.1.1 `search`, §4.1.3).
    pub fn search(&self, predicate: &Predicate, direction: Direction) -> Result<Query> {
        Query::compile(&self.tree, predicate, direction)
    }

    /// Count matches for a predicate without materializing them beyond
    /// what residual filtering requires (§4.1.1 `count`).
    pub fn count(&self, predicate: &Predicate) -> Result<u64> {
        Query::compile(&self.tree, predicate, Direction::Ascending)?.count()
    }

    /// Flush all dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Get statistics about the database.
    pub fn stats(&self) -> DbStats {
        let header = self.disk_manager.header();
        DbStats {
            page_count: self.buffer_pool.page_count(),
            free_page_count: header.free_page_count as usize,
            buffer_pool_size: self.buffer_pool.capacity(),
            tree_depth: self.tree.depth(),
            record_count: self.tree.len(),
        }
    }

    /// Export the tree structure for visualization.
    pub fn export_tree(&self) -> Result<Option<TreeNode>> {
        let root_page = self.tree.root_page();
        if root_page.value() == 0 {
            return Ok(None);
        }
        self.export_node(root_page)
    }

    fn export_node(&self, page_id: PageId) -> Result<Option<TreeNode>> {
        let is_leaf = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page_ref = guard.read();
            page_ref.as_node()?.is_leaf()
        };

        if is_leaf {
            self.export_leaf_node(page_id)
        } else {
            self.export_interior_node(page_id)
        }
    }

    fn export_leaf_node(&self, page_id: PageId) -> Result<Option<TreeNode>> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        let page_ref = guard.read();
        let page = page_ref.as_node()?;

        let mut keys = Vec::new();
        let mut values = Vec::new();
        for slot in page.get_all_slots()? {
            let key = self.tree.decode_slot_key(&slot)?;
            let oid = slot.link.as_value().expect("leaf slot links to a value object");
            let value = self.tree.load_value(oid)?;
            keys.push(format_tuple(&key));
            values.push(format_tuple(&value));
        }

        Ok(Some(TreeNode {
            page_id: page_id.value(),
            is_leaf: true,
            keys,
            values,
            children: Vec::new(),
        }))
    }

    fn export_interior_node(&self, page_id: PageId) -> Result<Option<TreeNode>> {
        let (keys, mut child_ids) = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page_ref = guard.read();
            let page = page_ref.as_node()?;

            let mut child_ids = Vec::new();
            if let Some(leftmost) = page.leftmost_child() {
                child_ids.push(leftmost);
            }
            let mut keys = Vec::new();
            for slot in page.get_all_slots()? {
                keys.push(format_tuple(&self.tree.decode_slot_key(&slot)?));
                if let Some(child) = slot.link.as_child() {
                    child_ids.push(child);
                }
            }
            (keys, child_ids)
        };

        let mut children = Vec::new();
        for child_id in child_ids.drain(..) {
            if let Some(child_node) = self.export_node(child_id)? {
                children.push(child_node);
            }
        }

        Ok(Some(TreeNode {
            page_id: page_id.value(),
            is_leaf: false,
            keys,
            values: Vec::new(),
            children,
        }))
    }
}

fn format_tuple(values: &[FieldValue]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| match v {
            FieldValue::Int64(n) => n.to_string(),
            FieldValue::Float64(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Blob(b) => format!("<{} bytes>", b.len()),
            FieldValue::Null => "NULL".to_string(),
        })
        .collect();
    parts.join(", ")
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub page_count: usize,
    /// Pages returned to the free list by deletes, available for reuse
    /// before the file grows further (§8.3 scenario 4's "allocated-page
    /// count returning to baseline").
    pub free_page_count: usize,
    pub buffer_pool_size: usize,
    pub tree_depth: u32,
    pub record_count: u64,
}

impl DbStats {
    /// Pages actually in use: total pages minus the free list.
    pub fn pages_in_use(&self) -> usize {
        self.page_count - self.free_page_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field::FieldType;
    use schema::FieldDef;
    use tempfile::tempdir;

    fn int_schema() -> Schema {
        Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("name", FieldType::Text, true)],
        )
    }

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path, int_schema()))?;

        db.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Text("hello".into())]))?;
        assert_eq!(
            db.get(&[FieldValue::Int64(1)])?.unwrap().value,
            vec![FieldValue::Text("hello".into())]
        );

        db.update(&[FieldValue::Int64(1)], vec![FieldValue::Text("world".into())])?;
        assert_eq!(
            db.get(&[FieldValue::Int64(1)])?.unwrap().value,
            vec![FieldValue::Text("world".into())]
        );

        db.expunge(&[FieldValue::Int64(1)])?;
        assert!(db.get(&[FieldValue::Int64(1)])?.is_none());
        assert!(matches!(db.expunge(&[FieldValue::Int64(1)]), Err(StorageError::EntryNotFound)));

        Ok(())
    }

    #[test]
    fn test_read_only_rejects_mutation() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let db = Db::open(Config::new(&path, int_schema()))?;
            db.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Null]))?;
            db.flush()?;
        }
        let db = Db::open(Config::new(&path, int_schema()).read_only(true))?;
        assert!(matches!(
            db.insert(Record::new(vec![FieldValue::Int64(2)], vec![FieldValue::Null])),
            Err(StorageError::IllegalFileAccess(_))
        ));
        Ok(())
    }

    #[test]
    fn test_fetch_iterates_sorted_order() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path, int_schema()))?;

        for (id, name) in [(3, "cherry"), (1, "apple"), (2, "banana")] {
            db.insert(Record::new(vec![FieldValue::Int64(id)], vec![FieldValue::Text(name.into())]))?;
        }

        let mut query = db.fetch(&[])?;
        let mut names = Vec::new();
        while let Some(rec) = query.next()? {
            if let FieldValue::Text(s) = &rec.value[0] {
                names.push(s.clone());
            }
        }
        assert_eq!(names, vec!["apple", "banana", "cherry"]);
        Ok(())
    }

    #[test]
    fn test_count_over_range_predicate() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path, int_schema()))?;
        for id in 0..10i64 {
            db.insert(Record::new(vec![FieldValue::Int64(id)], vec![FieldValue::Null]))?;
        }
        let predicate = Predicate::Range {
            prefix: vec![],
            lower: Some(Bound::Inclusive(FieldValue::Int64(2))),
            upper: Some(Bound::Exclusive(FieldValue::Int64(7))),
        };
        assert_eq!(db.count(&predicate)?, 5);
        Ok(())
    }

    #[test]
    fn test_reopen_recovers_persisted_schema_and_data() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let db = Db::open(Config::new(&path, int_schema()))?;
            db.insert(Record::new(vec![FieldValue::Int64(42)], vec![FieldValue::Text("persisted".into())]))?;
            db.flush()?;
        }
        let db = Db::open(Config::new(&path, int_schema()))?;
        assert_eq!(
            db.get(&[FieldValue::Int64(42)])?.unwrap().value,
            vec![FieldValue::Text("persisted".into())]
        );
        Ok(())
    }

    /// §8.3 scenario 2: bulk random insert, delete every third, check
    /// the record count and sorted iteration order hold throughout.
    #[test]
    fn test_bulk_random_insert_and_delete_preserves_invariants() -> Result<()> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        const N: i64 = 10_000;
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path, int_schema()))?;

        let mut ids: Vec<i64> = (0..N).collect();
        ids.shuffle(&mut thread_rng());
        for id in &ids {
            db.insert(Record::new(vec![FieldValue::Int64(*id)], vec![FieldValue::Text(id.to_string())]))?;
        }
        assert_eq!(db.stats().record_count, N as u64);

        for (i, id) in ids.iter().enumerate() {
            if i % 3 == 0 {
                db.expunge(&[FieldValue::Int64(*id)])?;
            }
        }
        let expected_count = N as u64 - (N as u64).div_ceil(3);
        assert_eq!(db.stats().record_count, expected_count);

        // Ascending iteration must still be fully sorted with no gaps
        // other than the deleted keys, and the surviving set must match.
        let deleted: std::collections::HashSet<i64> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 == 0)
            .map(|(_, id)| *id)
            .collect();
        let mut seen = Vec::new();
        let mut query = db.fetch(&[])?;
        while let Some(rec) = query.next()? {
            let FieldValue::Int64(k) = rec.key[0] else { unreachable!() };
            seen.push(k);
        }
        assert_eq!(seen.len() as u64, expected_count);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "iteration must be strictly sorted");
        assert!(seen.iter().all(|k| !deleted.contains(k)));
        Ok(())
    }

    /// §8.3 scenario 4: an oversize value (well past the out-of-band
    /// threshold) round-trips exactly, and deleting it frees every
    /// chained out-of-band page back to the pre-insert page count.
    #[test]
    fn test_oversize_value_roundtrips_and_frees_pages_on_delete() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let schema = Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("payload", FieldType::Blob, false)],
        );
        let config = Config::new(&path, schema).btree_config(BTreeConfig {
            outside_threshold: 64,
            ..BTreeConfig::default()
        });
        let db = Db::open(config)?;

        let baseline = db.stats().pages_in_use();
        let big = vec![0xABu8; PAGE_SIZE * 3];
        db.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Blob(big.clone())]))?;
        assert_eq!(db.get(&[FieldValue::Int64(1)])?.unwrap().value, vec![FieldValue::Blob(big)]);
        assert!(db.stats().pages_in_use() > baseline, "oversize value must have chained extra pages");

        db.expunge(&[FieldValue::Int64(1)])?;
        assert_eq!(db.stats().pages_in_use(), baseline, "deleting the record must free every chained page");
        Ok(())
    }

    #[test]
    fn test_export_tree_reflects_inserted_keys() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path, int_schema()))?;
        db.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Text("a".into())]))?;
        let tree = db.export_tree()?.expect("non-empty tree has a root");
        assert!(tree.is_leaf);
        assert_eq!(tree.keys, vec!["1".to_string()]);
        Ok(())
    }
}
