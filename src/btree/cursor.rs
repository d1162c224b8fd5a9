//! Stateful leaf-chain cursor (§4.1.8, C11).
//!
//! Tracks `(leaf_page_id, slot_index)` and walks the doubly-linked leaf
//! chain one page at a time, re-pinning on every advance. It carries
//! no predicate of its own — the query façade layers residual
//! filtering and predicate-driven termination on top of `next`/`prev`.

use crate::btree::tree::{compare_keys, BTree};
use crate::buffer::BufferPool;
use crate::error::Result;
use crate::field::FieldValue;
use crate::record::Record;
use crate::types::PageId;
use std::cmp::Ordering;
use std::sync::Arc;

/// A positioned slot: the leaf it lives on and its index within that
/// leaf's key table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    leaf: PageId,
    slot: usize,
}

/// Bidirectional cursor over a tree's leaf level. `next`/`prev` are
/// always available regardless of how the cursor was seeked; the
/// façade picks which one to drive based on the requested scan
/// direction (§8.2's reverse-iteration law depends on this symmetry).
pub struct Cursor {
    tree: Arc<BTree>,
    pos: Option<Position>,
    exhausted: bool,
}

impl Cursor {
    /// Position before the first record (tree order). Call `next()` to
    /// obtain the first record.
    pub fn seek_first(tree: Arc<BTree>) -> Result<Self> {
        let (first, _) = tree.pool().leaf_range();
        if first.value() == 0 || tree.is_empty() {
            return Ok(Self {
                tree,
                pos: None,
                exhausted: true,
            });
        }
        Ok(Self {
            tree,
            pos: Some(Position { leaf: first, slot: 0 }),
            exhausted: false,
        }
        .stepped_back_one())
    }

    /// Position after the last record. Call `prev()` to obtain the
    /// last record.
    pub fn seek_last(tree: Arc<BTree>) -> Result<Self> {
        let (_, last) = tree.pool().leaf_range();
        if last.value() == 0 || tree.is_empty() {
            return Ok(Self {
                tree,
                pos: None,
                exhausted: true,
            });
        }
        let slot_count = Self::slot_count_of(&tree, last)?;
        Ok(Self {
            tree,
            pos: Some(Position {
                leaf: last,
                slot: slot_count,
            }),
            exhausted: false,
        })
    }

    /// Position just before the first slot whose key is `>= boundary`
    /// (the forward locate of §4.1.4). `next()` yields that slot.
    pub fn seek_lower_bound(tree: Arc<BTree>, boundary: &[FieldValue]) -> Result<Self> {
        if tree.is_empty() {
            return Ok(Self {
                tree,
                pos: None,
                exhausted: true,
            });
        }
        let leaf = tree.find_leaf_leftmost(boundary)?;
        let found = Self::scan_leaf_forward(&tree, leaf, boundary)?;
        match found {
            Some(slot) => Ok(Self {
                tree,
                pos: Some(Position { leaf, slot }),
                exhausted: false,
            }
            .stepped_back_one()),
            None => {
                // Every slot on this leaf is < boundary; the bound (if
                // any) begins on a later leaf.
                let next_leaf = Self::next_leaf_of(&tree, leaf)?;
                match next_leaf {
                    Some(next) => Ok(Self {
                        tree,
                        pos: Some(Position { leaf: next, slot: 0 }),
                        exhausted: false,
                    }
                    .stepped_back_one()),
                    None => Ok(Self {
                        tree,
                        pos: None,
                        exhausted: true,
                    }),
                }
            }
        }
    }

    /// Position just after the last slot whose key is `<= boundary`
    /// (the reverse locate of §4.1.4). `prev()` yields that slot.
    pub fn seek_upper_bound(tree: Arc<BTree>, boundary: &[FieldValue]) -> Result<Self> {
        if tree.is_empty() {
            return Ok(Self {
                tree,
                pos: None,
                exhausted: true,
            });
        }
        let leaf = tree.find_leaf(boundary)?;
        let found = Self::scan_leaf_backward(&tree, leaf, boundary)?;
        match found {
            Some(slot) => Ok(Self {
                tree,
                pos: Some(Position { leaf, slot: slot + 1 }),
                exhausted: false,
            }),
            None => {
                let prev_leaf = Self::prev_leaf_of(&tree, leaf)?;
                match prev_leaf {
                    Some(prev) => {
                        let count = Self::slot_count_of(&tree, prev)?;
                        Ok(Self {
                            tree,
                            pos: Some(Position { leaf: prev, slot: count }),
                            exhausted: false,
                        })
                    }
                    None => Ok(Self {
                        tree,
                        pos: None,
                        exhausted: true,
                    }),
                }
            }
        }
    }

    /// A `seek_lower_bound` cursor is positioned one slot past what we
    /// want `next()` to return; shift it back by one so the existing
    /// "slot+1" advance semantics of `next()` work uniformly.
    fn stepped_back_one(mut self) -> Self {
        if let Some(pos) = &mut self.pos {
            if pos.slot == 0 {
                // Can't represent "before slot 0" on this leaf; fall
                // back to "before slot 0 on a synthetic empty cursor"
                // by tagging via a sentinel slot that `next` treats as
                // the pre-first position.
                pos.slot = usize::MAX;
            } else {
                pos.slot -= 1;
            }
        }
        self
    }

    fn scan_leaf_forward(tree: &Arc<BTree>, leaf: PageId, boundary: &[FieldValue]) -> Result<Option<usize>> {
        let guard = tree.pool().fetch_page(leaf)?;
        let page = guard.read();
        let node = page.as_node()?;
        for i in 0..node.slot_count() {
            let slot = node.get_slot(i)?;
            let key = tree.decode_slot_key(&slot)?;
            if compare_keys(tree.schema(), &key, boundary) != Ordering::Less {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn scan_leaf_backward(tree: &Arc<BTree>, leaf: PageId, boundary: &[FieldValue]) -> Result<Option<usize>> {
        let guard = tree.pool().fetch_page(leaf)?;
        let page = guard.read();
        let node = page.as_node()?;
        for i in (0..node.slot_count()).rev() {
            let slot = node.get_slot(i)?;
            let key = tree.decode_slot_key(&slot)?;
            if compare_keys(tree.schema(), &key, boundary) != Ordering::Greater {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn slot_count_of(tree: &Arc<BTree>, leaf: PageId) -> Result<usize> {
        let guard = tree.pool().fetch_page(leaf)?;
        let count = guard.read().as_node()?.slot_count();
        Ok(count)
    }

    fn next_leaf_of(tree: &Arc<BTree>, leaf: PageId) -> Result<Option<PageId>> {
        let guard = tree.pool().fetch_page(leaf)?;
        let next = guard.read().as_node()?.next_leaf();
        Ok(next)
    }

    fn prev_leaf_of(tree: &Arc<BTree>, leaf: PageId) -> Result<Option<PageId>> {
        let guard = tree.pool().fetch_page(leaf)?;
        let prev = guard.read().as_node()?.prev_leaf();
        Ok(prev)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read the record at the current position without moving.
    pub fn current(&self) -> Result<Option<Record>> {
        let Some(pos) = self.pos else { return Ok(None) };
        if pos.slot == usize::MAX {
            return Ok(None);
        }
        let guard = self.tree.pool().fetch_page(pos.leaf)?;
        let page = guard.read();
        let node = page.as_node()?;
        if pos.slot >= node.slot_count() {
            return Ok(None);
        }
        let slot = node.get_slot(pos.slot)?;
        let key = self.tree.decode_slot_key(&slot)?;
        let value = self.tree.load_value(slot.link.as_value().unwrap())?;
        Ok(Some(Record::new(key, value)))
    }

    /// Advance one slot forward (§4.1.8 step 1-2, ascending). Returns
    /// the new current record, or `None` once exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Record>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(mut pos) = self.pos else {
            self.exhausted = true;
            return Ok(None);
        };
        pos.slot = if pos.slot == usize::MAX { 0 } else { pos.slot + 1 };

        loop {
            let count = Self::slot_count_of(&self.tree, pos.leaf)?;
            if pos.slot < count {
                self.pos = Some(pos);
                return self.current();
            }
            match Self::next_leaf_of(&self.tree, pos.leaf)? {
                Some(next) => {
                    pos = Position { leaf: next, slot: 0 };
                }
                None => {
                    self.pos = None;
                    self.exhausted = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Advance one slot backward (descending). Returns the new current
    /// record, or `None` once exhausted.
    pub fn prev(&mut self) -> Result<Option<Record>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(mut pos) = self.pos else {
            self.exhausted = true;
            return Ok(None);
        };

        loop {
            if pos.slot == 0 {
                match Self::prev_leaf_of(&self.tree, pos.leaf)? {
                    Some(prev) => {
                        let count = Self::slot_count_of(&self.tree, prev)?;
                        if count == 0 {
                            pos = Position { leaf: prev, slot: 0 };
                            continue;
                        }
                        pos = Position {
                            leaf: prev,
                            slot: count - 1,
                        };
                        self.pos = Some(pos);
                        return self.current();
                    }
                    None => {
                        self.pos = None;
                        self.exhausted = true;
                        return Ok(None);
                    }
                }
            } else {
                pos.slot -= 1;
                self.pos = Some(pos);
                return self.current();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::field::FieldType;
    use crate::schema::{FieldDef, Schema};
    use crate::storage::DiskManagerImpl;
    use crate::types::{BTreeConfig, Direction};
    use tempfile::tempdir;

    fn int_schema() -> Schema {
        Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("payload", FieldType::Blob, false)],
        )
    }

    fn open_tree(config: BTreeConfig) -> (Arc<BTree>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let schema = int_schema();
        let dm = Arc::new(DiskManagerImpl::open_with_schema(&dir.path().join("t.db"), false, Some(schema.clone())).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(dm, 64));
        (Arc::new(BTree::with_config(pool, schema, config).unwrap()), dir)
    }

    fn rec(id: i64) -> Record {
        Record::new(vec![FieldValue::Int64(id)], vec![FieldValue::Blob(vec![id as u8])])
    }

    fn ids_of(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .map(|r| match r.key[0] {
                FieldValue::Int64(v) => v,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_forward_scan_matches_insertion_set() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        for id in 0..30i64 {
            tree.insert(rec(id)).unwrap();
        }
        let mut cursor = Cursor::seek_first(Arc::clone(&tree)).unwrap();
        let mut out = Vec::new();
        while let Some(r) = cursor.next().unwrap() {
            out.push(r);
        }
        assert_eq!(ids_of(&out), (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_backward_scan_is_reverse_of_forward() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        for id in 0..30i64 {
            tree.insert(rec(id)).unwrap();
        }
        let mut cursor = Cursor::seek_last(Arc::clone(&tree)).unwrap();
        let mut out = Vec::new();
        while let Some(r) = cursor.prev().unwrap() {
            out.push(r);
        }
        let mut expected: Vec<i64> = (0..30).collect();
        expected.reverse();
        assert_eq!(ids_of(&out), expected);
    }

    #[test]
    fn test_seek_lower_bound_starts_at_boundary() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        for id in 0..20i64 {
            tree.insert(rec(id)).unwrap();
        }
        let mut cursor = Cursor::seek_lower_bound(Arc::clone(&tree), &[FieldValue::Int64(7)]).unwrap();
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.key, vec![FieldValue::Int64(7)]);
    }

    #[test]
    fn test_seek_upper_bound_ends_at_boundary_in_reverse() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        for id in 0..20i64 {
            tree.insert(rec(id)).unwrap();
        }
        let mut cursor = Cursor::seek_upper_bound(Arc::clone(&tree), &[FieldValue::Int64(7)]).unwrap();
        let first = cursor.prev().unwrap().unwrap();
        assert_eq!(first.key, vec![FieldValue::Int64(7)]);
    }

    #[test]
    fn test_seek_lower_bound_finds_full_duplicate_run_across_split() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        tree.insert(rec(0)).unwrap();
        for i in 0..5 {
            tree.insert(Record::new(vec![FieldValue::Int64(5)], vec![FieldValue::Blob(vec![i])]))
                .unwrap();
        }
        tree.insert(rec(9)).unwrap();

        let mut cursor = Cursor::seek_lower_bound(Arc::clone(&tree), &[FieldValue::Int64(5)]).unwrap();
        let mut count = 0;
        while let Some(r) = cursor.next().unwrap() {
            if r.key != vec![FieldValue::Int64(5)] {
                break;
            }
            count += 1;
        }
        assert_eq!(count, 5, "ascending seek must land on the first leaf of the run, not skip into its tail");
    }

    #[test]
    fn test_seek_upper_bound_finds_full_duplicate_run_across_split() {
        let (tree, _dir) = open_tree(BTreeConfig::new(4, 4));
        tree.insert(rec(0)).unwrap();
        for i in 0..5 {
            tree.insert(Record::new(vec![FieldValue::Int64(5)], vec![FieldValue::Blob(vec![i])]))
                .unwrap();
        }
        tree.insert(rec(9)).unwrap();

        let mut cursor = Cursor::seek_upper_bound(Arc::clone(&tree), &[FieldValue::Int64(5)]).unwrap();
        let mut count = 0;
        while let Some(r) = cursor.prev().unwrap() {
            if r.key != vec![FieldValue::Int64(5)] {
                break;
            }
            count += 1;
        }
        assert_eq!(count, 5, "descending seek must land on the last leaf of the run and walk back through all of it");
    }

    #[test]
    fn test_empty_tree_cursor_is_exhausted() {
        let (tree, _dir) = open_tree(BTreeConfig::default());
        let mut cursor = Cursor::seek_first(tree).unwrap();
        assert!(cursor.next().unwrap().is_none());
    }
}
