//! B+tree engine (§3, §4, C7, C8): composite-key insert/delete with
//! split/merge/borrow rebalancing, root promotion/demotion, and leaf
//! doubly-linked chaining.
//!
//! Every node page carries its own `parent_page_id` (§6.1), so the
//! engine never needs an explicit descent stack: a split propagates a
//! separator up through the child's parent pointer, and an underflow
//! walks back up the same way. Interior pages use the convention that a
//! slot's child holds the subtree of keys greater than or equal to
//! that slot's key; the subtree for everything smaller than the first
//! separator is the page's `leftmost_child`.

use crate::buffer::{BufferPool, BufferPoolImpl};
use crate::error::{Result, StorageError};
use crate::field::FieldValue;
use crate::oob;
use crate::page::{KeyInfoSlot, KeyRepr, SlotLink, SlottedPage};
use crate::record::{self, Record};
use crate::schema::{KeyInfoMode, Schema};
use crate::types::{BTreeConfig, ObjectId, PageId, PageType, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use log::debug;
use std::cmp::Ordering;
use std::sync::Arc;

/// A disk-resident B+tree over composite, schema-typed keys.
pub struct BTree {
    pool: Arc<BufferPoolImpl>,
    schema: Schema,
    config: BTreeConfig,
}

impl BTree {
    /// Open a tree over an already-initialized buffer pool, creating
    /// the initial empty root leaf if the file has none yet.
    pub fn new(pool: Arc<BufferPoolImpl>, schema: Schema) -> Result<Self> {
        Self::with_config(pool, schema, BTreeConfig::default())
    }

    pub fn with_config(pool: Arc<BufferPoolImpl>, schema: Schema, config: BTreeConfig) -> Result<Self> {
        let tree = Self { pool, schema, config };
        if tree.pool.root_page().value() == 0 {
            let (root_id, _guard) = tree.pool.new_page(PageType::LeafTable)?;
            tree.pool.set_root_page(root_id, 1)?;
            tree.pool.set_leaf_range(root_id, root_id)?;
        }
        Ok(tree)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &Arc<BufferPoolImpl> {
        &self.pool
    }

    pub fn depth(&self) -> u32 {
        self.pool.tree_depth()
    }

    pub fn root_page(&self) -> PageId {
        self.pool.root_page()
    }

    pub fn len(&self) -> u64 {
        self.pool.record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- record insert -----------------------------------------------

    pub fn insert(&self, record: Record) -> Result<()> {
        record.validate(&self.schema)?;
        let key_bytes = record::encode_key(&record.key)?;
        if key_bytes.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: key_bytes.len(),
                max: MAX_KEY_SIZE,
            });
        }
        let value_bytes = record::encode_value(&record.value)?;
        if value_bytes.len() > MAX_VALUE_SIZE * 64 {
            // Values are always out-of-band-capable; this only guards
            // against pathological unbounded input.
            return Err(StorageError::ValueTooLarge {
                size: value_bytes.len(),
                max: MAX_VALUE_SIZE * 64,
            });
        }

        let value_oid = self.store_value_object(&value_bytes)?;
        let key_repr = self.build_key_repr(&key_bytes)?;

        let leaf_id = self.find_leaf(&record.key)?;
        self.insert_into_leaf(leaf_id, &record.key, key_repr, SlotLink::Value(value_oid))?;
        self.pool.set_record_count(self.pool.record_count() + 1)?;
        Ok(())
    }

    /// Replace every record at `key` with a single new record carrying
    /// `new_value`; returns `false` if no record matched.
    pub fn update(&self, key: &[FieldValue], new_value: Vec<FieldValue>) -> Result<bool> {
        if !self.delete(key)? {
            return Ok(false);
        }
        self.insert(Record::new(key.to_vec(), new_value))?;
        Ok(true)
    }

    /// Delete the first record matching `key` exactly. Returns whether
    /// a record was removed.
    pub fn delete(&self, key: &[FieldValue]) -> Result<bool> {
        // Start at the leftmost leaf that could hold the run (as
        // `search_equals` does) and walk forward across leaves: a
        // duplicate-key run split across a leaf boundary can leave the
        // landed leaf with no match of its own, with the actual first
        // occurrence one leaf further on.
        let mut leaf_id = self.find_leaf_leftmost(key)?;
        let (found, landed_leaf) = loop {
            let (found, next) = {
                let guard = self.pool.fetch_page(leaf_id)?;
                let page = guard.read();
                let node = page.as_node()?;
                let mut found = None;
                let mut stop = false;
                for i in 0..node.slot_count() {
                    let slot = node.get_slot(i)?;
                    let slot_key = self.decode_slot_key(&slot)?;
                    match compare_keys(&self.schema, &slot_key, key) {
                        Ordering::Equal => {
                            found = Some(i);
                            break;
                        }
                        Ordering::Greater => {
                            stop = true;
                            break;
                        }
                        Ordering::Less => {}
                    }
                }
                (found, if stop { None } else { node.next_leaf() })
            };
            if found.is_some() || next.is_none() {
                break (found, leaf_id);
            }
            leaf_id = next.unwrap();
        };
        let Some(index) = found else { return Ok(false) };
        let leaf_id = landed_leaf;

        let removed = {
            let guard = self.pool.fetch_page_mut(leaf_id)?;
            let slot = guard.write().as_node_mut()?.delete_slot(index)?;
            slot
        };
        self.release_slot(&removed)?;
        self.pool.set_record_count(self.pool.record_count().saturating_sub(1))?;
        self.fixup_underflow(leaf_id)?;
        Ok(true)
    }

    /// Point lookup: the first record matching `key` exactly.
    pub fn fetch(&self, key: &[FieldValue]) -> Result<Option<Record>> {
        let matches = self.search_equals(key)?;
        Ok(matches.into_iter().next())
    }

    /// All records whose key equals `key` (the duplicate-key run).
    pub fn search_equals(&self, key: &[FieldValue]) -> Result<Vec<Record>> {
        let leaf_id = self.find_leaf_leftmost(key)?;
        let mut out = Vec::new();
        let mut current = Some(leaf_id);
        'leaves: while let Some(leaf) = current {
            let guard = self.pool.fetch_page(leaf)?;
            let page = guard.read();
            let node = page.as_node()?;
            for i in 0..node.slot_count() {
                let slot = node.get_slot(i)?;
                let slot_key = self.decode_slot_key(&slot)?;
                match compare_keys(&self.schema, &slot_key, key) {
                    Ordering::Less => continue,
                    Ordering::Equal => {
                        let value = self.load_value(slot.link.as_value().unwrap())?;
                        out.push(Record::new(slot_key, value));
                    }
                    Ordering::Greater => break 'leaves,
                }
            }
            current = node.next_leaf();
        }
        Ok(out)
    }

    /// Full ascending scan of every record in the tree.
    pub fn scan_all(&self) -> Result<Vec<Record>> {
        let (first, _last) = self.pool.leaf_range();
        let mut out = Vec::new();
        if first.value() == 0 {
            return Ok(out);
        }
        let mut current = Some(first);
        while let Some(leaf) = current {
            let guard = self.pool.fetch_page(leaf)?;
            let page = guard.read();
            let node = page.as_node()?;
            for i in 0..node.slot_count() {
                let slot = node.get_slot(i)?;
                let key = self.decode_slot_key(&slot)?;
                let value = self.load_value(slot.link.as_value().unwrap())?;
                out.push(Record::new(key, value));
            }
            current = node.next_leaf();
        }
        Ok(out)
    }

    // ---- descent -------------------------------------------------------

    /// Walk from the root to the leaf `key` would be inserted into: ties
    /// route to the **right** child, so a new duplicate always lands in
    /// the leaf holding the tail of an existing equal-key run (§4.1.9
    /// contiguity). Only `insert` should use this — every search/seek
    /// path needs [`Self::find_leaf_leftmost`] instead, since a
    /// duplicate-key run split across two leaves puts the separator
    /// between them exactly at the run's key, and routing ties right
    /// during a search would skip straight past the earlier leaf's
    /// share of the run.
    pub(crate) fn find_leaf(&self, key: &[FieldValue]) -> Result<PageId> {
        self.descend(key, true)
    }

    /// Walk from the root to the leftmost leaf that could hold the first
    /// occurrence of `key` in ascending order: ties route to the
    /// **left** child. Used by every exact-match/ascending-seek locator
    /// (`delete`, `search_equals`, `Cursor::seek_lower_bound`) so a
    /// duplicate-key run that straddles a split is scanned from its
    /// first leaf instead of skipping to wherever `find_leaf` last
    /// promoted a copy of the key as a separator.
    pub(crate) fn find_leaf_leftmost(&self, key: &[FieldValue]) -> Result<PageId> {
        self.descend(key, false)
    }

    /// Shared descent: `ties_right` selects whether a slot whose
    /// separator equals `key` is crossed into (insert locator) or left
    /// uncrossed (leftmost-occurrence search locator).
    fn descend(&self, key: &[FieldValue], ties_right: bool) -> Result<PageId> {
        let mut page_id = self.pool.root_page();
        loop {
            let next = {
                let guard = self.pool.fetch_page(page_id)?;
                let page = guard.read();
                let node = page.as_node()?;
                if node.is_leaf() {
                    return Ok(page_id);
                }
                let mut chosen = node.leftmost_child();
                for i in 0..node.slot_count() {
                    let slot = node.get_slot(i)?;
                    let slot_key = self.decode_slot_key(&slot)?;
                    let ord = compare_keys(&self.schema, &slot_key, key);
                    let take = if ties_right { ord != Ordering::Greater } else { ord == Ordering::Less };
                    if take {
                        chosen = slot.link.as_child();
                    } else {
                        break;
                    }
                }
                chosen.ok_or_else(|| StorageError::corruption("interior node has no matching child"))?
            };
            page_id = next;
        }
    }

    pub(crate) fn decode_slot_key(&self, slot: &KeyInfoSlot) -> Result<Vec<FieldValue>> {
        match &slot.key {
            KeyRepr::Inline(bytes) => record::decode_key(&self.schema, bytes),
            KeyRepr::Indirect(oid) => {
                let bytes = self.load_object_raw(*oid)?;
                record::decode_key(&self.schema, &bytes)
            }
        }
    }

    pub(crate) fn load_value(&self, oid: ObjectId) -> Result<Vec<FieldValue>> {
        let tag_and_payload = self.load_object_raw(oid)?;
        let tag = tag_and_payload[0];
        let raw = if tag == 0 {
            tag_and_payload[1..].to_vec()
        } else {
            let head = ObjectId::from_bytes(&tag_and_payload[1..]);
            oob::load(self.pool.as_ref(), head)?
        };
        record::decode_value(&self.schema, &raw)
    }

    fn load_object_raw(&self, oid: ObjectId) -> Result<Vec<u8>> {
        let guard = self.pool.fetch_page(oid.page_id)?;
        let page = guard.read();
        Ok(page.as_area()?.get(oid.area_id)?.to_vec())
    }

    // ---- object store helpers ------------------------------------------

    fn build_key_repr(&self, key_bytes: &[u8]) -> Result<KeyRepr> {
        match self.schema.key_info_mode() {
            KeyInfoMode::Inline => Ok(KeyRepr::Inline(key_bytes.to_vec())),
            KeyInfoMode::Indirect => {
                let (page_id, guard) = self.pool.new_page(PageType::ValueArea)?;
                let area_id = guard.write().as_area_mut()?.insert(key_bytes)?;
                Ok(KeyRepr::Indirect(ObjectId::new(page_id, area_id)))
            }
        }
    }

    fn store_value_object(&self, value_bytes: &[u8]) -> Result<ObjectId> {
        let mut buf = Vec::with_capacity(value_bytes.len() + 9);
        if value_bytes.len() <= self.config.outside_threshold {
            buf.push(0u8);
            buf.extend_from_slice(value_bytes);
        } else {
            let head = oob::store(self.pool.as_ref(), value_bytes, self.config.compression_min_saving)?;
            buf.push(1u8);
            buf.extend_from_slice(&head.to_bytes());
        }
        let (page_id, guard) = self.pool.new_page(PageType::ValueArea)?;
        let area_id = guard.write().as_area_mut()?.insert(&buf)?;
        Ok(ObjectId::new(page_id, area_id))
    }

    /// Release whatever out-of-line storage a slot (being removed) owns:
    /// its indirect key object, if any, and its value object (plus its
    /// out-of-band chain, if the value spilled out of line).
    fn release_slot(&self, slot: &KeyInfoSlot) -> Result<()> {
        if let KeyRepr::Indirect(oid) = &slot.key {
            self.pool.free_page(oid.page_id)?;
        }
        if let SlotLink::Value(oid) = slot.link {
            let tag_and_payload = self.load_object_raw(oid)?;
            if tag_and_payload[0] == 1 {
                let head = ObjectId::from_bytes(&tag_and_payload[1..]);
                oob::delete(self.pool.as_ref(), head)?;
            }
            self.pool.free_page(oid.page_id)?;
        }
        Ok(())
    }

    // ---- insertion / splitting ------------------------------------------

    fn insert_into_leaf(
        &self,
        leaf_id: PageId,
        key: &[FieldValue],
        key_repr: KeyRepr,
        link: SlotLink,
    ) -> Result<()> {
        let slot = KeyInfoSlot { key: key_repr, link };
        let (position, fits) = {
            let guard = self.pool.fetch_page(leaf_id)?;
            let page = guard.read();
            let node = page.as_node()?;
            let mut pos = node.slot_count();
            for i in 0..node.slot_count() {
                let existing = node.get_slot(i)?;
                let existing_key = self.decode_slot_key(&existing)?;
                if compare_keys(&self.schema, &existing_key, key) == Ordering::Greater {
                    pos = i;
                    break;
                }
            }
            let within_limit = node.slot_count() < self.config.max_leaf_keys;
            (pos, within_limit && node.can_fit(slot.encoded_size()))
        };

        if fits {
            let guard = self.pool.fetch_page_mut(leaf_id)?;
            guard.write().as_node_mut()?.insert_slot_at(position, &slot)?;
            Ok(())
        } else {
            self.split_leaf_and_insert(leaf_id, position, slot)
        }
    }

    fn split_leaf_and_insert(&self, leaf_id: PageId, position: usize, new_slot: KeyInfoSlot) -> Result<()> {
        let (mut all_slots, parent, prev_leaf, next_leaf) = {
            let guard = self.pool.fetch_page(leaf_id)?;
            let page = guard.read();
            let node = page.as_node()?;
            (node.get_all_slots()?, node.parent(), node.prev_leaf(), node.next_leaf())
        };
        all_slots.insert(position, new_slot);
        let mid = all_slots.len() / 2;
        let left = all_slots[..mid].to_vec();
        let right = all_slots[mid..].to_vec();
        debug!("splitting leaf page {leaf_id} ({} slots)", all_slots.len());

        let (new_leaf_id, new_guard) = self.pool.new_page(PageType::LeafTable)?;
        {
            let mut page = new_guard.write();
            let node = page.as_node_mut()?;
            for (i, s) in right.iter().enumerate() {
                node.insert_slot_at(i, s)?;
            }
            node.set_parent(parent);
            node.set_next_leaf(next_leaf);
            node.set_prev_leaf(Some(leaf_id));
        }
        drop(new_guard);

        // Rebuild the left page from `left` rather than trimming the
        // unmodified on-disk slots by count: `new_slot` may belong in
        // the left half (when `position < mid`), and the on-disk page
        // never had it inserted — only `all_slots` (the in-memory copy)
        // did.
        {
            let guard = self.pool.fetch_page_mut(leaf_id)?;
            let mut page = guard.write();
            let node = page.as_node_mut()?;
            *node = SlottedPage::new_leaf();
            for (i, s) in left.iter().enumerate() {
                node.insert_slot_at(i, s)?;
            }
            node.set_parent(parent);
            node.set_prev_leaf(prev_leaf);
            node.set_next_leaf(Some(new_leaf_id));
        }

        if let Some(next) = next_leaf {
            let guard = self.pool.fetch_page_mut(next)?;
            guard.write().as_node_mut()?.set_prev_leaf(Some(new_leaf_id));
        } else {
            let (first, _) = self.pool.leaf_range();
            self.pool.set_leaf_range(first, new_leaf_id)?;
        }

        let separator_key = self.decode_slot_key(&right[0])?;
        self.insert_into_parent(leaf_id, parent, &separator_key, new_leaf_id)
    }

    fn insert_into_interior(&self, parent_id: PageId, sep_key: &[FieldValue], right_child: PageId) -> Result<()> {
        let key_bytes = record::encode_key(sep_key)?;
        let key_repr = self.build_key_repr(&key_bytes)?;
        let slot = KeyInfoSlot {
            key: key_repr,
            link: SlotLink::Child(right_child),
        };

        let (position, fits) = {
            let guard = self.pool.fetch_page(parent_id)?;
            let page = guard.read();
            let node = page.as_node()?;
            let mut pos = node.slot_count();
            for i in 0..node.slot_count() {
                let existing = node.get_slot(i)?;
                let existing_key = self.decode_slot_key(&existing)?;
                if compare_keys(&self.schema, &existing_key, sep_key) == Ordering::Greater {
                    pos = i;
                    break;
                }
            }
            let within_limit = node.slot_count() < self.config.max_interior_keys;
            (pos, within_limit && node.can_fit(slot.encoded_size()))
        };

        if fits {
            let guard = self.pool.fetch_page_mut(parent_id)?;
            guard.write().as_node_mut()?.insert_slot_at(position, &slot)?;
            self.set_parent_pointer(right_child, Some(parent_id))?;
            Ok(())
        } else {
            self.split_interior_and_insert(parent_id, position, slot)
        }
    }

    fn split_interior_and_insert(&self, node_id: PageId, position: usize, new_slot: KeyInfoSlot) -> Result<()> {
        let (mut all_slots, parent, leftmost_child) = {
            let guard = self.pool.fetch_page(node_id)?;
            let page = guard.read();
            let node = page.as_node()?;
            (node.get_all_slots()?, node.parent(), node.leftmost_child())
        };
        all_slots.insert(position, new_slot);
        let mid = all_slots.len() / 2;
        let left = all_slots[..mid].to_vec();
        let median = all_slots[mid].clone();
        let median_key = self.decode_slot_key(&median)?;
        let median_child = median
            .link
            .as_child()
            .ok_or_else(|| StorageError::corruption("interior slot missing child pointer"))?;

        let right = all_slots[mid + 1..].to_vec();
        debug!("splitting interior page {node_id} ({} slots)", all_slots.len());

        let (new_node_id, new_guard) = self.pool.new_page(PageType::InteriorTable)?;
        {
            let mut page = new_guard.write();
            let node = page.as_node_mut()?;
            node.set_leftmost_child(Some(median_child));
            for (i, s) in right.iter().enumerate() {
                node.insert_slot_at(i, s)?;
            }
            node.set_parent(parent);
        }
        drop(new_guard);

        self.set_parent_pointer(median_child, Some(new_node_id))?;
        for s in &right {
            if let Some(child) = s.link.as_child() {
                self.set_parent_pointer(child, Some(new_node_id))?;
            }
        }

        // Rebuild the left page from `left` rather than trimming the
        // unmodified on-disk slots by count (see `split_leaf_and_insert`
        // for why: `new_slot` may belong left of `mid` and was never
        // written to the on-disk page).
        {
            let guard = self.pool.fetch_page_mut(node_id)?;
            let mut page = guard.write();
            let node = page.as_node_mut()?;
            *node = SlottedPage::new_interior();
            node.set_leftmost_child(leftmost_child);
            for (i, s) in left.iter().enumerate() {
                node.insert_slot_at(i, s)?;
            }
            node.set_parent(parent);
        }

        self.insert_into_parent(node_id, parent, &median_key, new_node_id)
    }

    fn insert_into_parent(
        &self,
        left_child: PageId,
        parent: Option<PageId>,
        sep_key: &[FieldValue],
        right_child: PageId,
    ) -> Result<()> {
        match parent {
            None => {
                let key_bytes = record::encode_key(sep_key)?;
                let key_repr = self.build_key_repr(&key_bytes)?;
                let (new_root_id, guard) = self.pool.new_page(PageType::InteriorTable)?;
                {
                    let mut page = guard.write();
                    let node = page.as_node_mut()?;
                    node.set_leftmost_child(Some(left_child));
                    node.insert_slot_at(
                        0,
                        &KeyInfoSlot {
                            key: key_repr,
                            link: SlotLink::Child(right_child),
                        },
                    )?;
                }
                drop(guard);
                self.set_parent_pointer(left_child, Some(new_root_id))?;
                self.set_parent_pointer(right_child, Some(new_root_id))?;
                let depth = self.pool.tree_depth() + 1;
                debug!("promoting root to page {new_root_id}, new depth {depth}");
                self.pool.set_root_page(new_root_id, depth)?;
                Ok(())
            }
            Some(parent_id) => self.insert_into_interior(parent_id, sep_key, right_child),
        }
    }

    fn set_parent_pointer(&self, child_id: PageId, parent: Option<PageId>) -> Result<()> {
        let guard = self.pool.fetch_page_mut(child_id)?;
        guard.write().as_node_mut()?.set_parent(parent);
        Ok(())
    }

    // ---- deletion rebalancing -------------------------------------------

    fn fixup_underflow(&self, node_id: PageId) -> Result<()> {
        let (is_leaf, slot_count, parent) = {
            let guard = self.pool.fetch_page(node_id)?;
            let page = guard.read();
            let node = page.as_node()?;
            (node.is_leaf(), node.slot_count(), node.parent())
        };
        let max_slots = if is_leaf {
            self.config.max_leaf_keys
        } else {
            self.config.max_interior_keys
        };
        let threshold = self.config.merge_threshold(max_slots);

        let Some(parent_id) = parent else {
            if !is_leaf && slot_count == 0 {
                let leftmost = {
                    let guard = self.pool.fetch_page(node_id)?;
                    let child = guard.read().as_node()?.leftmost_child();
                    child
                };
                if let Some(new_root) = leftmost {
                    self.set_parent_pointer(new_root, None)?;
                    let depth = self.pool.tree_depth().saturating_sub(1).max(1);
                    self.pool.set_root_page(new_root, depth)?;
                    self.pool.free_page(node_id)?;
                }
            }
            return Ok(());
        };

        if slot_count >= threshold {
            return Ok(());
        }
        self.borrow_or_merge(node_id, parent_id, is_leaf, threshold)
    }

    fn parent_child_list(&self, parent_id: PageId) -> Result<Vec<PageId>> {
        let guard = self.pool.fetch_page(parent_id)?;
        let page = guard.read();
        let node = page.as_node()?;
        let mut out = Vec::with_capacity(node.slot_count() + 1);
        if let Some(l) = node.leftmost_child() {
            out.push(l);
        }
        for i in 0..node.slot_count() {
            if let Some(c) = node.get_slot(i)?.link.as_child() {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn slot_count_of(&self, page_id: PageId) -> Result<usize> {
        let guard = self.pool.fetch_page(page_id)?;
        let count = guard.read().as_node()?.slot_count();
        Ok(count)
    }

    fn borrow_or_merge(&self, node_id: PageId, parent_id: PageId, is_leaf: bool, threshold: usize) -> Result<()> {
        let children = self.parent_child_list(parent_id)?;
        let idx = children
            .iter()
            .position(|&c| c == node_id)
            .ok_or_else(|| StorageError::corruption("node missing from parent's child list"))?;
        let left_sib = if idx > 0 { Some((idx - 1, children[idx - 1])) } else { None };
        let right_sib = if idx + 1 < children.len() {
            Some((idx, children[idx + 1]))
        } else {
            None
        };

        if is_leaf {
            if let Some((sep_index, right_id)) = right_sib {
                if self.slot_count_of(right_id)? > threshold {
                    return self.leaf_borrow_from_right(node_id, right_id, parent_id, sep_index);
                }
            }
            if let Some((sep_index, left_id)) = left_sib {
                if self.slot_count_of(left_id)? > threshold {
                    return self.leaf_borrow_from_left(node_id, left_id, parent_id, sep_index);
                }
            }
        }

        if let Some((sep_index, right_id)) = right_sib {
            return self.merge_with_right(node_id, right_id, parent_id, sep_index, is_leaf);
        }
        if let Some((sep_index, left_id)) = left_sib {
            return self.merge_with_right(left_id, node_id, parent_id, sep_index, is_leaf);
        }
        Ok(())
    }

    fn leaf_borrow_from_right(&self, node_id: PageId, right_id: PageId, parent_id: PageId, sep_index: usize) -> Result<()> {
        let borrowed = {
            let guard = self.pool.fetch_page_mut(right_id)?;
            let slot = guard.write().as_node_mut()?.delete_slot(0)?;
            slot
        };
        {
            let guard = self.pool.fetch_page_mut(node_id)?;
            let mut page = guard.write();
            let node = page.as_node_mut()?;
            let pos = node.slot_count();
            node.insert_slot_at(pos, &borrowed)?;
        }
        let new_sep_key = {
            let guard = self.pool.fetch_page(right_id)?;
            let page = guard.read();
            self.decode_slot_key(&page.as_node()?.get_slot(0)?)?
        };
        self.replace_parent_separator(parent_id, sep_index, &new_sep_key)
    }

    fn leaf_borrow_from_left(&self, node_id: PageId, left_id: PageId, parent_id: PageId, sep_index: usize) -> Result<()> {
        let borrowed = {
            let guard = self.pool.fetch_page_mut(left_id)?;
            let mut page = guard.write();
            let node = page.as_node_mut()?;
            node.delete_slot(node.slot_count() - 1)?
        };
        {
            let guard = self.pool.fetch_page_mut(node_id)?;
            guard.write().as_node_mut()?.insert_slot_at(0, &borrowed)?;
        }
        let new_sep_key = self.decode_slot_key(&borrowed)?;
        self.replace_parent_separator(parent_id, sep_index, &new_sep_key)
    }

    fn replace_parent_separator(&self, parent_id: PageId, sep_index: usize, new_key: &[FieldValue]) -> Result<()> {
        let key_bytes = record::encode_key(new_key)?;
        let key_repr = self.build_key_repr(&key_bytes)?;
        let guard = self.pool.fetch_page_mut(parent_id)?;
        let mut page = guard.write();
        let node = page.as_node_mut()?;
        let old = node.get_slot(sep_index)?;
        let updated = KeyInfoSlot {
            key: key_repr,
            link: old.link,
        };
        node.update_slot_at(sep_index, &updated)
    }

    fn merge_with_right(
        &self,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        sep_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        debug!("merging page {right_id} into {left_id}");
        if is_leaf {
            let (right_slots, right_next) = {
                let guard = self.pool.fetch_page(right_id)?;
                let page = guard.read();
                let node = page.as_node()?;
                (node.get_all_slots()?, node.next_leaf())
            };
            {
                let guard = self.pool.fetch_page_mut(left_id)?;
                let mut page = guard.write();
                let node = page.as_node_mut()?;
                let base = node.slot_count();
                for (pos, s) in (base..).zip(right_slots.iter()) {
                    node.insert_slot_at(pos, s)?;
                }
                node.set_next_leaf(right_next);
            }
            if let Some(next) = right_next {
                let guard = self.pool.fetch_page_mut(next)?;
                guard.write().as_node_mut()?.set_prev_leaf(Some(left_id));
            } else {
                let (first, _) = self.pool.leaf_range();
                self.pool.set_leaf_range(first, left_id)?;
            }
        } else {
            let sep_key = {
                let guard = self.pool.fetch_page(parent_id)?;
                let page = guard.read();
                let sep_slot = page.as_node()?.get_slot(sep_index)?;
                self.decode_slot_key(&sep_slot)?
            };
            let (right_leftmost, right_slots) = {
                let guard = self.pool.fetch_page(right_id)?;
                let page = guard.read();
                let node = page.as_node()?;
                (node.leftmost_child(), node.get_all_slots()?)
            };
            let right_leftmost =
                right_leftmost.ok_or_else(|| StorageError::corruption("interior sibling missing leftmost child"))?;
            let sep_bytes = record::encode_key(&sep_key)?;
            let sep_repr = self.build_key_repr(&sep_bytes)?;
            let pulled_down = KeyInfoSlot {
                key: sep_repr,
                link: SlotLink::Child(right_leftmost),
            };

            {
                let guard = self.pool.fetch_page_mut(left_id)?;
                let mut page = guard.write();
                let node = page.as_node_mut()?;
                let mut pos = node.slot_count();
                node.insert_slot_at(pos, &pulled_down)?;
                pos += 1;
                for s in &right_slots {
                    node.insert_slot_at(pos, s)?;
                    pos += 1;
                }
            }
            self.set_parent_pointer(right_leftmost, Some(left_id))?;
            for s in &right_slots {
                if let Some(c) = s.link.as_child() {
                    self.set_parent_pointer(c, Some(left_id))?;
                }
            }
        }

        {
            let guard = self.pool.fetch_page_mut(parent_id)?;
            guard.write().as_node_mut()?.delete_slot(sep_index)?;
        }
        self.pool.free_page(right_id)?;
        self.fixup_underflow(parent_id)
    }
}

/// Composite key comparison, re-exported at the module boundary so the
/// rest of `btree` doesn't need to reach into `record` directly.
pub(crate) fn compare_keys(schema: &Schema, a: &[FieldValue], b: &[FieldValue]) -> Ordering {
    record::compare_keys(schema, a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::schema::FieldDef;
    use crate::storage::DiskManagerImpl;
    use crate::types::Direction;
    use tempfile::tempdir;

    fn int_schema() -> Schema {
        Schema::new(
            vec![FieldDef::key("id", FieldType::Int64, Direction::Ascending, false)],
            vec![FieldDef::value("payload", FieldType::Blob, false)],
        )
    }

    fn open_tree(schema: Schema, config: BTreeConfig) -> (BTree, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open_with_schema(&dir.path().join("t.db"), false, Some(schema.clone())).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(dm, 64));
        (BTree::with_config(pool, schema, config).unwrap(), dir)
    }

    fn rec(id: i64, payload: &str) -> Record {
        Record::new(vec![FieldValue::Int64(id)], vec![FieldValue::Blob(payload.as_bytes().to_vec())])
    }

    #[test]
    fn test_insert_and_fetch() {
        let (tree, _dir) = open_tree(int_schema(), BTreeConfig::default());
        tree.insert(rec(1, "one")).unwrap();
        tree.insert(rec(2, "two")).unwrap();
        let found = tree.fetch(&[FieldValue::Int64(1)]).unwrap().unwrap();
        assert_eq!(found.value, vec![FieldValue::Blob(b"one".to_vec())]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_insert_many_causes_split_and_scan_is_sorted() {
        let config = BTreeConfig::new(4, 4);
        let (tree, _dir) = open_tree(int_schema(), config);
        let mut ids: Vec<i64> = (0..100).collect();
        for &id in &ids {
            tree.insert(rec(id, "x")).unwrap();
        }
        assert!(tree.depth() > 1, "tree should have split into multiple levels");
        let scanned = tree.scan_all().unwrap();
        let scanned_ids: Vec<i64> = scanned
            .iter()
            .map(|r| match r.key[0] {
                FieldValue::Int64(v) => v,
                _ => unreachable!(),
            })
            .collect();
        ids.sort();
        assert_eq!(scanned_ids, ids);
    }

    #[test]
    fn test_delete_shrinks_and_merges() {
        let config = BTreeConfig::new(4, 4);
        let (tree, _dir) = open_tree(int_schema(), config);
        for id in 0..40i64 {
            tree.insert(rec(id, "x")).unwrap();
        }
        for id in 0..35i64 {
            assert!(tree.delete(&[FieldValue::Int64(id)]).unwrap());
        }
        assert_eq!(tree.len(), 5);
        let remaining: Vec<i64> = tree
            .scan_all()
            .unwrap()
            .iter()
            .map(|r| match r.key[0] {
                FieldValue::Int64(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(remaining, vec![35, 36, 37, 38, 39]);
    }

    #[test]
    fn test_delete_missing_key_returns_false() {
        let (tree, _dir) = open_tree(int_schema(), BTreeConfig::default());
        tree.insert(rec(1, "one")).unwrap();
        assert!(!tree.delete(&[FieldValue::Int64(42)]).unwrap());
    }

    #[test]
    fn test_update_replaces_value() {
        let (tree, _dir) = open_tree(int_schema(), BTreeConfig::default());
        tree.insert(rec(1, "one")).unwrap();
        assert!(tree
            .update(&[FieldValue::Int64(1)], vec![FieldValue::Blob(b"uno".to_vec())])
            .unwrap());
        let found = tree.fetch(&[FieldValue::Int64(1)]).unwrap().unwrap();
        assert_eq!(found.value, vec![FieldValue::Blob(b"uno".to_vec())]);
    }

    #[test]
    fn test_duplicate_keys_form_a_run() {
        let (tree, _dir) = open_tree(int_schema(), BTreeConfig::default());
        tree.insert(rec(1, "a")).unwrap();
        tree.insert(rec(1, "b")).unwrap();
        tree.insert(rec(1, "c")).unwrap();
        let matches = tree.search_equals(&[FieldValue::Int64(1)]).unwrap();
        assert_eq!(matches.len(), 3);
    }

    #[test]
    fn test_duplicate_run_straddling_split_is_fully_visible() {
        // max_leaf_keys=4: the 5th insert of the same key forces a split
        // whose separator is itself `k`, landing part of the run in the
        // left leaf and part in the right one.
        let config = BTreeConfig::new(4, 4);
        let (tree, _dir) = open_tree(int_schema(), config);
        tree.insert(rec(0, "lo")).unwrap();
        for payload in ["a", "b", "c", "d", "e"] {
            tree.insert(rec(5, payload)).unwrap();
        }
        tree.insert(rec(9, "hi")).unwrap();

        let matches = tree.search_equals(&[FieldValue::Int64(5)]).unwrap();
        assert_eq!(matches.len(), 5, "search_equals must see every duplicate across the split");

        let found = tree.fetch(&[FieldValue::Int64(5)]).unwrap().unwrap();
        assert_eq!(found.key, vec![FieldValue::Int64(5)]);

        assert!(tree.delete(&[FieldValue::Int64(5)]).unwrap());
        let remaining = tree.search_equals(&[FieldValue::Int64(5)]).unwrap();
        assert_eq!(remaining.len(), 4, "delete must remove exactly one occurrence, not skip the run");
    }

    #[test]
    fn test_large_value_goes_out_of_band() {
        let config = BTreeConfig {
            outside_threshold: 64,
            ..BTreeConfig::default()
        };
        let (tree, _dir) = open_tree(int_schema(), config);
        let big = vec![b'z'; 10_000];
        tree.insert(Record::new(vec![FieldValue::Int64(1)], vec![FieldValue::Blob(big.clone())]))
            .unwrap();
        let found = tree.fetch(&[FieldValue::Int64(1)]).unwrap().unwrap();
        assert_eq!(found.value, vec![FieldValue::Blob(big)]);
    }
}
