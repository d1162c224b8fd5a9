//! Slotted node page (§3.1, §6.1, C7).
//!
//! Layout: fixed header, then a slot-pointer array growing toward the
//! content area, then free space, then key-information slots packed
//! from the end of the page backward. Slots are kept in key order by
//! position, but this module never compares keys itself — ordering
//! and binary search over decoded composite keys is the engine
//! layer's job (`record::compare_keys`), since an indirect key slot
//! requires a page fetch to resolve. This page type only knows how to
//! store/retrieve/move slots at a given position.

use crate::error::{Result, StorageError};
use crate::page::cell::KeyInfoSlot;
use crate::page::{PageBuf, PageHeader};
use crate::types::{PageId, PageType};

pub struct SlottedPage {
    data: PageBuf,
    header: PageHeader,
}

impl SlottedPage {
    pub fn new_leaf() -> Self {
        let mut data = PageBuf::new();
        let header = PageHeader::new_leaf();
        header.write(&mut data);
        Self { data, header }
    }

    pub fn new_interior() -> Self {
        let mut data = PageBuf::new();
        let header = PageHeader::new_interior();
        header.write(&mut data);
        Self { data, header }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data = PageBuf::from_bytes(bytes);
        let header =
            PageHeader::read(&data).ok_or_else(|| StorageError::invalid_page("invalid page header"))?;
        Ok(Self { data, header })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn slot_count(&self) -> usize {
        self.header.in_use_count as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.header.page_type.is_leaf()
    }

    pub fn is_interior(&self) -> bool {
        self.header.page_type.is_interior()
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn parent(&self) -> Option<PageId> {
        self.header.parent()
    }

    pub fn set_parent(&mut self, page_id: Option<PageId>) {
        self.header.parent_page_id = page_id.map(|p| p.value()).unwrap_or(0);
        self.sync_header();
    }

    pub fn prev_leaf(&self) -> Option<PageId> {
        self.header.prev_leaf()
    }

    pub fn set_prev_leaf(&mut self, page_id: Option<PageId>) {
        self.header.prev_leaf_page_id = page_id.map(|p| p.value()).unwrap_or(0);
        self.sync_header();
    }

    pub fn next_leaf(&self) -> Option<PageId> {
        self.header.next_leaf()
    }

    pub fn set_next_leaf(&mut self, page_id: Option<PageId>) {
        self.header.next_leaf_page_id = page_id.map(|p| p.value()).unwrap_or(0);
        self.sync_header();
    }

    /// On an interior page, the subtree holding keys less than every
    /// separator in this page's slot table (the header's overflow word,
    /// repurposed; unused on leaves).
    pub fn leftmost_child(&self) -> Option<PageId> {
        (self.header.overflow_page_id != 0).then(|| PageId::new(self.header.overflow_page_id))
    }

    pub fn set_leftmost_child(&mut self, page_id: Option<PageId>) {
        self.header.overflow_page_id = page_id.map(|p| p.value()).unwrap_or(0);
        self.sync_header();
    }

    fn slot_pointer(&self, index: usize) -> u16 {
        let offset = self.header.slot_pointer_offset() + index * 2;
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn set_slot_pointer(&mut self, index: usize, pointer: u16) {
        let offset = self.header.slot_pointer_offset() + index * 2;
        self.data[offset..offset + 2].copy_from_slice(&pointer.to_be_bytes());
    }

    pub fn get_slot(&self, index: usize) -> Result<KeyInfoSlot> {
        if index >= self.slot_count() {
            return Err(StorageError::invalid_operation(format!(
                "slot index {} out of bounds (count: {})",
                index,
                self.slot_count()
            )));
        }
        let pointer = self.slot_pointer(index) as usize;
        let (slot, _) = KeyInfoSlot::decode(&self.data[pointer..], self.is_leaf())
            .ok_or_else(|| StorageError::corruption("failed to decode key-info slot"))?;
        Ok(slot)
    }

    pub fn get_all_slots(&self) -> Result<Vec<KeyInfoSlot>> {
        (0..self.slot_count()).map(|i| self.get_slot(i)).collect()
    }

    pub fn free_space(&self) -> usize {
        self.header.free_space().saturating_sub(2)
    }

    pub fn can_fit(&self, slot_size: usize) -> bool {
        self.free_space() >= slot_size
    }

    /// Insert `slot` at `position`, shifting later slots up by one.
    /// The caller (engine layer) has already determined `position`
    /// from a decoded-key comparison.
    pub fn insert_slot_at(&mut self, position: usize, slot: &KeyInfoSlot) -> Result<()> {
        let encoded = slot.encode();
        let slot_size = encoded.len();
        if !self.can_fit(slot_size) {
            return Err(StorageError::PageFull {
                page_id: PageId::INVALID,
                needed: slot_size + 2,
                available: self.free_space(),
            });
        }
        let new_content_start = self.header.content_start as usize - slot_size;
        self.data[new_content_start..new_content_start + slot_size].copy_from_slice(&encoded);

        let slot_count = self.slot_count();
        for i in (position..slot_count).rev() {
            let ptr = self.slot_pointer(i);
            self.set_slot_pointer(i + 1, ptr);
        }
        self.set_slot_pointer(position, new_content_start as u16);

        self.header.in_use_count += 1;
        self.header.content_start = new_content_start as u16;
        self.sync_header();
        Ok(())
    }

    pub fn delete_slot(&mut self, index: usize) -> Result<KeyInfoSlot> {
        if index >= self.slot_count() {
            return Err(StorageError::invalid_operation(format!(
                "delete index {} out of bounds",
                index
            )));
        }
        let slot = self.get_slot(index)?;
        let slot_count = self.slot_count();
        for i in index..slot_count - 1 {
            let ptr = self.slot_pointer(i + 1);
            self.set_slot_pointer(i, ptr);
        }
        self.header.in_use_count -= 1;
        self.sync_header();
        Ok(slot)
    }

    pub fn update_slot_at(&mut self, index: usize, slot: &KeyInfoSlot) -> Result<()> {
        let old = self.delete_slot(index)?;
        if self.insert_slot_at(index, slot).is_err() {
            // restore the old slot so the page is left consistent
            self.insert_slot_at(index, &old)?;
            return Err(StorageError::invalid_operation("updated slot does not fit"));
        }
        Ok(())
    }

    /// Split this page at `mid`, moving slots `[mid, count)` into a new
    /// page of the same type. The caller is responsible for leaf
    /// chaining and parent separator maintenance.
    pub fn split_at(&mut self, mid: usize) -> Result<SlottedPage> {
        let slot_count = self.slot_count();
        let mut new_page = if self.is_leaf() {
            SlottedPage::new_leaf()
        } else {
            SlottedPage::new_interior()
        };

        let moved: Vec<KeyInfoSlot> = (mid..slot_count).map(|i| self.get_slot(i)).collect::<Result<_>>()?;
        for (i, slot) in moved.iter().enumerate() {
            new_page.insert_slot_at(i, slot)?;
        }
        for i in (mid..slot_count).rev() {
            self.delete_slot(i)?;
        }
        self.defragment()?;
        Ok(new_page)
    }

    /// Compact the content area, discarding the fragmentation left by deletes.
    pub fn defragment(&mut self) -> Result<()> {
        let slots = self.get_all_slots()?;
        let mut fresh = if self.is_leaf() {
            SlottedPage::new_leaf()
        } else {
            SlottedPage::new_interior()
        };
        for (i, slot) in slots.iter().enumerate() {
            fresh.insert_slot_at(i, slot)?;
        }
        fresh.header.parent_page_id = self.header.parent_page_id;
        fresh.header.prev_leaf_page_id = self.header.prev_leaf_page_id;
        fresh.header.next_leaf_page_id = self.header.next_leaf_page_id;
        fresh.header.overflow_page_id = self.header.overflow_page_id;
        fresh.sync_header();
        self.data = fresh.data;
        self.header = fresh.header;
        Ok(())
    }

    fn sync_header(&mut self) {
        self.header.write(&mut self.data);
    }
}

impl Clone for SlottedPage {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            header: self.header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn slot(n: u8) -> KeyInfoSlot {
        KeyInfoSlot::new_leaf_inline(vec![n], ObjectId::new(PageId::new(1), n as u16))
    }

    #[test]
    fn test_new_leaf_page() {
        let page = SlottedPage::new_leaf();
        assert!(page.is_leaf());
        assert_eq!(page.slot_count(), 0);
        assert!(page.free_space() > 0);
    }

    #[test]
    fn test_insert_at_position_and_get() {
        let mut page = SlottedPage::new_leaf();
        page.insert_slot_at(0, &slot(5)).unwrap();
        page.insert_slot_at(0, &slot(1)).unwrap();
        page.insert_slot_at(1, &slot(3)).unwrap();

        assert_eq!(page.slot_count(), 3);
        assert_eq!(page.get_slot(0).unwrap().inline_key(), Some([1].as_slice()));
        assert_eq!(page.get_slot(1).unwrap().inline_key(), Some([3].as_slice()));
        assert_eq!(page.get_slot(2).unwrap().inline_key(), Some([5].as_slice()));
    }

    #[test]
    fn test_delete_slot() {
        let mut page = SlottedPage::new_leaf();
        page.insert_slot_at(0, &slot(1)).unwrap();
        page.insert_slot_at(1, &slot(2)).unwrap();
        page.insert_slot_at(2, &slot(3)).unwrap();

        let deleted = page.delete_slot(1).unwrap();
        assert_eq!(deleted.inline_key(), Some([2].as_slice()));
        assert_eq!(page.slot_count(), 2);
        assert_eq!(page.get_slot(1).unwrap().inline_key(), Some([3].as_slice()));
    }

    #[test]
    fn test_split_moves_upper_half() {
        let mut page = SlottedPage::new_leaf();
        for i in 0..10u8 {
            page.insert_slot_at(i as usize, &slot(i)).unwrap();
        }
        let new_page = page.split_at(5).unwrap();
        assert_eq!(page.slot_count(), 5);
        assert_eq!(new_page.slot_count(), 5);
        assert_eq!(new_page.get_slot(0).unwrap().inline_key(), Some([5].as_slice()));
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let mut page = SlottedPage::new_leaf();
        page.insert_slot_at(0, &slot(7)).unwrap();
        let bytes = page.as_bytes().to_vec();
        let restored = SlottedPage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.slot_count(), 1);
        assert_eq!(restored.get_slot(0).unwrap().inline_key(), Some([7].as_slice()));
    }

    #[test]
    fn test_leaf_chain_links() {
        let mut page = SlottedPage::new_leaf();
        page.set_next_leaf(Some(PageId::new(4)));
        assert_eq!(page.next_leaf(), Some(PageId::new(4)));
        assert!(page.prev_leaf().is_none());
    }
}
