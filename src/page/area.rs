//! Area-allocator page (§3.1 C2): unsorted object storage backing the
//! value store and the out-of-band store.
//!
//! Unlike a node page's key table, area pages have no sort invariant —
//! objects are placed wherever they fit and addressed by a stable
//! `area_id` (the index into this page's directory), which combined
//! with the page id forms an `ObjectId` locator. Deleting an object
//! tombstones its directory entry so the `area_id` of every other
//! object on the page stays valid; `defragment` reclaims the freed
//! content bytes without renumbering entries.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::PageType;

const AREA_HEADER_SIZE: usize = 5;
const DIR_ENTRY_SIZE: usize = 4;
const TOMBSTONE_LEN: u16 = u16::MAX;

pub struct AreaPage {
    data: PageBuf,
    page_type: PageType,
    area_count: u16,
    content_start: u16,
}

impl AreaPage {
    pub fn new(page_type: PageType) -> Self {
        debug_assert!(page_type.is_area());
        let mut page = Self {
            data: PageBuf::new(),
            page_type,
            area_count: 0,
            content_start: crate::types::PAGE_SIZE as u16,
        };
        page.sync_header();
        page
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data = PageBuf::from_bytes(bytes);
        let page_type = PageType::from_byte(data[0])
            .filter(|t| t.is_area())
            .ok_or_else(|| StorageError::invalid_page("not an area page"))?;
        let area_count = u16::from_be_bytes([data[1], data[2]]);
        let content_start = u16::from_be_bytes([data[3], data[4]]);
        Ok(Self {
            data,
            page_type,
            area_count,
            content_start,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn area_count(&self) -> u16 {
        self.area_count
    }

    fn dir_offset(&self, area_id: u16) -> usize {
        AREA_HEADER_SIZE + area_id as usize * DIR_ENTRY_SIZE
    }

    fn dir_end(&self) -> usize {
        self.dir_offset(self.area_count)
    }

    fn read_entry(&self, area_id: u16) -> Option<(u16, u16)> {
        if area_id >= self.area_count {
            return None;
        }
        let off = self.dir_offset(area_id);
        let entry_offset = u16::from_be_bytes([self.data[off], self.data[off + 1]]);
        let entry_len = u16::from_be_bytes([self.data[off + 2], self.data[off + 3]]);
        Some((entry_offset, entry_len))
    }

    fn write_entry(&mut self, area_id: u16, offset: u16, len: u16) {
        let off = self.dir_offset(area_id);
        self.data[off..off + 2].copy_from_slice(&offset.to_be_bytes());
        self.data[off + 2..off + 4].copy_from_slice(&len.to_be_bytes());
    }

    pub fn free_space(&self) -> usize {
        (self.content_start as usize).saturating_sub(self.dir_end())
    }

    /// Whether an object of `len` bytes fits, accounting for a possible
    /// new directory entry.
    pub fn can_fit(&self, len: usize) -> bool {
        self.free_space() >= len + DIR_ENTRY_SIZE
    }

    pub fn get(&self, area_id: u16) -> Result<&[u8]> {
        let (offset, len) = self
            .read_entry(area_id)
            .ok_or_else(|| StorageError::invalid_operation("area id out of bounds"))?;
        if len == TOMBSTONE_LEN {
            return Err(StorageError::invalid_operation("area id was deleted"));
        }
        Ok(&self.data[offset as usize..offset as usize + len as usize])
    }

    /// Insert `bytes`, reusing a tombstoned directory entry when one
    /// fits without a new allocation, or appending a fresh entry.
    pub fn insert(&mut self, bytes: &[u8]) -> Result<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(StorageError::bad_argument("area object exceeds 65535 bytes"));
        }
        let reuse = (0..self.area_count).find(|&id| self.read_entry(id) == Some((0, TOMBSTONE_LEN)));
        let area_id = match reuse {
            Some(id) => id,
            None => {
                if !self.can_fit(bytes.len()) {
                    return Err(StorageError::PageFull {
                        page_id: crate::types::PageId::INVALID,
                        needed: bytes.len() + DIR_ENTRY_SIZE,
                        available: self.free_space(),
                    });
                }
                let id = self.area_count;
                self.area_count += 1;
                id
            }
        };
        if reuse.is_some() && self.free_space() < bytes.len() {
            return Err(StorageError::PageFull {
                page_id: crate::types::PageId::INVALID,
                needed: bytes.len(),
                available: self.free_space(),
            });
        }
        let new_content_start = self.content_start as usize - bytes.len();
        self.data[new_content_start..new_content_start + bytes.len()].copy_from_slice(bytes);
        self.content_start = new_content_start as u16;
        self.write_entry(area_id, new_content_start as u16, bytes.len() as u16);
        self.sync_header();
        Ok(area_id)
    }

    pub fn delete(&mut self, area_id: u16) -> Result<()> {
        self.read_entry(area_id)
            .ok_or_else(|| StorageError::invalid_operation("area id out of bounds"))?;
        self.write_entry(area_id, 0, TOMBSTONE_LEN);
        self.sync_header();
        Ok(())
    }

    /// Rebuild the content area, discarding tombstoned bytes and
    /// fragmentation while preserving every live `area_id`.
    pub fn defragment(&mut self) -> Result<()> {
        let live: Vec<(u16, Vec<u8>)> = (0..self.area_count)
            .filter_map(|id| {
                self.read_entry(id).and_then(|(_, len)| {
                    if len == TOMBSTONE_LEN {
                        None
                    } else {
                        Some((id, self.get(id).unwrap().to_vec()))
                    }
                })
            })
            .collect();

        let mut fresh = Self::new(self.page_type);
        fresh.area_count = self.area_count;
        fresh.sync_header();
        for id in 0..self.area_count {
            fresh.write_entry(id, 0, TOMBSTONE_LEN);
        }
        for (id, bytes) in live {
            let new_start = fresh.content_start as usize - bytes.len();
            fresh.data[new_start..new_start + bytes.len()].copy_from_slice(&bytes);
            fresh.content_start = new_start as u16;
            fresh.write_entry(id, new_start as u16, bytes.len() as u16);
        }
        fresh.sync_header();
        self.data = fresh.data;
        self.content_start = fresh.content_start;
        Ok(())
    }

    fn sync_header(&mut self) {
        self.data[0] = self.page_type as u8;
        self.data[1..3].copy_from_slice(&self.area_count.to_be_bytes());
        self.data[3..5].copy_from_slice(&self.content_start.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut page = AreaPage::new(PageType::ValueArea);
        let id1 = page.insert(b"hello").unwrap();
        let id2 = page.insert(b"world").unwrap();
        assert_eq!(page.get(id1).unwrap(), b"hello");
        assert_eq!(page.get(id2).unwrap(), b"world");
    }

    #[test]
    fn test_delete_tombstones_and_reuses() {
        let mut page = AreaPage::new(PageType::OobArea);
        let id1 = page.insert(b"aaaa").unwrap();
        page.delete(id1).unwrap();
        assert!(page.get(id1).is_err());

        let id2 = page.insert(b"bb").unwrap();
        assert_eq!(id2, id1, "deleted slot should be reused before growing the directory");
        assert_eq!(page.area_count(), 1);
    }

    #[test]
    fn test_defragment_preserves_live_ids() {
        let mut page = AreaPage::new(PageType::ValueArea);
        let id1 = page.insert(b"keep").unwrap();
        let id2 = page.insert(b"drop").unwrap();
        page.delete(id2).unwrap();
        page.defragment().unwrap();
        assert_eq!(page.get(id1).unwrap(), b"keep");
    }

    #[test]
    fn test_roundtrip_bytes() {
        let mut page = AreaPage::new(PageType::ValueArea);
        page.insert(b"payload").unwrap();
        let bytes = page.as_bytes().to_vec();
        let restored = AreaPage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.get(0).unwrap(), b"payload");
    }
}
