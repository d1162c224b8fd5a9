//! Buffer pool implementation.
//!
//! The buffer pool manages a fixed number of in-memory page frames,
//! caching pages read from disk and writing dirty pages back. Node
//! pages (sorted key table) and area pages (unsorted value/OOB store)
//! share one physical file and one pool; the page type byte at the
//! front of every page's bytes says which representation to parse.

use crate::buffer::lru::LruCache;
use crate::error::{Result, StorageError};
use crate::page::{AreaPage, SlottedPage};
use crate::storage::DiskManager;
use crate::types::{PageId, PageType};
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Either physical page representation cached in a frame.
pub enum Page {
    Node(SlottedPage),
    Area(AreaPage),
}

impl Page {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let page_type =
            PageType::from_byte(bytes[0]).ok_or_else(|| StorageError::invalid_page("unknown page type byte"))?;
        if page_type.is_area() {
            Ok(Page::Area(AreaPage::from_bytes(bytes)?))
        } else {
            Ok(Page::Node(SlottedPage::from_bytes(bytes)?))
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            Page::Node(p) => p.as_bytes(),
            Page::Area(p) => p.as_bytes(),
        }
    }

    pub fn as_node(&self) -> Result<&SlottedPage> {
        match self {
            Page::Node(p) => Ok(p),
            Page::Area(_) => Err(StorageError::invalid_operation("expected a node page, found an area page")),
        }
    }

    pub fn as_node_mut(&mut self) -> Result<&mut SlottedPage> {
        match self {
            Page::Node(p) => Ok(p),
            Page::Area(_) => Err(StorageError::invalid_operation("expected a node page, found an area page")),
        }
    }

    pub fn as_area(&self) -> Result<&AreaPage> {
        match self {
            Page::Area(p) => Ok(p),
            Page::Node(_) => Err(StorageError::invalid_operation("expected an area page, found a node page")),
        }
    }

    pub fn as_area_mut(&mut self) -> Result<&mut AreaPage> {
        match self {
            Page::Area(p) => Ok(p),
            Page::Node(_) => Err(StorageError::invalid_operation("expected an area page, found a node page")),
        }
    }
}

/// Trait for buffer pool operations
pub trait BufferPool: Send + Sync {
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>>;
    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>>;
    fn new_page(&self, page_type: PageType) -> Result<(PageId, PageGuardMut<'_>)>;
    fn flush_page(&self, page_id: PageId) -> Result<()>;
    fn flush_all(&self) -> Result<()>;
    fn free_page(&self, page_id: PageId) -> Result<()>;
    fn page_count(&self) -> usize;
    fn capacity(&self) -> usize;
    fn root_page(&self) -> PageId;
    fn tree_depth(&self) -> u32;
    fn set_root_page(&self, page_id: PageId, depth: u32) -> Result<()>;
    /// First and last page of the leaf chain, for full forward/backward scans.
    fn leaf_range(&self) -> (PageId, PageId);
    fn set_leaf_range(&self, first: PageId, last: PageId) -> Result<()>;
    fn record_count(&self) -> u64;
    fn set_record_count(&self, count: u64) -> Result<()>;
}

struct BufferFrame {
    page: Page,
    dirty: bool,
    pin_count: u32,
}

impl BufferFrame {
    fn new(page: Page) -> Self {
        Self {
            page,
            dirty: false,
            pin_count: 0,
        }
    }
}

/// Buffer pool implementation
pub struct BufferPoolImpl {
    disk_manager: Arc<dyn DiskManager>,
    frames: RwLock<HashMap<PageId, Arc<RwLock<BufferFrame>>>>,
    lru: RwLock<LruCache>,
    capacity: usize,
}

impl BufferPoolImpl {
    pub fn new(disk_manager: Arc<dyn DiskManager>, capacity: usize) -> Self {
        Self {
            disk_manager,
            frames: RwLock::new(HashMap::with_capacity(capacity)),
            lru: RwLock::new(LruCache::new(capacity)),
            capacity,
        }
    }

    fn get_frame(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                let mut lru = self.lru.write();
                lru.access(page_id.value());
                return Ok(Arc::clone(frame));
            }
        }
        self.load_page(page_id)
    }

    fn load_page(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        let page_buf = self.disk_manager.read_page(page_id)?;
        let page = Page::from_bytes(page_buf.as_bytes())?;

        {
            let frames = self.frames.read();
            if frames.len() >= self.capacity {
                drop(frames);
                self.evict_one()?;
            }
        }

        let frame = Arc::new(RwLock::new(BufferFrame::new(page)));
        {
            let mut frames = self.frames.write();
            frames.insert(page_id, Arc::clone(&frame));
        }
        {
            let mut lru = self.lru.write();
            lru.access(page_id.value());
        }
        Ok(frame)
    }

    fn evict_one(&self) -> Result<()> {
        let mut lru = self.lru.write();
        loop {
            let page_id = match lru.pop_lru() {
                Some(id) => PageId::new(id),
                None => return Err(StorageError::BufferPoolExhausted),
            };

            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                let frame_guard = frame.read();
                if frame_guard.pin_count == 0 {
                    drop(frame_guard);
                    drop(frames);
                    self.flush_page(page_id)?;
                    let mut frames = self.frames.write();
                    frames.remove(&page_id);
                    debug!("evicted page {page_id} from buffer pool");
                    return Ok(());
                }
                lru.access(page_id.value());
            }
        }
    }
}

impl BufferPool for BufferPoolImpl {
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.get_frame(page_id)?;
        {
            let mut f = frame.write();
            f.pin_count += 1;
        }
        Ok(PageGuard {
            page_id,
            frame,
            pool: self,
        })
    }

    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>> {
        let frame = self.get_frame(page_id)?;
        {
            let mut f = frame.write();
            f.pin_count += 1;
            f.dirty = true;
        }
        Ok(PageGuardMut {
            page_id,
            frame,
            pool: self,
        })
    }

    fn new_page(&self, page_type: PageType) -> Result<(PageId, PageGuardMut<'_>)> {
        let page_id = self.disk_manager.allocate_page()?;

        let page = if page_type.is_area() {
            Page::Area(AreaPage::new(page_type))
        } else if page_type == PageType::InteriorTable {
            Page::Node(SlottedPage::new_interior())
        } else {
            Page::Node(SlottedPage::new_leaf())
        };
        let frame = Arc::new(RwLock::new(BufferFrame {
            page,
            dirty: true,
            pin_count: 1,
        }));

        {
            let mut frames = self.frames.write();
            frames.insert(page_id, Arc::clone(&frame));
        }
        {
            let mut lru = self.lru.write();
            lru.access(page_id.value());
        }

        Ok((
            page_id,
            PageGuardMut {
                page_id,
                frame,
                pool: self,
            },
        ))
    }

    fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frames = self.frames.read();
        if let Some(frame) = frames.get(&page_id) {
            let mut frame_guard = frame.write();
            if frame_guard.dirty {
                let data = frame_guard.page.as_bytes().to_vec();
                self.disk_manager.write_page(page_id, &data)?;
                frame_guard.dirty = false;
            }
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let frames = self.frames.read();
        for (&page_id, frame) in frames.iter() {
            let mut frame_guard = frame.write();
            if frame_guard.dirty {
                let data = frame_guard.page.as_bytes().to_vec();
                self.disk_manager.write_page(page_id, &data)?;
                frame_guard.dirty = false;
            }
        }
        self.disk_manager.sync()?;
        Ok(())
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        {
            let mut frames = self.frames.write();
            frames.remove(&page_id);
        }
        {
            let mut lru = self.lru.write();
            lru.remove(page_id.value());
        }
        self.disk_manager.deallocate_page(page_id)?;
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.disk_manager.header().page_count as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn root_page(&self) -> PageId {
        self.disk_manager.header().root_page
    }

    fn tree_depth(&self) -> u32 {
        self.disk_manager.header().tree_depth
    }

    fn set_root_page(&self, page_id: PageId, depth: u32) -> Result<()> {
        self.disk_manager.set_root_page(page_id, depth)
    }

    fn leaf_range(&self) -> (PageId, PageId) {
        let header = self.disk_manager.header();
        (header.first_leaf_page, header.last_leaf_page)
    }

    fn set_leaf_range(&self, first: PageId, last: PageId) -> Result<()> {
        self.disk_manager.set_leaf_range(first, last)
    }

    fn record_count(&self) -> u64 {
        self.disk_manager.header().record_count
    }

    fn set_record_count(&self, count: u64) -> Result<()> {
        self.disk_manager.set_record_count(count)
    }
}

/// RAII guard for read access to a page
pub struct PageGuard<'a> {
    page_id: PageId,
    frame: Arc<RwLock<BufferFrame>>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        let mut lru = self.pool.lru.write();
        lru.access(self.page_id.value());
    }
}

pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

pub struct PageGuardMut<'a> {
    page_id: PageId,
    frame: Arc<RwLock<BufferFrame>>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuardMut<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.write();
        guard.dirty = true;
        PageRefMut { guard }
    }

    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuardMut<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        let mut lru = self.pool.lru.write();
        lru.access(self.page_id.value());
    }
}

pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRefMut<'a> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

impl<'a> std::ops::DerefMut for PageRefMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::KeyInfoSlot;
    use crate::storage::DiskManagerImpl;
    use crate::types::ObjectId;
    use tempfile::tempdir;

    #[test]
    fn test_buffer_pool_new_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = Arc::new(DiskManagerImpl::open(&path, false)?);
        let pool = BufferPoolImpl::new(dm, 10);

        let (page_id, guard) = pool.new_page(PageType::LeafTable)?;
        assert_eq!(page_id, PageId::new(1));

        {
            let mut page = guard.write();
            let node = page.as_node_mut()?;
            node.insert_slot_at(
                0,
                &KeyInfoSlot::new_leaf_inline(b"key".to_vec(), ObjectId::new(PageId::new(2), 0)),
            )?;
        }

        pool.flush_all()?;
        Ok(())
    }

    #[test]
    fn test_buffer_pool_fetch() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = Arc::new(DiskManagerImpl::open(&path, false)?);
        let pool = BufferPoolImpl::new(dm, 10);

        let page_id = {
            let (page_id, guard) = pool.new_page(PageType::LeafTable)?;
            {
                let mut page = guard.write();
                let node = page.as_node_mut()?;
                node.insert_slot_at(
                    0,
                    &KeyInfoSlot::new_leaf_inline(b"hello".to_vec(), ObjectId::new(PageId::new(2), 0)),
                )?;
            }
            page_id
        };

        pool.flush_all()?;

        let guard = pool.fetch_page(page_id)?;
        let page = guard.read();
        let node = page.as_node()?;
        let slot = node.get_slot(0)?;
        assert_eq!(slot.inline_key(), Some(b"hello".as_slice()));
        Ok(())
    }

    #[test]
    fn test_buffer_pool_area_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = Arc::new(DiskManagerImpl::open(&path, false)?);
        let pool = BufferPoolImpl::new(dm, 10);

        let (page_id, guard) = pool.new_page(PageType::ValueArea)?;
        let area_id = {
            let mut page = guard.write();
            page.as_area_mut()?.insert(b"payload")?
        };
        drop(guard);
        pool.flush_all()?;

        let guard = pool.fetch_page(page_id)?;
        let page = guard.read();
        assert_eq!(page.as_area()?.get(area_id)?, b"payload");
        Ok(())
    }
}
