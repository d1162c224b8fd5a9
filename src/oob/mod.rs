//! Out-of-band object store (§4.4, §6.1, C5).
//!
//! Fields (or whole value tuples) too large to keep inline in a node
//! or value-area slot are chained across one or more `OobArea` pages.
//! Each chunk is tagged with an object type so the reader knows
//! whether to inflate it and whether more chunks follow:
//!
//! - `Normal`: one chunk, stored as-is.
//! - `Compressed`: one chunk, deflate-compressed.
//! - `Divided`: multiple chunks, stored as-is.
//! - `DividedCompressed`: multiple chunks, the reassembled payload is
//!   deflate-compressed as a whole (not chunk-by-chunk).
//!
//! Compression is applied only when it saves at least
//! `compression_min_saving` of the raw size (§4.4); otherwise the
//! object is stored uncompressed to avoid paying the inflate cost on
//! every read for a marginal win.

use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::types::{ObjectId, PageType, PAGE_SIZE};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ObjectKind {
    Normal = 1,
    Divided = 2,
    Compressed = 3,
    DividedCompressed = 4,
}

impl ObjectKind {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Self::Normal),
            2 => Ok(Self::Divided),
            3 => Ok(Self::Compressed),
            4 => Ok(Self::DividedCompressed),
            _ => Err(StorageError::corruption("unknown out-of-band object kind")),
        }
    }

    fn is_compressed(self) -> bool {
        matches!(self, Self::Compressed | Self::DividedCompressed)
    }

    fn is_divided(self) -> bool {
        matches!(self, Self::Divided | Self::DividedCompressed)
    }
}

/// Chunk prefix: kind(1) + total_len(4) + next(8, NONE if last).
const CHUNK_HEADER_SIZE: usize = 1 + 4 + 8;
/// Headroom an area page allocator needs beyond raw payload bytes.
const AREA_PAGE_OVERHEAD: usize = 32;
const CHUNK_CAPACITY: usize = PAGE_SIZE - AREA_PAGE_OVERHEAD - CHUNK_HEADER_SIZE;

fn compress(raw: &[u8], min_saving: f64) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).ok()?;
    let compressed = encoder.finish().ok()?;
    let saving = 1.0 - (compressed.len() as f64 / raw.len().max(1) as f64);
    if saving >= min_saving {
        Some(compressed)
    } else {
        None
    }
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::corruption(format!("out-of-band inflate failed: {e}")))?;
    Ok(out)
}

fn write_chunk(bytes: &[u8], kind: ObjectKind, total_len: u32, next: ObjectId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + bytes.len());
    buf.push(kind as u8);
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(&next.to_bytes());
    buf.extend_from_slice(bytes);
    buf
}

/// Store `raw` in the out-of-band store, returning the locator of its
/// first chunk. `min_saving` is the schema/engine's
/// `compression_min_saving` config.
pub fn store(pool: &dyn BufferPool, raw: &[u8], min_saving: f64) -> Result<ObjectId> {
    if raw.len() <= CHUNK_CAPACITY {
        let (kind, payload) = match compress(raw, min_saving) {
            Some(c) if c.len() <= CHUNK_CAPACITY => (ObjectKind::Compressed, c),
            _ => (ObjectKind::Normal, raw.to_vec()),
        };
        return store_single_chunk(pool, &payload, kind, raw.len() as u32, ObjectId::NONE);
    }

    // Divided: try compressing the whole payload first: if the
    // compressed form now fits a single chunk, store it as one
    // DividedCompressed chunk of one; otherwise chain raw chunks.
    if let Some(compressed) = compress(raw, min_saving) {
        if compressed.len() <= CHUNK_CAPACITY {
            return store_single_chunk(pool, &compressed, ObjectKind::DividedCompressed, raw.len() as u32, ObjectId::NONE);
        }
        return store_chain(pool, &compressed, ObjectKind::DividedCompressed, raw.len() as u32);
    }
    store_chain(pool, raw, ObjectKind::Divided, raw.len() as u32)
}

fn store_single_chunk(
    pool: &dyn BufferPool,
    payload: &[u8],
    kind: ObjectKind,
    total_len: u32,
    next: ObjectId,
) -> Result<ObjectId> {
    let chunk = write_chunk(payload, kind, total_len, next);
    let (page_id, guard) = pool.new_page(PageType::OobArea)?;
    let area_id = guard.write().as_area_mut()?.insert(&chunk)?;
    Ok(ObjectId::new(page_id, area_id))
}

/// Store `payload` split across as many chunks as needed, chained
/// tail-to-head so `store_single_chunk`'s `next` can be resolved
/// before each earlier chunk is written.
fn store_chain(pool: &dyn BufferPool, payload: &[u8], kind: ObjectKind, total_len: u32) -> Result<ObjectId> {
    let pieces: Vec<&[u8]> = payload.chunks(CHUNK_CAPACITY).collect();
    let mut next = ObjectId::NONE;
    for piece in pieces.into_iter().rev() {
        next = store_single_chunk(pool, piece, kind, total_len, next)?;
    }
    Ok(next)
}

/// Load and fully reassemble the object chained from `head`.
pub fn load(pool: &dyn BufferPool, head: ObjectId) -> Result<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut cursor = head;
    let mut kind = None;
    let mut total_len = 0u32;

    while !cursor.is_none() {
        let guard = pool.fetch_page(cursor.page_id)?;
        let page = guard.read();
        let bytes = page.as_area()?.get(cursor.area_id)?;
        let chunk_kind = ObjectKind::from_byte(bytes[0])?;
        let chunk_total_len = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
        let chunk_next = ObjectId::from_bytes(&bytes[5..13]);
        chunks.push(bytes[CHUNK_HEADER_SIZE..].to_vec());
        kind.get_or_insert(chunk_kind);
        total_len = chunk_total_len;
        cursor = chunk_next;
    }

    let kind = kind.ok_or_else(|| StorageError::corruption("empty out-of-band chain"))?;
    let mut assembled: Vec<u8> = chunks.into_iter().flatten().collect();
    if kind.is_compressed() {
        assembled = decompress(&assembled)?;
    }
    if !kind.is_divided() && assembled.len() as u32 != total_len {
        return Err(StorageError::corruption("out-of-band object length mismatch"));
    }
    Ok(assembled)
}

/// Delete every chunk in the chain rooted at `head`. Each chunk owns a
/// dedicated page (`store_single_chunk` never shares one across
/// objects), so every page in the chain is returned to the free list,
/// not just its area slot cleared.
pub fn delete(pool: &dyn BufferPool, head: ObjectId) -> Result<()> {
    let mut cursor = head;
    while !cursor.is_none() {
        let next = {
            let guard = pool.fetch_page_mut(cursor.page_id)?;
            let mut page = guard.write();
            let area = page.as_area_mut()?;
            let bytes = area.get(cursor.area_id)?.to_vec();
            let next = ObjectId::from_bytes(&bytes[5..13]);
            area.delete(cursor.area_id)?;
            next
        };
        pool.free_page(cursor.page_id)?;
        cursor = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::DiskManagerImpl;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pool() -> (Arc<BufferPoolImpl>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManagerImpl::open(&dir.path().join("t.db"), false).unwrap());
        (Arc::new(BufferPoolImpl::new(dm, 64)), dir)
    }

    #[test]
    fn test_small_object_roundtrip() {
        let (pool, _dir) = pool();
        let head = store(pool.as_ref(), b"hello world", 0.125).unwrap();
        assert_eq!(load(pool.as_ref(), head).unwrap(), b"hello world");
    }

    #[test]
    fn test_compressible_object_roundtrip() {
        let (pool, _dir) = pool();
        let raw = vec![b'a'; 5000];
        let head = store(pool.as_ref(), &raw, 0.125).unwrap();
        assert_eq!(load(pool.as_ref(), head).unwrap(), raw);
    }

    #[test]
    fn test_divided_object_roundtrip() {
        let (pool, _dir) = pool();
        let raw: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let head = store(pool.as_ref(), &raw, 0.99).unwrap();
        assert_eq!(load(pool.as_ref(), head).unwrap(), raw);
    }

    #[test]
    fn test_delete_clears_chain() {
        let (pool, _dir) = pool();
        let raw: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let head = store(pool.as_ref(), &raw, 0.99).unwrap();
        delete(pool.as_ref(), head).unwrap();
        assert!(load(pool.as_ref(), head).is_err());
    }
}
