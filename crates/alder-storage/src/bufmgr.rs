//! Buffer manager: the paging interface storage components program against.
//!
//! Pairs the in-memory frame pool with the disk manager. Callers pin
//! pages via [`fetch_page`]/[`alloc_page`], access the bytes through the
//! returned frame, and release with [`unpin_page`], reporting whether the
//! frame now diverges from disk. Dirty pages displaced by eviction are
//! written back here, transparently.
//!
//! [`fetch_page`]: BufferManager::fetch_page
//! [`alloc_page`]: BufferManager::alloc_page
//! [`unpin_page`]: BufferManager::unpin_page

use crate::disk::DiskManager;
use alder_buffer::{BufferFrame, BufferPool};
use alder_common::page::PageId;
use alder_common::{AlderError, Result};
use std::sync::Arc;

/// Buffer manager for page access with pin/unpin discipline.
///
/// Every page returned by [`fetch_page`](Self::fetch_page) or
/// [`alloc_page`](Self::alloc_page) holds one pin that the caller must
/// release with [`unpin_page`](Self::unpin_page); pinned frames are never
/// evicted, so the frame reference stays valid until the pin is dropped.
pub struct BufferManager {
    /// Disk manager for page I/O.
    disk: Arc<DiskManager>,
    /// Frame pool for page caching.
    pool: Arc<BufferPool>,
}

impl BufferManager {
    /// Creates a new buffer manager over the given disk manager and pool.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Returns the underlying frame pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Allocates a new page in the given file and pins it.
    ///
    /// The frame is zero-filled, matching the newly extended file region.
    pub fn alloc_page(&self, file_id: u32) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame, evicted) = self.pool.new_page(page_id)?;

        if let Some(evicted_page) = evicted {
            if let Err(e) = self.disk.write_page(evicted_page.page_id, &*evicted_page.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }

        Ok((page_id, frame))
    }

    /// Pins an existing page, reading it from disk on a pool miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;

        if let Some(evicted_page) = evicted {
            if let Err(e) = self.disk.write_page(evicted_page.page_id, &*evicted_page.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }

        Ok(frame)
    }

    /// Returns the frame of a page the caller already holds a pin on,
    /// without taking another pin.
    pub fn pinned_frame(&self, page_id: PageId) -> Result<&BufferFrame> {
        self.pool
            .pinned_frame(page_id)
            .ok_or_else(|| AlderError::Corrupted(format!("pinned page {} not resident", page_id)))
    }

    /// Releases one pin; if `dirty`, marks the frame for eventual writeback.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) {
        self.pool.unpin_page(page_id, dirty);
    }

    /// Writes all dirty frames of a file to disk and syncs the file.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        self.pool
            .flush_file(file_id, |page_id, data| self.disk.write_page(page_id, data))?;
        self.disk.flush(file_id)
    }

    /// Returns the number of pages of a file currently pinned in the pool.
    pub fn pinned_pages(&self, file_id: u32) -> usize {
        self.pool.pinned_pages_in_file(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use alder_buffer::BufferPoolConfig;
    use alder_common::page::PAGE_SIZE;
    use tempfile::tempdir;

    fn create_test_bufmgr(num_frames: usize) -> (BufferManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let disk = Arc::new(DiskManager::new(config).unwrap());
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }));
        (BufferManager::new(disk, pool), dir)
    }

    #[test]
    fn test_alloc_page_pins_zeroed_frame() {
        let (buf, _dir) = create_test_bufmgr(10);
        let file_id = buf.disk().open_file("data").unwrap();

        let (page_id, frame) = buf.alloc_page(file_id).unwrap();
        assert_eq!(page_id.page_num, 0);
        assert!(frame.is_pinned());
        assert!(frame.read_data().iter().all(|&b| b == 0));

        buf.unpin_page(page_id, false);
        assert_eq!(buf.pinned_pages(file_id), 0);
    }

    #[test]
    fn test_fetch_page_roundtrip_through_disk() {
        let (buf, _dir) = create_test_bufmgr(10);
        let file_id = buf.disk().open_file("data").unwrap();

        let (page_id, frame) = buf.alloc_page(file_id).unwrap();
        frame.write_data()[0] = 0x5A;
        buf.unpin_page(page_id, true);
        buf.flush_file(file_id).unwrap();

        // Force the page out of the pool and fetch it back from disk.
        assert!(buf.pool().delete_page(page_id));
        let frame = buf.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 0x5A);
        buf.unpin_page(page_id, false);
    }

    #[test]
    fn test_eviction_writes_back_dirty_pages() {
        let (buf, _dir) = create_test_bufmgr(2);
        let file_id = buf.disk().open_file("data").unwrap();

        // Dirty two pages, then push them out with two more allocations.
        for i in 0..4 {
            let (page_id, frame) = buf.alloc_page(file_id).unwrap();
            frame.write_data()[0] = i as u8 + 1;
            buf.unpin_page(page_id, true);
        }
        buf.flush_file(file_id).unwrap();

        for i in 0..4u32 {
            let page_id = PageId::new(file_id, i);
            if buf.pool().contains(page_id) {
                buf.pool().delete_page(page_id);
            }
            let frame = buf.fetch_page(page_id).unwrap();
            assert_eq!(frame.read_data()[0], i as u8 + 1);
            buf.unpin_page(page_id, false);
        }
    }

    #[test]
    fn test_pinned_frame_requires_residency() {
        let (buf, _dir) = create_test_bufmgr(10);
        let file_id = buf.disk().open_file("data").unwrap();

        let (page_id, _) = buf.alloc_page(file_id).unwrap();
        assert!(buf.pinned_frame(page_id).is_ok());
        buf.unpin_page(page_id, false);

        let absent = PageId::new(file_id, 99);
        assert!(matches!(
            buf.pinned_frame(absent),
            Err(AlderError::Corrupted(_))
        ));
    }

    #[test]
    fn test_flush_file_persists_dirty_frames() {
        let (buf, _dir) = create_test_bufmgr(10);
        let file_id = buf.disk().open_file("data").unwrap();

        let (page_id, frame) = buf.alloc_page(file_id).unwrap();
        {
            let mut data = frame.write_data();
            data[PAGE_SIZE - 1] = 0x77;
        }
        buf.unpin_page(page_id, true);
        buf.flush_file(file_id).unwrap();

        let on_disk = buf.disk().read_page(page_id).unwrap();
        assert_eq!(on_disk[PAGE_SIZE - 1], 0x77);
    }

    #[test]
    fn test_pinned_pages_counts_per_file() {
        let (buf, _dir) = create_test_bufmgr(10);
        let f0 = buf.disk().open_file("a").unwrap();
        let f1 = buf.disk().open_file("b").unwrap();

        let (p0, _) = buf.alloc_page(f0).unwrap();
        let (p1, _) = buf.alloc_page(f1).unwrap();

        assert_eq!(buf.pinned_pages(f0), 1);
        assert_eq!(buf.pinned_pages(f1), 1);

        buf.unpin_page(p0, false);
        buf.unpin_page(p1, false);
        assert_eq!(buf.pinned_pages(f0), 0);
        assert_eq!(buf.pinned_pages(f1), 0);
    }
}
