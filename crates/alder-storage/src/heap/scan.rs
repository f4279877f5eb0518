//! Sequential scan over the records of a heap file.

use crate::bufmgr::BufferManager;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use alder_common::page::PageId;
use alder_common::{AlderError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Scanner yielding every record of a relation in physical order.
///
/// Each call pins the current page, copies the record out, and unpins
/// before returning; no pin survives between calls. `Ok(None)` signals
/// end-of-relation.
pub struct RelationScan {
    /// Buffer manager for page access.
    buf: Arc<BufferManager>,
    /// File being scanned.
    file_id: u32,
    /// Page count captured when the scan started.
    num_pages: u32,
    /// Current page (data pages start at 1).
    page_num: u32,
    /// Next slot to return from the current page.
    slot: u16,
}

impl RelationScan {
    pub(crate) fn new(buf: Arc<BufferManager>, file_id: u32, num_pages: u32) -> Self {
        Self {
            buf,
            file_id,
            num_pages,
            page_num: 1,
            slot: 0,
        }
    }

    /// Returns the next record and its address, or `Ok(None)` at
    /// end-of-relation.
    pub fn next(&mut self) -> Result<Option<(RecordId, Bytes)>> {
        loop {
            if self.page_num >= self.num_pages {
                return Ok(None);
            }

            let page_id = PageId::new(self.file_id, self.page_num);
            let frame = self.buf.fetch_page(page_id)?;

            let record = {
                let data = frame.read_data();
                if self.slot < HeapPage::slot_count(&data[..]) {
                    match HeapPage::record(&data[..], self.slot) {
                        Some(bytes) => Some(Bytes::copy_from_slice(bytes)),
                        None => {
                            drop(data);
                            self.buf.unpin_page(page_id, false);
                            return Err(AlderError::Corrupted(format!(
                                "heap page {} slot {} unreadable",
                                page_id, self.slot
                            )));
                        }
                    }
                } else {
                    None
                }
            };
            self.buf.unpin_page(page_id, false);

            match record {
                Some(bytes) => {
                    let rid = RecordId::new(self.page_num, self.slot);
                    self.slot += 1;
                    return Ok(Some((rid, bytes)));
                }
                None => {
                    // Page exhausted, move to the next one
                    self.page_num += 1;
                    self.slot = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use crate::heap::HeapFile;
    use alder_buffer::{BufferPool, BufferPoolConfig};
    use tempfile::tempdir;

    fn create_test_heap(record_len: usize) -> (HeapFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let disk = Arc::new(DiskManager::new(config).unwrap());
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 64 }));
        let buf = Arc::new(BufferManager::new(disk, pool));
        let heap = HeapFile::open(buf, "scan.tbl", record_len).unwrap();
        (heap, dir)
    }

    #[test]
    fn test_scan_empty_relation() {
        let (heap, _dir) = create_test_heap(16);
        let mut scan = heap.scan().unwrap();
        assert!(scan.next().unwrap().is_none());
    }

    #[test]
    fn test_scan_yields_all_records_in_order() {
        let (mut heap, _dir) = create_test_heap(16);

        let mut expected = Vec::new();
        for i in 0..50u32 {
            let mut record = [0u8; 16];
            record[0..4].copy_from_slice(&i.to_le_bytes());
            let rid = heap.append(&record).unwrap();
            expected.push((rid, i));
        }

        let mut scan = heap.scan().unwrap();
        let mut seen = Vec::new();
        while let Some((rid, record)) = scan.next().unwrap() {
            let value = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            seen.push((rid, value));
        }

        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_crosses_page_boundaries() {
        // Large records force multiple data pages
        let (mut heap, _dir) = create_test_heap(1024);

        for i in 0..12u32 {
            let mut record = [0u8; 1024];
            record[0..4].copy_from_slice(&i.to_le_bytes());
            heap.append(&record).unwrap();
        }

        let mut scan = heap.scan().unwrap();
        let mut count = 0;
        let mut pages = std::collections::HashSet::new();
        while let Some((rid, _)) = scan.next().unwrap() {
            pages.insert(rid.page_num);
            count += 1;
        }

        assert_eq!(count, 12);
        assert!(pages.len() > 1);
        assert!(!pages.contains(&0));
    }

    #[test]
    fn test_scan_holds_no_pins_between_calls() {
        let (mut heap, _dir) = create_test_heap(16);
        for i in 0..5u32 {
            let mut record = [0u8; 16];
            record[0..4].copy_from_slice(&i.to_le_bytes());
            heap.append(&record).unwrap();
        }

        let file_id = heap.file_id();
        let buf = heap.buffer_manager().clone();
        let mut scan = heap.scan().unwrap();
        while let Some(_) = scan.next().unwrap() {
            assert_eq!(buf.pinned_pages(file_id), 0);
        }
        assert_eq!(buf.pinned_pages(file_id), 0);
    }
}
