//! HeapFile manager with buffer pool integration.
//!
//! All page I/O is routed through the buffer manager. Pages are pinned,
//! modified in place, and unpinned dirty; writeback happens lazily on
//! eviction or flush.

use crate::bufmgr::BufferManager;
use crate::heap::page::HeapPage;
use crate::heap::scan::RelationScan;
use crate::record::RecordId;
use alder_common::page::{PageId, PAGE_SIZE};
use alder_common::{AlderError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Magic number identifying a heap file header page ("ALDR").
const HEAP_MAGIC: u32 = 0x414C_4452;

/// Heap file format version.
const HEAP_VERSION: u32 = 1;

/// Page number of the header page.
const HEADER_PAGE_NUM: u32 = 0;

/// A heap file of fixed-layout records.
///
/// Page 0 holds the file header; records live on pages 1 and up, so a
/// record address never carries page number 0. Records are append-only
/// and all share the length fixed at file creation.
pub struct HeapFile {
    /// Buffer manager for page access.
    buf: Arc<BufferManager>,
    /// File ID assigned by the disk manager.
    file_id: u32,
    /// File name (the relation name).
    name: String,
    /// Fixed record length in bytes.
    record_len: usize,
    /// Cached record count (mirrored in the header page).
    record_count: u64,
    /// Page the next append will try first (0 = none yet).
    last_page_hint: u32,
}

impl HeapFile {
    /// Opens or creates a heap file for the named relation.
    ///
    /// An existing file is validated against `record_len`; a fresh file
    /// gets a header page written.
    pub fn open(buf: Arc<BufferManager>, name: &str, record_len: usize) -> Result<HeapFile> {
        if record_len == 0 || record_len > HeapPage::MAX_RECORD_LEN {
            return Err(AlderError::RecordTooLarge {
                size: record_len,
                max: HeapPage::MAX_RECORD_LEN,
            });
        }

        let existed = buf.disk().exists(name);
        let file_id = buf.disk().open_file(name)?;

        let record_count = if existed {
            let page_id = PageId::new(file_id, HEADER_PAGE_NUM);
            let frame = buf.fetch_page(page_id)?;
            let header = {
                let data = frame.read_data();
                read_header(&data[..])
            };
            buf.unpin_page(page_id, false);

            if header.magic != HEAP_MAGIC || header.version != HEAP_VERSION {
                return Err(AlderError::Corrupted(format!(
                    "bad heap header in file {}",
                    name
                )));
            }
            if header.record_len as usize != record_len {
                return Err(AlderError::RecordLenMismatch {
                    expected: header.record_len as usize,
                    actual: record_len,
                });
            }
            header.record_count
        } else {
            let (page_id, frame) = buf.alloc_page(file_id)?;
            debug_assert_eq!(page_id.page_num, HEADER_PAGE_NUM);
            {
                let mut data = frame.write_data();
                write_header(
                    &mut data[..],
                    &HeapHeader {
                        magic: HEAP_MAGIC,
                        version: HEAP_VERSION,
                        record_len: record_len as u32,
                        record_count: 0,
                    },
                );
            }
            buf.unpin_page(page_id, true);
            0
        };

        Ok(HeapFile {
            buf,
            file_id,
            name: name.to_string(),
            record_len,
            record_count,
            last_page_hint: 0,
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the fixed record length.
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Returns the number of records in the file.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Returns the buffer manager this file runs on.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buf
    }

    /// Appends a record and returns its address.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        if record.len() != self.record_len {
            return Err(AlderError::RecordLenMismatch {
                expected: self.record_len,
                actual: record.len(),
            });
        }

        // Try the page the previous append landed on
        if self.last_page_hint != HEADER_PAGE_NUM {
            let page_id = PageId::new(self.file_id, self.last_page_hint);
            let frame = self.buf.fetch_page(page_id)?;
            let inserted = {
                let mut data = frame.write_data();
                HeapPage::insert_record(&mut data[..], record)
            };
            match inserted {
                Ok(slot) => {
                    self.buf.unpin_page(page_id, true);
                    self.bump_record_count()?;
                    return Ok(RecordId::new(page_id.page_num, slot));
                }
                Err(AlderError::PageFull) => {
                    self.buf.unpin_page(page_id, false);
                }
                Err(e) => {
                    self.buf.unpin_page(page_id, false);
                    return Err(e);
                }
            }
        }

        // Start a fresh data page
        let (page_id, frame) = self.buf.alloc_page(self.file_id)?;
        let inserted = {
            let mut data = frame.write_data();
            HeapPage::init(&mut data[..]);
            HeapPage::insert_record(&mut data[..], record)
        };
        let slot = match inserted {
            Ok(slot) => slot,
            Err(e) => {
                self.buf.unpin_page(page_id, false);
                return Err(e);
            }
        };
        self.buf.unpin_page(page_id, true);

        self.last_page_hint = page_id.page_num;
        self.bump_record_count()?;
        Ok(RecordId::new(page_id.page_num, slot))
    }

    /// Retrieves a record by its address.
    ///
    /// Returns None for addresses pointing past the file or at absent
    /// slots.
    pub fn record(&self, rid: RecordId) -> Result<Option<Bytes>> {
        if rid.is_null() {
            return Ok(None);
        }

        let page_id = PageId::new(self.file_id, rid.page_num);
        let frame = match self.buf.fetch_page(page_id) {
            Ok(frame) => frame,
            Err(AlderError::PageOutOfBounds { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let record = {
            let data = frame.read_data();
            HeapPage::record(&data[..], rid.slot).map(Bytes::copy_from_slice)
        };
        self.buf.unpin_page(page_id, false);

        Ok(record)
    }

    /// Starts a sequential scan over all records in physical order.
    pub fn scan(&self) -> Result<RelationScan> {
        let num_pages = self.buf.disk().num_pages(self.file_id)?;
        Ok(RelationScan::new(self.buf.clone(), self.file_id, num_pages))
    }

    /// Flushes all dirty pages of this file to disk.
    pub fn flush(&self) -> Result<()> {
        self.buf.flush_file(self.file_id)
    }

    /// Updates the cached and persisted record count.
    fn bump_record_count(&mut self) -> Result<()> {
        self.record_count += 1;

        let page_id = PageId::new(self.file_id, HEADER_PAGE_NUM);
        let frame = self.buf.fetch_page(page_id)?;
        {
            let mut data = frame.write_data();
            data[12..20].copy_from_slice(&self.record_count.to_le_bytes());
        }
        self.buf.unpin_page(page_id, true);
        Ok(())
    }
}

/// Decoded heap file header.
struct HeapHeader {
    magic: u32,
    version: u32,
    record_len: u32,
    record_count: u64,
}

fn read_header(data: &[u8]) -> HeapHeader {
    HeapHeader {
        magic: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        version: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        record_len: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        record_count: u64::from_le_bytes([
            data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
        ]),
    }
}

fn write_header(data: &mut [u8], header: &HeapHeader) {
    debug_assert_eq!(data.len(), PAGE_SIZE);
    data[0..4].copy_from_slice(&header.magic.to_le_bytes());
    data[4..8].copy_from_slice(&header.version.to_le_bytes());
    data[8..12].copy_from_slice(&header.record_len.to_le_bytes());
    data[12..20].copy_from_slice(&header.record_count.to_le_bytes());
}
