//! Disk manager for page-level file I/O.

use alder_common::page::{PageId, PAGE_SIZE};
use alder_common::{AlderError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages to named data files.
///
/// Files are opened by name (relation files carry the relation name,
/// index files are named `"{relation}.{attr_byte_offset}"`) and addressed
/// afterwards through a dense process-local `file_id`.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file state.
    inner: Mutex<DiskManagerInner>,
}

struct DiskManagerInner {
    /// File IDs keyed by file name.
    by_name: HashMap<String, u32>,
    /// Open file handles keyed by file_id.
    files: HashMap<u32, FileHandle>,
    /// Next file ID to hand out.
    next_file_id: u32,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(DiskManagerInner {
                by_name: HashMap::new(),
                files: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the path for a named file.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with this name is present on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Opens or creates a named data file and returns its file ID.
    ///
    /// Opening the same name twice returns the same ID.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();

        if let Some(&file_id) = inner.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.by_name.insert(name.to_string(), file_id);
        inner.files.insert(file_id, FileHandle { file, num_pages });

        Ok(file_id)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| AlderError::FileNotOpen(format!("file {}", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(AlderError::PageOutOfBounds {
                file_id: page_id.file_id,
                page_num: page_id.page_num,
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    ///
    /// `data` must be exactly one page long.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);

        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| AlderError::FileNotOpen(format!("file {}", page_id.file_id)))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the specified file.
    ///
    /// The page is zero-filled on disk. Page numbers are dense from 0 and
    /// monotonically increasing.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or_else(|| AlderError::FileNotOpen(format!("file {}", file_id)))?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or_else(|| AlderError::FileNotOpen(format!("file {}", file_id)))?;

        Ok(handle.num_pages)
    }

    /// Syncs a single file to disk.
    pub fn flush(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or_else(|| AlderError::FileNotOpen(format!("file {}", file_id)))?;

        handle.file.sync_all()?;
        Ok(())
    }

    /// Syncs all open files to disk.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.inner.lock();
        for handle in inner.files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a named data file, closing it first if open.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(file_id) = inner.by_name.remove(name) {
            if let Some(handle) = inner.files.remove(&file_id) {
                handle.file.sync_all()?;
            }
        }
        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}
