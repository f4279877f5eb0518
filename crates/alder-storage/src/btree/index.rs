//! B+ tree index file: lifecycle and insertion engine.

use crate::btree::node::{
    encode_relation_name, InnerMut, InnerView, LeafMut, LeafView, MetaMut, MetaView, INNER_FANOUT,
    LEAF_FANOUT,
};
use crate::btree::scan::ScanState;
use crate::bufmgr::BufferManager;
use crate::heap::HeapFile;
use crate::record::RecordId;
use alder_common::page::{PageId, PAGE_SIZE};
use alder_common::types::AttrType;
use alder_common::{AlderError, Result};
use alder_buffer::BufferFrame;
use std::sync::Arc;

/// Page number of the meta page. Page 0 is allocated but never
/// referenced, so 0 stays free as the "no page" sentinel.
const META_PAGE_NUM: u32 = 1;

/// A pinned page that releases itself on every exit path.
///
/// Dirtiness is recorded by [`data_mut`](Self::data_mut); dropping the
/// pin unpins with the recorded flag. [`detach`](Self::detach) hands the
/// pin over to the caller (the scan keeps its current leaf this way).
pub(crate) struct PagePin<'a> {
    buf: &'a BufferManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: bool,
    active: bool,
}

impl<'a> PagePin<'a> {
    /// Pins an existing page.
    pub(crate) fn fetch(buf: &'a BufferManager, page_id: PageId) -> Result<Self> {
        let frame = buf.fetch_page(page_id)?;
        Ok(Self {
            buf,
            frame,
            page_id,
            dirty: false,
            active: true,
        })
    }

    /// Allocates a fresh zero-filled page and pins it.
    pub(crate) fn alloc(buf: &'a BufferManager, file_id: u32) -> Result<Self> {
        let (page_id, frame) = buf.alloc_page(file_id)?;
        Ok(Self {
            buf,
            frame,
            page_id,
            dirty: false,
            active: true,
        })
    }

    /// Adopts a pin the caller already holds (the scan's current leaf).
    pub(crate) fn attach(buf: &'a BufferManager, page_id: PageId) -> Result<Self> {
        let frame = buf.pinned_frame(page_id)?;
        Ok(Self {
            buf,
            frame,
            page_id,
            dirty: false,
            active: true,
        })
    }

    pub(crate) fn page_num(&self) -> u32 {
        self.page_id.page_num
    }

    /// Read access to the page bytes.
    pub(crate) fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Write access to the page bytes; the page will unpin dirty.
    pub(crate) fn data_mut(&mut self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty = true;
        self.frame.write_data()
    }

    /// Consumes the guard without releasing the pin, returning the page
    /// number. The caller now owns the pin.
    pub(crate) fn detach(mut self) -> u32 {
        self.active = false;
        self.page_id.page_num
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        if self.active {
            self.buf.unpin_page(self.page_id, self.dirty);
        }
    }
}

/// A separator and new right sibling produced by a split, to be placed
/// into the parent node.
struct SplitEntry {
    key: i32,
    page_num: u32,
}

/// An open B+ tree index over one integer attribute of a relation.
///
/// The index file is named `"{relation}.{attr_byte_offset}"`. Opening a
/// missing file creates it and bulk-loads every record of the relation;
/// opening an existing file validates its meta page against the caller's
/// arguments.
pub struct IndexFile {
    /// Buffer manager for page access.
    pub(crate) buf: Arc<BufferManager>,
    /// File ID of the index file.
    pub(crate) file_id: u32,
    /// Index file name.
    index_name: String,
    /// Page number of the meta page.
    header_page_num: u32,
    /// Page number of the current root.
    pub(crate) root_page_num: u32,
    /// Page number the root had when the file was created. While the
    /// root still equals it, the root is a leaf.
    pub(crate) initial_root_page_num: u32,
    /// Byte offset of the indexed attribute inside each record.
    attr_byte_offset: usize,
    /// Type of the indexed attribute.
    attr_type: AttrType,
    /// Range scan state; `Active` holds exactly one pinned leaf.
    pub(crate) scan: ScanState,
}

impl IndexFile {
    /// Returns the on-disk file name for an index over the given
    /// relation and attribute offset.
    pub fn file_name(relation: &str, attr_byte_offset: usize) -> String {
        format!("{}.{}", relation, attr_byte_offset)
    }

    /// Opens the index for `relation` over the attribute at
    /// `attr_byte_offset`, creating and bulk-building it if the index
    /// file does not exist yet.
    ///
    /// Fails with `BadIndexInfo` if an existing file's meta page does not
    /// match the arguments, and with `UnsupportedType` for non-integer
    /// attributes.
    pub fn open(
        buf: Arc<BufferManager>,
        relation: &HeapFile,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<IndexFile> {
        if attr_type != AttrType::Integer {
            return Err(AlderError::UnsupportedType(attr_type.to_string()));
        }
        if attr_byte_offset + std::mem::size_of::<i32>() > relation.record_len() {
            return Err(AlderError::AttrOutOfBounds {
                offset: attr_byte_offset,
                record_len: relation.record_len(),
            });
        }

        let index_name = Self::file_name(relation.name(), attr_byte_offset);
        let existed = buf.disk().exists(&index_name);
        let file_id = buf.disk().open_file(&index_name)?;

        if existed {
            let root_page_num = {
                let pin = PagePin::fetch(&buf, PageId::new(file_id, META_PAGE_NUM))?;
                let data = pin.data();
                let meta = MetaView::new(&data[..]);
                if meta.relation_name() != encode_relation_name(relation.name())
                    || meta.attr_byte_offset() != attr_byte_offset
                    || meta.attr_type() != attr_type.as_u32()
                {
                    return Err(AlderError::BadIndexInfo(index_name));
                }
                meta.root_page_no()
            };

            Ok(IndexFile {
                buf,
                file_id,
                index_name,
                header_page_num: META_PAGE_NUM,
                root_page_num,
                initial_root_page_num: META_PAGE_NUM + 1,
                attr_byte_offset,
                attr_type,
                scan: ScanState::Inactive,
            })
        } else {
            let root_page_num;
            {
                // Deterministic creation order: reserved 0, meta 1, root 2
                let reserved = PagePin::alloc(&buf, file_id)?;
                debug_assert_eq!(reserved.page_num(), 0);
                drop(reserved);

                let mut meta_pin = PagePin::alloc(&buf, file_id)?;
                debug_assert_eq!(meta_pin.page_num(), META_PAGE_NUM);
                let mut root_pin = PagePin::alloc(&buf, file_id)?;
                root_page_num = root_pin.page_num();

                {
                    let mut data = meta_pin.data_mut();
                    let mut meta = MetaMut::new(&mut data[..]);
                    meta.set_relation_name(relation.name());
                    meta.set_attr_byte_offset(attr_byte_offset);
                    meta.set_attr_type(attr_type.as_u32());
                    meta.set_root_page_no(root_page_num);
                }
                {
                    // Initial root is an empty leaf with no right sibling
                    let mut data = root_pin.data_mut();
                    LeafMut::new(&mut data[..]).set_right_sibling(0);
                }
            }

            let mut index = IndexFile {
                buf,
                file_id,
                index_name,
                header_page_num: META_PAGE_NUM,
                root_page_num,
                initial_root_page_num: root_page_num,
                attr_byte_offset,
                attr_type,
                scan: ScanState::Inactive,
            };
            index.build_from(relation)?;
            Ok(index)
        }
    }

    /// Returns the index file name.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns the file ID of the index file.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the page number of the current root.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    /// Returns the page number the root had at creation.
    pub fn initial_root_page_num(&self) -> u32 {
        self.initial_root_page_num
    }

    /// Returns true while the root is still the initial leaf.
    pub fn root_is_leaf(&self) -> bool {
        self.root_page_num == self.initial_root_page_num
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    /// Returns the type of the indexed attribute.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Returns the buffer manager this index runs on.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buf
    }

    /// Flushes the index file and releases the handle. Never fails;
    /// dropping the handle does the same.
    pub fn close(self) {}

    pub(crate) fn page_id(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    /// Inserts every record of the relation, then flushes the file.
    fn build_from(&mut self, relation: &HeapFile) -> Result<()> {
        let mut scan = relation.scan()?;
        while let Some((rid, record)) = scan.next()? {
            let key = self.key_from_record(&record);
            self.insert(key, rid)?;
        }
        self.buf.flush_file(self.file_id)
    }

    /// Extracts the indexed attribute from a record.
    fn key_from_record(&self, record: &[u8]) -> i32 {
        let off = self.attr_byte_offset;
        i32::from_le_bytes([record[off], record[off + 1], record[off + 2], record[off + 3]])
    }

    /// Inserts a `(key, rid)` entry.
    ///
    /// Duplicate keys are permitted; within a leaf they order by rid. A
    /// full leaf splits and the split may propagate to the root, in which
    /// case the meta page is rewritten with the new root.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root = self.root_page_num;
        let root_is_leaf = self.root_is_leaf();

        if let Some(split) = self.insert_into(root, root_is_leaf, key, rid)? {
            self.grow_root(split)?;
        }
        Ok(())
    }

    /// Recursive descent: inserts into the subtree rooted at `page_num`
    /// and returns the separator entry for the parent if this node split.
    ///
    /// The node stays pinned across the child recursion; it unpins dirty
    /// exactly when a propagated entry (or the leaf insert itself)
    /// modified it.
    fn insert_into(
        &self,
        page_num: u32,
        is_leaf: bool,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<SplitEntry>> {
        let mut pin = PagePin::fetch(&self.buf, self.page_id(page_num))?;

        if is_leaf {
            let full = {
                let data = pin.data();
                LeafView::new(&data[..]).is_full()
            };
            if !full {
                let mut data = pin.data_mut();
                LeafMut::new(&mut data[..]).insert(key, rid);
                return Ok(None);
            }
            return self.split_leaf(pin, key, rid).map(Some);
        }

        let (child, child_is_leaf) = {
            let data = pin.data();
            let inner = InnerView::new(&data[..]);
            let i = inner.child_index_for_insert(key);
            (inner.child(i), inner.level() == 1)
        };

        match self.insert_into(child, child_is_leaf, key, rid)? {
            None => Ok(None),
            Some(entry) => {
                let full = {
                    let data = pin.data();
                    InnerView::new(&data[..]).is_full()
                };
                if !full {
                    let mut data = pin.data_mut();
                    InnerMut::new(&mut data[..]).insert(entry.key, entry.page_num);
                    return Ok(None);
                }
                self.split_inner(pin, entry).map(Some)
            }
        }
    }

    /// Splits a full leaf while inserting the new entry, and returns the
    /// copied-up separator: the first key of the new right sibling.
    fn split_leaf(&self, mut pin: PagePin<'_>, key: i32, rid: RecordId) -> Result<SplitEntry> {
        let mut new_pin = PagePin::alloc(&self.buf, self.file_id)?;
        let new_page_num = new_pin.page_num();

        let separator_key;
        {
            let mut old_data = pin.data_mut();
            let mut new_data = new_pin.data_mut();
            let mut old = LeafMut::new(&mut old_data[..]);
            let mut new = LeafMut::new(&mut new_data[..]);

            // Balanced midpoint; with an even fanout the larger half
            // depends on where the new key lands
            let mut mid = LEAF_FANOUT / 2 - 1;
            if LEAF_FANOUT % 2 == 0 && key >= old.view().key(mid) {
                mid += 1;
            }

            let mut idx = 0;
            for i in (mid + 1)..LEAF_FANOUT {
                new.set_key(idx, old.view().key(i));
                new.set_rid(idx, old.view().rid(i));
                old.clear_entry(i);
                idx += 1;
            }

            if key < old.view().key(mid) {
                old.insert(key, rid);
            } else {
                new.insert(key, rid);
            }

            new.set_right_sibling(old.view().right_sibling());
            old.set_right_sibling(new_page_num);

            // Copy-up: the separator stays present in the new leaf
            separator_key = new.view().key(0);
        }

        Ok(SplitEntry {
            key: separator_key,
            page_num: new_page_num,
        })
    }

    /// Splits a full inner node while placing the propagated entry, and
    /// returns the moved-up separator (removed from the left node).
    fn split_inner(&self, mut pin: PagePin<'_>, entry: SplitEntry) -> Result<SplitEntry> {
        let mut new_pin = PagePin::alloc(&self.buf, self.file_id)?;
        let new_page_num = new_pin.page_num();

        let separator_key;
        {
            let mut old_data = pin.data_mut();
            let mut new_data = new_pin.data_mut();
            let mut old = InnerMut::new(&mut old_data[..]);
            let mut new = InnerMut::new(&mut new_data[..]);

            let mut mid = INNER_FANOUT / 2 - 1;
            if INNER_FANOUT % 2 == 0 && entry.key >= old.view().key(mid) {
                mid += 1;
            }
            // Left part stays larger by one slot so removing the
            // moved-up key from its end is clean
            mid += 1;

            // Move-up: the separator leaves the old node
            separator_key = old.view().key(mid);

            let mut idx = 0;
            for i in (mid + 1)..INNER_FANOUT {
                new.set_key(idx, old.view().key(i));
                old.clear_key(i);
                new.set_child(idx, old.view().child(i));
                old.clear_child(i);
                idx += 1;
            }
            // The full node's last child slot moves as well
            new.set_child(idx, old.view().child(INNER_FANOUT));
            old.clear_child(INNER_FANOUT);
            old.clear_key(mid);

            // Keys at or below the separator belong left of it
            if entry.key <= separator_key {
                old.insert(entry.key, entry.page_num);
            } else {
                new.insert(entry.key, entry.page_num);
            }

            new.set_level(old.view().level());
        }

        Ok(SplitEntry {
            key: separator_key,
            page_num: new_page_num,
        })
    }

    /// Replaces the root after a split climbed out of it, and records the
    /// new root in the meta page.
    fn grow_root(&mut self, split: SplitEntry) -> Result<()> {
        let old_root = self.root_page_num;
        let new_root_num;
        {
            let mut root_pin = PagePin::alloc(&self.buf, self.file_id)?;
            new_root_num = root_pin.page_num();

            let mut data = root_pin.data_mut();
            let mut root = InnerMut::new(&mut data[..]);
            root.set_level(if old_root == self.initial_root_page_num {
                1
            } else {
                0
            });
            root.set_child(0, old_root);
            root.set_key(0, split.key);
            root.set_child(1, split.page_num);
        }
        {
            let mut meta_pin = PagePin::fetch(&self.buf, self.page_id(self.header_page_num))?;
            let mut data = meta_pin.data_mut();
            MetaMut::new(&mut data[..]).set_root_page_no(new_root_num);
        }

        self.root_page_num = new_root_num;
        Ok(())
    }

    /// Ends any scan and flushes the file, swallowing errors. Used by
    /// both `close` and `Drop`.
    fn shutdown(&mut self) {
        self.terminate_scan();
        let _ = self.buf.flush_file(self.file_id);
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        self.shutdown();
    }
}
