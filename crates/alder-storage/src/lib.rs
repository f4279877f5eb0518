//! Storage engine for AlderDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O over named page files
//! - Buffer manager pairing the frame pool with the disk manager
//! - Heap file storage for fixed-layout records (the base relation)
//! - B+ tree secondary index over an integer attribute of a relation

mod btree;
mod bufmgr;
mod disk;
mod heap;
mod record;

pub use btree::{
    IndexFile, InnerView, LeafView, MetaView, ScanOp, INNER_FANOUT, LEAF_FANOUT,
};
pub use bufmgr::BufferManager;
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{HeapFile, HeapPage, RelationScan};
pub use record::RecordId;
