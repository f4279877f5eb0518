//! Buffer management for AlderDB.
//!
//! A fixed-size pool of page frames with pin counting, dirty tracking,
//! and clock replacement. The pool is purely in-memory; disk traffic is
//! the caller's concern (evicted dirty pages are handed back for
//! writeback, loads are pushed in via [`BufferPool::load_page`]).

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
pub use replacer::ClockReplacer;
