//! Error types for AlderDB.

use thiserror::Error;

/// Result type alias using AlderError.
pub type Result<T> = std::result::Result<T, AlderError>;

/// Errors that can occur in AlderDB operations.
#[derive(Debug, Error)]
pub enum AlderError {
    // I/O and paging errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not open: {0}")]
    FileNotOpen(String),

    #[error("Page {page_num} does not exist in file {file_id}")]
    PageOutOfBounds { file_id: u32, page_num: u32 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Heap file errors
    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Record length mismatch: expected {expected}, got {actual}")]
    RecordLenMismatch { expected: usize, actual: usize },

    // Index errors
    #[error("Index metadata does not match: {0}")]
    BadIndexInfo(String),

    #[error("Attribute at byte offset {offset} does not fit in a record of {record_len} bytes")]
    AttrOutOfBounds { offset: usize, record_len: usize },

    #[error("Unsupported attribute type: {0}")]
    UnsupportedType(String),

    #[error("Bad scan opcodes")]
    BadOpcodes,

    #[error("Bad scan range: low value exceeds high value")]
    BadScanRange,

    #[error("No key in the index satisfies the scan criteria")]
    NoSuchKeyFound,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    #[error("Storage corrupted: {0}")]
    Corrupted(String),
}
