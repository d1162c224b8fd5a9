//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Severity for each error kind (§7), used by callers to decide whether
/// to log-and-continue, abort the current operation, or abort the
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Warning,
    Error,
    Fatal,
}

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// Page does not have enough space for the operation
    #[error("Page {page_id} is full, need {needed} bytes but only {available} available")]
    PageFull {
        page_id: PageId,
        needed: usize,
        available: usize,
    },

    /// Key exceeds maximum allowed size
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Value exceeds maximum allowed size
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Buffer pool has no available frames
    #[error("Buffer pool exhausted: no available frames")]
    BufferPoolExhausted,

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    /// File was not opened before use
    #[error("File is not open")]
    NotOpen,

    /// Operation requires write access but the file was opened read-only
    #[error("Illegal file access: {0}")]
    IllegalFileAccess(String),

    /// Caller-supplied argument is malformed (arity/type mismatch, ill-formed predicate, ...)
    #[error("Bad argument: {0}")]
    BadArgument(String),

    /// No record matched the requested key/predicate
    #[error("Entry not found")]
    EntryNotFound,

    /// A uniqueness constraint was violated
    #[error("Duplicate key")]
    Duplicate,

    /// No page could be allocated to complete the operation
    #[error("Not enough space to allocate a page")]
    NotSpace,

    /// The file is corrupt beyond repair; it is now read-only for the session
    #[error("File is corrupt: {0}")]
    CorruptFile(String),

    /// The calling transaction was interrupted mid-operation
    #[error("Operation interrupted")]
    Interrupted,

    /// The calling transaction was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Create a bad-argument error with a message
    pub fn bad_argument(msg: impl Into<String>) -> Self {
        Self::BadArgument(msg.into())
    }

    /// The §7 error-kind classification for this error.
    pub fn level(&self) -> ErrorLevel {
        match self {
            StorageError::EntryNotFound
            | StorageError::BadArgument(_)
            | StorageError::IllegalFileAccess(_)
            | StorageError::NotOpen
            | StorageError::Duplicate => ErrorLevel::Warning,

            StorageError::NotSpace
            | StorageError::Interrupted
            | StorageError::Cancelled
            | StorageError::PageFull { .. }
            | StorageError::KeyTooLarge { .. }
            | StorageError::ValueTooLarge { .. }
            | StorageError::BufferPoolExhausted
            | StorageError::InvalidOperation(_)
            | StorageError::PageNotFound(_) => ErrorLevel::Error,

            StorageError::Corruption(_)
            | StorageError::InvalidPage(_)
            | StorageError::InvalidDatabaseFile(_)
            | StorageError::CorruptFile(_)
            | StorageError::Io(_) => ErrorLevel::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_levels() {
        assert_eq!(StorageError::EntryNotFound.level(), ErrorLevel::Warning);
        assert_eq!(StorageError::NotSpace.level(), ErrorLevel::Error);
        assert_eq!(
            StorageError::corruption("bad checksum").level(),
            ErrorLevel::Fatal
        );
    }
}
