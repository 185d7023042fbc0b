//! Engine error types.
//!
//! Two small hierarchies:
//! - [`SourceError`]: data-access failures reported by the collaborator
//!   traits; always transient from the engine's point of view (the
//!   cycle or dispatch is abandoned and retried or dropped)
//! - [`CacheError`]: synchronous lookup failures surfaced to callers of
//!   the mirror read API; never logged as a system fault

use thiserror::Error;

use crate::changelog::RecordId;
use crate::identity::TableId;

/// Errors reported by the data-access collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to reach the database.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A read against the change log or a watched table failed.
    #[error("read error: {0}")]
    ReadError(String),

    /// A loaded row could not be turned into a cache item.
    #[error("row decode error: {0}")]
    DecodeError(String),

    /// Change-capture triggers are missing or could not be verified.
    #[error("capture check failed: {0}")]
    CaptureCheck(String),

    /// An I/O error from the underlying driver.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from the mirror cache read API.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested row is not present in the mirror.
    #[error("row {id} not found in '{table}'")]
    RowNotFound {
        /// Table the lookup ran against.
        table: TableId,
        /// The missing record id.
        id: RecordId,
    },
}
