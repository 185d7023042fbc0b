//! Error types for the `TableMirror` facade.

use tablemirror_core::{CacheError, SourceError, TableId};

/// Errors from `TableMirror` operations.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Data-access failure from the change log or a row loader.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Mirror cache lookup failure.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A table was registered twice with different item types.
    #[error("table '{0}' already registered with a different item type")]
    ItemTypeMismatch(TableId),

    /// The service has been shut down.
    #[error("table mirror is shut down")]
    Shutdown,
}
