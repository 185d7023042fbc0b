//! Collaborator traits to the data-access layer.
//!
//! The engine touches the database through exactly two contracts:
//!
//! - [`ChangeLogSource`]: read the append-only change log and (best
//!   effort) verify that change-capture triggers exist for a table
//! - [`ItemLoader`]: load current rows of one watched table and build
//!   cache items from them
//!
//! The in-memory implementations in [`crate::testing`] back the test
//! suites; production implementations wrap the SQL layer.

use async_trait::async_trait;

use crate::changelog::{ChangeEvent, RecordId, Version};
use crate::changeset::RowMap;
use crate::error::SourceError;
use crate::identity::TableId;

/// Read access to the append-only change log.
#[async_trait]
pub trait ChangeLogSource: Send + Sync + 'static {
    /// Returns change events with `version > watermark`, ordered by
    /// version ascending.
    ///
    /// Implementations may return a partial page; the poller re-reads
    /// from the new high version until an empty page comes back.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on read failure. The poll cycle is
    /// abandoned without advancing the watermark and retried later.
    async fn changes_after(&self, watermark: Version) -> Result<Vec<ChangeEvent>, SourceError>;

    /// Returns the highest version currently in the change log, or 0
    /// for an empty log. Used once at startup to position the
    /// watermark so history from before the process start is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on read failure.
    async fn max_version(&self) -> Result<Version, SourceError>;

    /// Ensures the change log will receive events for writes to
    /// `table`; with `repair` set, missing triggers are recreated.
    ///
    /// Called at most once per table, when its agent is first created.
    /// The default implementation does nothing, for sources whose
    /// capture setup is managed elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the check or repair failed. Failures
    /// are logged as warnings and never fatal: the caches keep working,
    /// they just won't see changes for the table until capture is fixed.
    async fn ensure_capture(&self, table: &TableId, repair: bool) -> Result<(), SourceError> {
        let _ = (table, repair);
        Ok(())
    }
}

/// Loads current rows of one watched table and builds cache items.
///
/// One loader is supplied per registered table; the item type is the
/// value cached and delivered for that table.
#[async_trait]
pub trait ItemLoader: Send + Sync + 'static {
    /// The cache item built from a loaded row.
    type Item: Clone + Send + Sync + 'static;

    /// Loads the rows with the given ids that currently exist.
    ///
    /// Ids whose row is gone are simply absent from the result; the
    /// engine delivers them as deleted. A row whose item construction
    /// fails should be logged by the implementation and omitted the
    /// same way, degrading that row rather than the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] only for whole-query failures; the
    /// batch is then abandoned and the condition logged.
    async fn load_rows(&self, ids: &[RecordId]) -> Result<RowMap<Self::Item>, SourceError>;

    /// Loads the entire table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on read failure.
    async fn load_table(&self) -> Result<RowMap<Self::Item>, SourceError>;

    /// Loads a single row, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on read failure.
    async fn load_row(&self, id: RecordId) -> Result<Option<Self::Item>, SourceError> {
        Ok(self.load_rows(&[id]).await?.remove(&id))
    }
}
