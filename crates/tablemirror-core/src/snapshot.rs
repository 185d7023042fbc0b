//! Reclaimable full-table snapshot store.
//!
//! Registering a listener needs "everything currently in the table".
//! Loading the whole table for every registration is wasteful when
//! several listeners register close together, so the agent keeps a
//! [`SnapshotStore`]: a `Weak` handle to the last full load. While any
//! caller still holds the `Arc`, later registrations reuse it for free;
//! once the last caller drops it, the memory is reclaimed and the next
//! miss rebuilds from a fresh load.
//!
//! This is a best-effort cache only. The mirror cache's row map is the
//! correctness-critical state and is never reclaimed.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::changeset::RowMap;
use crate::error::SourceError;
use crate::metrics::SyncMetrics;
use crate::source::ItemLoader;

/// Weak-handle cache of the last full-table load.
#[derive(Debug)]
pub struct SnapshotStore<T> {
    slot: Mutex<Weak<RowMap<T>>>,
}

impl<T> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Weak::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SnapshotStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot if some caller still holds it.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<RowMap<T>>> {
        self.slot.lock().upgrade()
    }

    /// Returns the cached snapshot, or rebuilds it from a full table
    /// load on miss.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the rebuild load fails; the store is
    /// left empty and the next call retries.
    pub async fn get_or_load(
        &self,
        loader: &dyn ItemLoader<Item = T>,
        metrics: &SyncMetrics,
    ) -> Result<Arc<RowMap<T>>, SourceError> {
        if let Some(snapshot) = self.cached() {
            return Ok(snapshot);
        }
        let snapshot = Arc::new(loader.load_table().await?);
        metrics.record_snapshot_rebuild();
        *self.slot.lock() = Arc::downgrade(&snapshot);
        Ok(snapshot)
    }

    /// Drops the cached handle. Called after every applied batch, since
    /// the snapshot no longer reflects the table.
    pub fn invalidate(&self) {
        *self.slot.lock() = Weak::new();
    }
}
