//! Mirror cache: the live full-table mirror.
//!
//! A [`MirrorCache`] maintains the complete, authoritative map of a
//! table's current cache items. Applying a batch first copies out the
//! pre-update values of every updated or deleted row (the obsolete
//! set), delivers a [`MirrorChangeSet`] exposing the not-yet-mutated
//! mirror, and only then merges the batch into the map. The whole
//! sequence runs under the table's delivery lock, so neither a
//! registration nor a second batch can observe a half-applied state.
//!
//! The read API ([`get`], [`ids`], [`rows`], [`to_map`]) reads the live
//! map directly: callers see a concurrently-evolving view, not a
//! point-in-time snapshot, unless they copy it first.
//!
//! [`get`]: MirrorCache::get
//! [`ids`]: MirrorCache::ids
//! [`rows`]: MirrorCache::rows
//! [`to_map`]: MirrorCache::to_map

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;

use crate::changelog::RecordId;
use crate::changeset::{ChangeSet, MirrorChangeSet, MirrorReader, RowMap};
use crate::error::CacheError;
use crate::identity::TableId;
use crate::listener::{notify_mirror, MirrorListener};
use crate::metrics::SyncMetrics;

/// Stateful mirror cache for one table.
pub struct MirrorCache<T> {
    table: TableId,
    rows: Arc<RwLock<RowMap<T>>>,
    listeners: Mutex<Vec<Arc<dyn MirrorListener<T>>>>,
    delivery: Arc<AsyncMutex<()>>,
    metrics: Arc<SyncMetrics>,
}

impl<T: Clone + Send + Sync + 'static> MirrorCache<T> {
    pub(crate) fn new(
        table: TableId,
        initial_rows: RowMap<T>,
        delivery: Arc<AsyncMutex<()>>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            table,
            rows: Arc::new(RwLock::new(initial_rows)),
            listeners: Mutex::new(Vec::new()),
            delivery,
            metrics,
        }
    }

    /// The table this cache mirrors.
    #[must_use]
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Registers a listener.
    ///
    /// The listener first receives one synthetic change set carrying
    /// the current mirror content as created (obsolete empty), then
    /// every subsequent live batch. Runs under the table's delivery
    /// lock.
    pub async fn register(&self, listener: Arc<dyn MirrorListener<T>>) {
        let _guard = self.delivery.lock().await;
        let initial = ChangeSet::initial(self.rows.read().clone());
        let update = MirrorChangeSet::new(initial, RowMap::default(), self.reader());
        notify_mirror(&self.table, &listener, &update, &self.metrics);
        self.listeners.lock().push(listener);
    }

    /// Removes a listener. No-op if it was never registered.
    pub async fn unregister(&self, listener: &Arc<dyn MirrorListener<T>>) {
        let _guard = self.delivery.lock().await;
        self.listeners
            .lock()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns the current value of a row, if present.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }

    /// Returns the current value of a row.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::RowNotFound`] if the row is not in the
    /// mirror.
    pub fn get_or_fail(&self, id: RecordId) -> Result<T, CacheError> {
        self.get(id).ok_or_else(|| CacheError::RowNotFound {
            table: self.table.clone(),
            id,
        })
    }

    /// Ids of all rows currently in the mirror.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.rows.read().keys().copied().collect()
    }

    /// All rows currently in the mirror.
    #[must_use]
    pub fn rows(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    /// A point-in-time copy of the full mirror map.
    #[must_use]
    pub fn to_map(&self) -> RowMap<T> {
        self.rows.read().clone()
    }

    /// Number of rows currently in the mirror.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the mirror is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a live read handle over the mirror map.
    #[must_use]
    pub fn reader(&self) -> MirrorReader<T> {
        MirrorReader::new(Arc::clone(&self.rows))
    }

    /// Applies one reconciled batch: extract obsolete rows, deliver,
    /// then mutate the mirror. Caller must hold the table's delivery
    /// lock.
    pub(crate) fn apply(&self, changes: ChangeSet<T>) {
        let obsolete: RowMap<T> = {
            let rows = self.rows.read();
            changes
                .touched()
                .iter()
                .filter_map(|id| rows.get(id).map(|row| (*id, row.clone())))
                .collect()
        };
        let update = MirrorChangeSet::new(changes, obsolete, self.reader());

        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in &listeners {
            notify_mirror(&self.table, listener, &update, &self.metrics);
        }

        let mut rows = self.rows.write();
        for (id, row) in update.upserted() {
            rows.insert(*id, row.clone());
        }
        for id in update.deleted() {
            rows.remove(id);
        }
    }
}

impl<T> std::fmt::Debug for MirrorCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCache")
            .field("table", &self.table)
            .field("rows", &self.rows.read().len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
