//! Delta cache: stateless change forwarding.
//!
//! A [`DeltaCache`] holds no row data between updates. It forwards each
//! reconciled [`ChangeSet`] to its registered listeners, and hands a
//! newly registered listener a one-time synthetic snapshot ("everything
//! currently in the table as created") built from a full table load.
//!
//! Registration and delivery for one table are serialized by the
//! table's delivery lock, so a listener's initial snapshot and its
//! first live update never overlap or leave a gap.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::changeset::ChangeSet;
use crate::error::SourceError;
use crate::identity::TableId;
use crate::listener::{notify_delta, DeltaListener};
use crate::metrics::SyncMetrics;
use crate::snapshot::SnapshotStore;
use crate::source::ItemLoader;

/// Stateless delta cache for one table.
pub struct DeltaCache<T> {
    table: TableId,
    listeners: Mutex<Vec<Arc<dyn DeltaListener<T>>>>,
    delivery: Arc<AsyncMutex<()>>,
    loader: Arc<dyn ItemLoader<Item = T>>,
    snapshots: Arc<SnapshotStore<T>>,
    metrics: Arc<SyncMetrics>,
}

impl<T: Clone + Send + Sync + 'static> DeltaCache<T> {
    pub(crate) fn new(
        table: TableId,
        delivery: Arc<AsyncMutex<()>>,
        loader: Arc<dyn ItemLoader<Item = T>>,
        snapshots: Arc<SnapshotStore<T>>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            table,
            listeners: Mutex::new(Vec::new()),
            delivery,
            loader,
            snapshots,
            metrics,
        }
    }

    /// The table this cache serves.
    #[must_use]
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Registers a listener.
    ///
    /// The listener first receives one synthetic change set carrying
    /// every current row as created, then every subsequent live batch.
    /// Runs under the table's delivery lock, so no live update can
    /// interleave between the snapshot and the registration.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the full table load for the initial
    /// snapshot fails; the listener is then not registered.
    pub async fn register(&self, listener: Arc<dyn DeltaListener<T>>) -> Result<(), SourceError> {
        let _guard = self.delivery.lock().await;
        let snapshot = self
            .snapshots
            .get_or_load(&*self.loader, &self.metrics)
            .await?;
        let initial = ChangeSet::initial((*snapshot).clone());
        notify_delta(&self.table, &listener, &initial, &self.metrics);
        self.listeners.lock().push(listener);
        Ok(())
    }

    /// Removes a listener. No-op if it was never registered.
    pub async fn unregister(&self, listener: &Arc<dyn DeltaListener<T>>) {
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

    pub(crate) fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Delivers a change set to all listeners in registration order.
    /// Caller must hold the table's delivery lock.
    pub(crate) fn deliver(&self, changes: &ChangeSet<T>) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in &listeners {
            notify_delta(&self.table, listener, changes, &self.metrics);
        }
    }
}

impl<T> std::fmt::Debug for DeltaCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaCache")
            .field("table", &self.table)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
