//! The `TableMirror` service object.
//!
//! Owns the agent registry, the change-log source, and the background
//! poller. Construction and shutdown are explicit; nothing here is
//! static or implicit. Dropping the service signals the poller too, so
//! a test that forgets `shutdown` doesn't leak a busy task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tablemirror_core::{
    ChangeLogSource, DeltaCache, ItemLoader, MirrorCache, SyncMetrics, SyncMetricsSnapshot,
    TableId,
};

use crate::builder::MirrorBuilder;
use crate::config::{CaptureCheckMode, MirrorConfig};
use crate::error::MirrorError;
use crate::poller;
use crate::registry::AgentRegistry;

/// Keeps in-process caches of whole tables synchronized with the
/// database by polling a trigger-written change log.
///
/// One instance per process is typical, but nothing prevents several;
/// each owns its poller, watermark, and registry.
pub struct TableMirror {
    source: Arc<dyn ChangeLogSource>,
    registry: Arc<AgentRegistry>,
    config: MirrorConfig,
    metrics: Arc<SyncMetrics>,
    closed: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TableMirror {
    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> MirrorBuilder {
        MirrorBuilder::new()
    }

    pub(crate) async fn start(
        source: Arc<dyn ChangeLogSource>,
        config: MirrorConfig,
    ) -> Result<Self, MirrorError> {
        // History from before this process started is never processed.
        let initial_watermark = source.max_version().await?;

        let metrics = Arc::new(SyncMetrics::new());
        let closed = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&metrics),
            Arc::clone(&closed),
        ));
        let (shutdown_tx, handle) = poller::spawn(
            Arc::clone(&source),
            Arc::clone(&registry),
            config.clone(),
            Arc::clone(&metrics),
            initial_watermark,
        );

        Ok(Self {
            source,
            registry,
            config,
            metrics,
            closed,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            poller: Mutex::new(Some(handle)),
        })
    }

    /// Registers a table for cache synchronization and returns its
    /// handle. Idempotent: registering the same table again returns a
    /// handle to the same agent, provided the item type matches.
    ///
    /// The first registration of a table also runs the configured
    /// change-capture check; its failure is logged, never fatal.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Shutdown`] after [`shutdown`], or
    /// [`MirrorError::ItemTypeMismatch`] when the table was registered
    /// before with a different item type.
    ///
    /// [`shutdown`]: TableMirror::shutdown
    pub async fn register_table<T: Clone + Send + Sync + 'static>(
        &self,
        table: TableId,
        loader: Arc<dyn ItemLoader<Item = T>>,
    ) -> Result<TableHandle<T>, MirrorError> {
        if self.is_closed() {
            return Err(MirrorError::Shutdown);
        }

        let (agent, created) = self.registry.get_or_create(table.clone(), loader)?;
        if created {
            match self.config.capture_check {
                CaptureCheckMode::Skip => {}
                CaptureCheckMode::Warn => {
                    if let Err(error) = self.source.ensure_capture(&table, false).await {
                        tracing::warn!(table = %table, %error, "change capture check failed");
                    }
                }
                CaptureCheckMode::Repair => {
                    if let Err(error) = self.source.ensure_capture(&table, true).await {
                        tracing::warn!(table = %table, %error, "change capture repair failed");
                    }
                }
            }
        }
        Ok(TableHandle { agent })
    }

    /// Tables currently registered.
    #[must_use]
    pub fn watched_tables(&self) -> Vec<TableId> {
        self.registry.watched()
    }

    /// Point-in-time snapshot of the engine counters.
    #[must_use]
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether [`shutdown`](TableMirror::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Stops the poller and marks the service closed. Idempotent.
    ///
    /// In-flight dispatch units abandon before applying; at most one
    /// poll interval's worth of staleness is re-derived if the service
    /// is started again against the same change log.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for TableMirror {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for TableMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMirror")
            .field("tables", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Handle to one registered table's caches.
///
/// Caches are created on demand: a table used only through
/// [`delta`](TableHandle::delta) never pays for the mirror map, and
/// vice versa.
pub struct TableHandle<T> {
    agent: Arc<tablemirror_core::TableAgent<T>>,
}

impl<T: Clone + Send + Sync + 'static> TableHandle<T> {
    /// The table this handle serves.
    #[must_use]
    pub fn table(&self) -> &TableId {
        self.agent.table()
    }

    /// Returns the table's delta cache, creating it on first use.
    #[must_use]
    pub fn delta(&self) -> Arc<DeltaCache<T>> {
        self.agent.delta_cache()
    }

    /// Returns the table's mirror cache, creating and priming it from
    /// a full table load on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Source`] if the priming load fails.
    pub async fn mirror(&self) -> Result<Arc<MirrorCache<T>>, MirrorError> {
        Ok(self.agent.mirror_cache().await?)
    }
}

impl<T> Clone for TableHandle<T> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
        }
    }
}

impl<T> std::fmt::Debug for TableHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("table", self.agent.table())
            .finish()
    }
}
