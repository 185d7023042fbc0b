//! Per-table agent.
//!
//! A [`TableAgent`] is the process-lifetime bundle owning everything
//! the engine keeps for one watched table: the row loader, the lazily
//! created delta and mirror caches, the reclaimable snapshot store,
//! the FIFO ordering gate, and the delivery lock that serializes
//! registration against batch application.
//!
//! Dispatching a batch claims a turn ticket synchronously and spawns a
//! task that reconciles, loads rows, waits its turn, and applies the
//! result under the delivery lock. Loads for different batches of the
//! same table may overlap; application never reorders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::changelog::{ChangeBatch, RecordId};
use crate::changeset::{ChangeSet, RowMap};
use crate::delta_cache::DeltaCache;
use crate::error::SourceError;
use crate::identity::TableId;
use crate::metrics::SyncMetrics;
use crate::mirror_cache::MirrorCache;
use crate::ordering::{FifoGate, Ticket};
use crate::snapshot::SnapshotStore;
use crate::source::ItemLoader;

/// Type-erased dispatch surface of a [`TableAgent`], so agents for
/// differently-typed tables can share one registry.
pub trait ChangeSink: Send + Sync {
    /// The table this sink applies batches to.
    fn table(&self) -> &TableId;

    /// Schedules one poll batch for reconciliation and application.
    ///
    /// Claims the table's next FIFO turn before returning, so calling
    /// this in poll order guarantees application in poll order. Must be
    /// called from within a tokio runtime.
    fn dispatch_batch(self: Arc<Self>, batch: ChangeBatch);
}

/// Per-table bundle of loader, caches, snapshot store, and ordering
/// state. Exactly one agent exists per table; it is created lazily and
/// lives for the process lifetime.
pub struct TableAgent<T> {
    table: TableId,
    loader: Arc<dyn ItemLoader<Item = T>>,
    delivery: Arc<AsyncMutex<()>>,
    gate: FifoGate,
    snapshots: Arc<SnapshotStore<T>>,
    delta: Mutex<Option<Arc<DeltaCache<T>>>>,
    mirror: Mutex<Option<Arc<MirrorCache<T>>>>,
    metrics: Arc<SyncMetrics>,
    closed: Arc<AtomicBool>,
}

impl<T> TableAgent<T> {
    /// The table this agent serves.
    #[must_use]
    pub fn table(&self) -> &TableId {
        &self.table
    }
}

impl<T: Clone + Send + Sync + 'static> TableAgent<T> {
    /// Creates the agent for one table.
    #[must_use]
    pub fn new(
        table: TableId,
        loader: Arc<dyn ItemLoader<Item = T>>,
        metrics: Arc<SyncMetrics>,
        closed: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            table,
            loader,
            delivery: Arc::new(AsyncMutex::new(())),
            gate: FifoGate::new(),
            snapshots: Arc::new(SnapshotStore::new()),
            delta: Mutex::new(None),
            mirror: Mutex::new(None),
            metrics,
            closed,
        })
    }

    /// Returns the delta cache, creating it on first use.
    #[must_use]
    pub fn delta_cache(&self) -> Arc<DeltaCache<T>> {
        let mut slot = self.delta.lock();
        if let Some(cache) = slot.as_ref() {
            return Arc::clone(cache);
        }
        let cache = Arc::new(DeltaCache::new(
            self.table.clone(),
            Arc::clone(&self.delivery),
            Arc::clone(&self.loader),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.metrics),
        ));
        *slot = Some(Arc::clone(&cache));
        cache
    }

    /// Returns the mirror cache, creating and priming it from a full
    /// table load on first use.
    ///
    /// Priming runs under the delivery lock, so the initial mirror
    /// content and subsequently applied batches never interleave.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the priming load fails; no cache is
    /// created and a later call retries.
    pub async fn mirror_cache(&self) -> Result<Arc<MirrorCache<T>>, SourceError> {
        if let Some(cache) = self.mirror.lock().as_ref() {
            return Ok(Arc::clone(cache));
        }
        let _guard = self.delivery.lock().await;
        if let Some(cache) = self.mirror.lock().as_ref() {
            return Ok(Arc::clone(cache));
        }
        let rows = self.loader.load_table().await?;
        let cache = Arc::new(MirrorCache::new(
            self.table.clone(),
            rows,
            Arc::clone(&self.delivery),
            Arc::clone(&self.metrics),
        ));
        *self.mirror.lock() = Some(Arc::clone(&cache));
        Ok(cache)
    }

    /// Whether any cache currently wants updates. When false, dispatch
    /// skips the row load entirely.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mirror.lock().is_some()
            || self
                .delta
                .lock()
                .as_ref()
                .is_some_and(|cache| cache.has_listeners())
    }

    /// Reconciles, loads, and applies one batch. `ticket` must have
    /// been claimed from this agent's gate in poll order.
    async fn apply(self: Arc<Self>, mut batch: ChangeBatch, mut ticket: Ticket) {
        batch.reconcile();
        if batch.is_empty() || !self.is_active() {
            return;
        }

        let mut wanted: Vec<RecordId> = batch
            .created()
            .iter()
            .chain(batch.updated())
            .copied()
            .collect();
        wanted.sort_unstable();

        let loaded: RowMap<T> = if wanted.is_empty() {
            RowMap::default()
        } else {
            match self.loader.load_rows(&wanted).await {
                Ok(rows) => rows,
                Err(error) => {
                    self.metrics.record_load_error();
                    tracing::error!(
                        table = %self.table,
                        %error,
                        "row load failed; dropping change batch"
                    );
                    return;
                }
            }
        };

        let mut vanished = 0u64;
        for id in &wanted {
            if !loaded.contains_key(id) {
                batch.mark_unloadable(*id);
                vanished += 1;
            }
        }
        if vanished > 0 {
            self.metrics.record_vanished(vanished);
            tracing::debug!(
                table = %self.table,
                vanished,
                "rows deleted between capture and load"
            );
        }

        let rows_loaded = loaded.len() as u64;
        let (created, updated, deleted, _max_version) = batch.into_parts();
        let changes = ChangeSet::new(loaded, created, updated, deleted);

        ticket.turn().await;
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        let _guard = self.delivery.lock().await;
        self.snapshots.invalidate();
        if let Some(delta) = self.delta.lock().clone() {
            delta.deliver(&changes);
        }
        if let Some(mirror) = self.mirror.lock().clone() {
            mirror.apply(changes);
        }
        self.metrics.record_batch(rows_loaded);
    }
}

impl<T: Clone + Send + Sync + 'static> ChangeSink for TableAgent<T> {
    fn table(&self) -> &TableId {
        &self.table
    }

    fn dispatch_batch(self: Arc<Self>, batch: ChangeBatch) {
        let ticket = self.gate.ticket();
        tokio::spawn(async move {
            self.apply(batch, ticket).await;
        });
    }
}

impl<T> std::fmt::Debug for TableAgent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableAgent")
            .field("table", &self.table)
            .field("delta", &self.delta.lock().is_some())
            .field("mirror", &self.mirror.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeOp;
    use crate::testing::{MemoryTable, RecordingDeltaListener, RecordingMirrorListener};
    use std::time::Duration;

    fn agent(table: &MemoryTable<String>) -> Arc<TableAgent<String>> {
        TableAgent::new(
            TableId::new("app", "users"),
            Arc::new(table.clone()),
            Arc::new(SyncMetrics::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn batch(entries: &[(RecordId, ChangeOp)]) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        for (version, (id, op)) in entries.iter().enumerate() {
            batch.record(*id, *op, version as u64 + 1);
        }
        batch
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_inactive_agent_skips_loading() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        let agent = agent(&table);

        agent
            .clone()
            .dispatch_batch(batch(&[(1, ChangeOp::Update)]));
        settle().await;

        assert_eq!(table.row_loads(), 0, "no cache, no load");
    }

    #[tokio::test]
    async fn test_mirror_apply_via_dispatch() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());
        let agent = agent(&table);
        let mirror = agent.mirror_cache().await.unwrap();

        let listener = Arc::new(RecordingMirrorListener::new());
        mirror.register(listener.clone()).await;

        // update(1 -> "A"), delete(2), create(3 -> "c")
        table.insert(1, "A".to_string());
        table.remove(2);
        table.insert(3, "c".to_string());
        agent.clone().dispatch_batch(batch(&[
            (1, ChangeOp::Update),
            (2, ChangeOp::Delete),
            (3, ChangeOp::Insert),
        ]));
        settle().await;

        let seen = listener.seen();
        assert_eq!(seen.len(), 2, "initial snapshot plus one batch");
        let live = &seen[1];
        assert_eq!(live.created, vec![3]);
        assert_eq!(live.updated, vec![1]);
        assert_eq!(live.deleted, vec![2]);
        assert_eq!(
            live.upserted,
            vec![(1, "A".to_string()), (3, "c".to_string())]
        );
        assert_eq!(
            live.obsolete,
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );

        assert_eq!(mirror.get(1), Some("A".to_string()));
        assert_eq!(mirror.get(2), None);
        assert_eq!(mirror.get(3), Some("c".to_string()));
    }

    #[tokio::test]
    async fn test_vanished_row_delivered_as_deleted() {
        let table = MemoryTable::new();
        let agent = agent(&table);
        let delta = agent.delta_cache();
        let listener = Arc::new(RecordingDeltaListener::new());
        delta.register(listener.clone()).await.unwrap();

        // Event says created, but the row is already gone from the table.
        agent
            .clone()
            .dispatch_batch(batch(&[(9, ChangeOp::Insert)]));
        settle().await;

        let seen = listener.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].created.is_empty());
        assert_eq!(seen[1].deleted, vec![9]);
    }

    #[tokio::test]
    async fn test_created_then_deleted_never_existed() {
        let table = MemoryTable::new();
        let agent = agent(&table);
        let delta = agent.delta_cache();
        let listener = Arc::new(RecordingDeltaListener::new());
        delta.register(listener.clone()).await.unwrap();

        agent.clone().dispatch_batch(batch(&[
            (5, ChangeOp::Insert),
            (5, ChangeOp::Delete),
        ]));
        settle().await;

        let seen = listener.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].created.is_empty());
        assert_eq!(seen[1].deleted, vec![5]);
    }

    #[tokio::test]
    async fn test_failed_load_drops_batch() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        let agent = agent(&table);
        let delta = agent.delta_cache();
        let listener = Arc::new(RecordingDeltaListener::new());
        delta.register(listener.clone()).await.unwrap();

        table.fail_next_load();
        agent
            .clone()
            .dispatch_batch(batch(&[(1, ChangeOp::Update)]));
        settle().await;

        assert_eq!(listener.seen().len(), 1, "only the initial snapshot");
    }

    #[tokio::test]
    async fn test_slow_first_batch_still_applies_first() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());
        let agent = agent(&table);
        let delta = agent.delta_cache();
        let listener = Arc::new(RecordingDeltaListener::new());
        delta.register(listener.clone()).await.unwrap();

        // First batch's load stalls; second batch loads immediately.
        table.delay_next_load(Duration::from_millis(150));
        agent
            .clone()
            .dispatch_batch(batch(&[(1, ChangeOp::Update)]));
        agent
            .clone()
            .dispatch_batch(batch(&[(2, ChangeOp::Update)]));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let seen = listener.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].updated, vec![1], "slow batch delivered first");
        assert_eq!(seen[2].updated, vec![2]);
    }

    #[tokio::test]
    async fn test_registration_during_in_flight_update() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        let agent = agent(&table);
        let delta = agent.delta_cache();
        // An existing listener keeps the agent active.
        let warm = Arc::new(RecordingDeltaListener::new());
        delta.register(warm.clone()).await.unwrap();

        table.insert(1, "A".to_string());
        table.delay_next_load(Duration::from_millis(150));
        agent
            .clone()
            .dispatch_batch(batch(&[(1, ChangeOp::Update)]));
        // Let the batch load start, then register while it is in flight.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let late = Arc::new(RecordingDeltaListener::new());
        delta.register(late.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The late listener got a full snapshot and then the update;
        // nothing was skipped and nothing interleaved mid-registration.
        let seen = late.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].upserted, vec![(1, "A".to_string())]);
        assert_eq!(seen[1].updated, vec![1]);

        let warm_seen = warm.seen();
        assert_eq!(warm_seen.len(), 2);
        assert_eq!(warm_seen[0].upserted, vec![(1, "a".to_string())]);
        assert_eq!(warm_seen[1].updated, vec![1]);
    }

    #[tokio::test]
    async fn test_closed_agent_abandons_in_flight_batch() {
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        let closed = Arc::new(AtomicBool::new(false));
        let agent = TableAgent::new(
            TableId::new("app", "users"),
            Arc::new(table.clone()),
            Arc::new(SyncMetrics::new()),
            Arc::clone(&closed),
        );
        let delta = agent.delta_cache();
        let listener = Arc::new(RecordingDeltaListener::new());
        delta.register(listener.clone()).await.unwrap();

        table.delay_next_load(Duration::from_millis(100));
        agent
            .clone()
            .dispatch_batch(batch(&[(1, ChangeOp::Update)]));
        closed.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(listener.seen().len(), 1, "in-flight batch abandoned");
    }

    #[tokio::test]
    async fn test_cache_instances_are_reused() {
        let table = MemoryTable::new();
        let agent = agent(&table);

        let d1 = agent.delta_cache();
        let d2 = agent.delta_cache();
        assert!(Arc::ptr_eq(&d1, &d2));

        let m1 = agent.mirror_cache().await.unwrap();
        let m2 = agent.mirror_cache().await.unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));
        assert_eq!(table.table_loads(), 1, "mirror primed once");
    }
}
