//! Table → agent registry.
//!
//! Owns the one agent per watched table and fans poll batches out to
//! them. Get-or-create is race safe: a double-checked write lock makes
//! sure two concurrent registrations of the same table end up with the
//! same agent. Batches for tables nobody registered are dropped.

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use tablemirror_core::agent::{ChangeSink, TableAgent};
use tablemirror_core::{ChangeBatch, ItemLoader, SyncMetrics, TableId};

use crate::error::MirrorError;

struct AgentEntry {
    sink: Arc<dyn ChangeSink>,
    agent: Arc<dyn Any + Send + Sync>,
}

/// Registry of per-table agents.
pub(crate) struct AgentRegistry {
    tables: RwLock<FxHashMap<TableId, AgentEntry>>,
    metrics: Arc<SyncMetrics>,
    closed: Arc<AtomicBool>,
}

impl AgentRegistry {
    pub(crate) fn new(metrics: Arc<SyncMetrics>, closed: Arc<AtomicBool>) -> Self {
        Self {
            tables: RwLock::new(FxHashMap::default()),
            metrics,
            closed,
        }
    }

    /// Returns the agent for `table`, creating it on first call. The
    /// second tuple element is true when this call created the agent.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::ItemTypeMismatch`] if the table was
    /// previously registered with a different item type.
    pub(crate) fn get_or_create<T: Clone + Send + Sync + 'static>(
        &self,
        table: TableId,
        loader: Arc<dyn ItemLoader<Item = T>>,
    ) -> Result<(Arc<TableAgent<T>>, bool), MirrorError> {
        if let Some(entry) = self.tables.read().get(&table) {
            return Ok((Self::downcast(entry, &table)?, false));
        }

        let mut tables = self.tables.write();
        if let Some(entry) = tables.get(&table) {
            return Ok((Self::downcast(entry, &table)?, false));
        }

        let agent = TableAgent::new(
            table.clone(),
            loader,
            Arc::clone(&self.metrics),
            Arc::clone(&self.closed),
        );
        tables.insert(
            table,
            AgentEntry {
                sink: Arc::clone(&agent) as Arc<dyn ChangeSink>,
                agent: Arc::clone(&agent) as Arc<dyn Any + Send + Sync>,
            },
        );
        Ok((agent, true))
    }

    fn downcast<T: Clone + Send + Sync + 'static>(
        entry: &AgentEntry,
        table: &TableId,
    ) -> Result<Arc<TableAgent<T>>, MirrorError> {
        Arc::clone(&entry.agent)
            .downcast::<TableAgent<T>>()
            .map_err(|_| MirrorError::ItemTypeMismatch(table.clone()))
    }

    /// Hands each batch to its table's agent. Batches for tables with
    /// no agent are dropped. Returns the number dispatched.
    pub(crate) fn dispatch(&self, batches: FxHashMap<TableId, ChangeBatch>) -> usize {
        let tables = self.tables.read();
        let mut dispatched = 0;
        for (table, batch) in batches {
            if let Some(entry) = tables.get(&table) {
                Arc::clone(&entry.sink).dispatch_batch(batch);
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Tables with a registered agent, in registration-independent order.
    pub(crate) fn watched(&self) -> Vec<TableId> {
        self.tables.read().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tables.read().len()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("tables", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablemirror_core::testing::MemoryTable;
    use tablemirror_core::ChangeOp;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(
            Arc::new(SyncMetrics::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let table = TableId::new("app", "users");
        let loader: Arc<dyn ItemLoader<Item = String>> = Arc::new(MemoryTable::new());

        let (first, created) = registry
            .get_or_create(table.clone(), Arc::clone(&loader))
            .unwrap();
        assert!(created);

        let (second, created) = registry.get_or_create(table.clone(), loader).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.watched(), vec![table]);
    }

    #[test]
    fn test_item_type_mismatch() {
        let registry = registry();
        let table = TableId::new("app", "users");
        let strings: Arc<dyn ItemLoader<Item = String>> = Arc::new(MemoryTable::new());
        let numbers: Arc<dyn ItemLoader<Item = i64>> = Arc::new(MemoryTable::new());

        registry.get_or_create(table.clone(), strings).unwrap();
        let result = registry.get_or_create(table, numbers);
        assert!(matches!(result, Err(MirrorError::ItemTypeMismatch(_))));
    }

    #[tokio::test]
    async fn test_dispatch_drops_unwatched_tables() {
        let registry = registry();
        let watched = TableId::new("app", "users");
        let unwatched = TableId::new("app", "orders");
        let loader: Arc<dyn ItemLoader<Item = String>> = Arc::new(MemoryTable::new());
        registry.get_or_create(watched.clone(), loader).unwrap();

        let mut batches = FxHashMap::default();
        let mut batch = ChangeBatch::new();
        batch.record(1, ChangeOp::Insert, 1);
        batches.insert(watched, batch.clone());
        batches.insert(unwatched, batch);

        assert_eq!(registry.dispatch(batches), 1);
    }
}
