//! Change-log model and per-table accumulation.
//!
//! Database triggers append one row per write to an append-only change
//! log. The poller reads those rows as [`ChangeEvent`]s and folds them
//! into one [`ChangeBatch`] per table and poll cycle. A batch carries
//! the created/updated/deleted record-id sets plus the highest change
//! version it saw; [`ChangeBatch::reconcile`] collapses the sets so
//! every id ends the cycle in at most one of them.

use fxhash::{FxHashMap, FxHashSet};
use std::fmt;

use crate::identity::TableId;

/// Monotonically increasing change-log version. Never reused.
pub type Version = u64;

/// Primary key of a watched row.
pub type RecordId = i64;

/// The kind of write captured by a change-log trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Insert => write!(f, "insert"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

/// One persisted change-log row. Append-only; the engine never writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Change-log version assigned by the database sequence.
    pub version: Version,
    /// The table the write happened on.
    pub table: TableId,
    /// Primary key of the written row.
    pub record_id: RecordId,
    /// What kind of write it was.
    pub op: ChangeOp,
    /// Capture timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Per-table accumulator for one poll cycle.
///
/// Built by recording raw events, then collapsed with [`reconcile`]
/// before rows are loaded. Consumed exactly once per cycle.
///
/// [`reconcile`]: ChangeBatch::reconcile
#[derive(Debug, Default, Clone)]
pub struct ChangeBatch {
    created: FxHashSet<RecordId>,
    updated: FxHashSet<RecordId>,
    deleted: FxHashSet<RecordId>,
    max_version: Version,
}

impl ChangeBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one raw change event into the batch.
    pub fn record(&mut self, record_id: RecordId, op: ChangeOp, version: Version) {
        match op {
            ChangeOp::Insert => {
                self.created.insert(record_id);
            }
            ChangeOp::Update => {
                self.updated.insert(record_id);
            }
            ChangeOp::Delete => {
                self.deleted.insert(record_id);
            }
        }
        self.max_version = self.max_version.max(version);
    }

    /// Collapses the raw sets so each id is in at most one of them.
    ///
    /// A row created and deleted inside one poll window never existed
    /// from a listener's perspective, so deletion wins over creation
    /// and update; creation wins over update.
    pub fn reconcile(&mut self) {
        let deleted = &self.deleted;
        self.created.retain(|id| !deleted.contains(id));
        self.updated.retain(|id| !deleted.contains(id));
        let created = &self.created;
        self.updated.retain(|id| !created.contains(id));
    }

    /// Moves an id that was expected to load but came back absent into
    /// the deleted set. The row vanished between event capture and the
    /// load, so delivering it as deleted is the only state consistent
    /// with what can be fetched now.
    pub fn mark_unloadable(&mut self, record_id: RecordId) {
        self.created.remove(&record_id);
        self.updated.remove(&record_id);
        self.deleted.insert(record_id);
    }

    /// Ids recorded as created.
    #[must_use]
    pub fn created(&self) -> &FxHashSet<RecordId> {
        &self.created
    }

    /// Ids recorded as updated.
    #[must_use]
    pub fn updated(&self) -> &FxHashSet<RecordId> {
        &self.updated
    }

    /// Ids recorded as deleted.
    #[must_use]
    pub fn deleted(&self) -> &FxHashSet<RecordId> {
        &self.deleted
    }

    /// Highest change-log version folded into this batch.
    #[must_use]
    pub fn max_version(&self) -> Version {
        self.max_version
    }

    /// Whether the batch holds no ids at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of ids across the three sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Decomposes the batch into its sets and max version.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        FxHashSet<RecordId>,
        FxHashSet<RecordId>,
        FxHashSet<RecordId>,
        Version,
    ) {
        (self.created, self.updated, self.deleted, self.max_version)
    }
}

/// Folds a page of change events into per-table batches.
///
/// Repeated calls with later pages accumulate into the same map, so a
/// poll cycle that reads several pages still hands the registry one
/// batch per table.
pub fn accumulate(batches: &mut FxHashMap<TableId, ChangeBatch>, events: Vec<ChangeEvent>) {
    for event in events {
        batches
            .entry(event.table)
            .or_default()
            .record(event.record_id, event.op, event.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableId {
        TableId::new("app", "users")
    }

    fn event(version: Version, table: &TableId, id: RecordId, op: ChangeOp) -> ChangeEvent {
        ChangeEvent {
            version,
            table: table.clone(),
            record_id: id,
            op,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_record_and_max_version() {
        let mut batch = ChangeBatch::new();
        batch.record(1, ChangeOp::Insert, 10);
        batch.record(2, ChangeOp::Update, 12);
        batch.record(3, ChangeOp::Delete, 11);

        assert!(batch.created().contains(&1));
        assert!(batch.updated().contains(&2));
        assert!(batch.deleted().contains(&3));
        assert_eq!(batch.max_version(), 12);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_reconcile_delete_wins() {
        let mut batch = ChangeBatch::new();
        batch.record(1, ChangeOp::Insert, 1);
        batch.record(1, ChangeOp::Delete, 2);
        batch.record(2, ChangeOp::Update, 3);
        batch.record(2, ChangeOp::Delete, 4);
        batch.reconcile();

        assert!(batch.created().is_empty());
        assert!(batch.updated().is_empty());
        assert!(batch.deleted().contains(&1));
        assert!(batch.deleted().contains(&2));
    }

    #[test]
    fn test_reconcile_create_wins_over_update() {
        let mut batch = ChangeBatch::new();
        batch.record(5, ChangeOp::Insert, 1);
        batch.record(5, ChangeOp::Update, 2);
        batch.reconcile();

        assert!(batch.created().contains(&5));
        assert!(batch.updated().is_empty());
        assert!(batch.deleted().is_empty());
    }

    #[test]
    fn test_reconcile_partition_invariant() {
        let mut batch = ChangeBatch::new();
        for id in 0..20 {
            batch.record(id, ChangeOp::Insert, 1);
        }
        for id in 5..15 {
            batch.record(id, ChangeOp::Update, 2);
        }
        for id in 10..20 {
            batch.record(id, ChangeOp::Delete, 3);
        }
        batch.reconcile();

        for id in 0..20 {
            let memberships = usize::from(batch.created().contains(&id))
                + usize::from(batch.updated().contains(&id))
                + usize::from(batch.deleted().contains(&id));
            assert!(memberships <= 1, "id {id} in {memberships} sets");
        }
        // Deleted ids stay deleted; ids 0..10 remain created.
        assert!(batch.created().contains(&0));
        assert!(batch.deleted().contains(&15));
        assert!(batch.updated().is_empty());
    }

    #[test]
    fn test_mark_unloadable() {
        let mut batch = ChangeBatch::new();
        batch.record(7, ChangeOp::Insert, 1);
        batch.mark_unloadable(7);

        assert!(batch.created().is_empty());
        assert!(batch.deleted().contains(&7));
    }

    #[test]
    fn test_accumulate_groups_by_table() {
        let users = users();
        let orders = TableId::new("app", "orders");

        let mut batches = FxHashMap::default();
        accumulate(
            &mut batches,
            vec![
                event(1, &users, 1, ChangeOp::Insert),
                event(2, &orders, 9, ChangeOp::Delete),
                event(3, &users, 2, ChangeOp::Update),
            ],
        );
        accumulate(&mut batches, vec![event(4, &users, 3, ChangeOp::Insert)]);

        assert_eq!(batches.len(), 2);
        let u = &batches[&users];
        assert_eq!(u.created().len(), 2);
        assert_eq!(u.updated().len(), 1);
        assert_eq!(u.max_version(), 4);
        assert_eq!(batches[&orders].deleted().len(), 1);
    }

    #[test]
    fn test_empty_batch() {
        let batch = ChangeBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.max_version(), 0);
    }

    #[test]
    fn test_change_op_display() {
        assert_eq!(ChangeOp::Insert.to_string(), "insert");
        assert_eq!(ChangeOp::Update.to_string(), "update");
        assert_eq!(ChangeOp::Delete.to_string(), "delete");
    }
}
