//! Change-set payloads delivered to listeners.
//!
//! A [`ChangeSet`] is the reconciled, fully-loaded result of one table's
//! poll batch: the upserted rows plus the disjoint created/updated/
//! deleted id sets. A [`MirrorChangeSet`] extends it with the rows made
//! obsolete by the batch and a [`MirrorReader`] over the live mirror.
//!
//! Change sets are built once per dispatch and handed to listeners by
//! reference; listeners must treat them as immutable.

use std::ops::Deref;
use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::changelog::RecordId;

/// Map from record id to cache item.
pub type RowMap<T> = FxHashMap<RecordId, T>;

/// Set of record ids.
pub type IdSet = FxHashSet<RecordId>;

/// The reconciled changes of one table for one poll cycle.
///
/// Invariants, guaranteed by construction:
/// - `created`, `updated`, and `deleted` are pairwise disjoint
/// - `upserted` holds exactly the rows of `created ∪ updated`
#[derive(Debug)]
pub struct ChangeSet<T> {
    upserted: RowMap<T>,
    created: IdSet,
    updated: IdSet,
    deleted: IdSet,
    created_rows: OnceCell<RowMap<T>>,
    updated_rows: OnceCell<RowMap<T>>,
    touched: OnceCell<IdSet>,
}

impl<T: Clone> ChangeSet<T> {
    /// Builds a change set from loaded rows and reconciled id sets.
    #[must_use]
    pub fn new(upserted: RowMap<T>, created: IdSet, updated: IdSet, deleted: IdSet) -> Self {
        debug_assert!(created.is_disjoint(&updated));
        debug_assert!(created.is_disjoint(&deleted));
        debug_assert!(updated.is_disjoint(&deleted));
        debug_assert_eq!(upserted.len(), created.len() + updated.len());

        Self {
            upserted,
            created,
            updated,
            deleted,
            created_rows: OnceCell::new(),
            updated_rows: OnceCell::new(),
            touched: OnceCell::new(),
        }
    }

    /// Builds the synthetic initial change set delivered to a freshly
    /// registered listener: every current row as if newly created.
    #[must_use]
    pub fn initial(rows: RowMap<T>) -> Self {
        let created: IdSet = rows.keys().copied().collect();
        Self::new(rows, created, IdSet::default(), IdSet::default())
    }

    /// All created and updated rows, keyed by id.
    #[must_use]
    pub fn upserted(&self) -> &RowMap<T> {
        &self.upserted
    }

    /// Ids of rows created in this cycle.
    #[must_use]
    pub fn created(&self) -> &IdSet {
        &self.created
    }

    /// Ids of rows updated in this cycle.
    #[must_use]
    pub fn updated(&self) -> &IdSet {
        &self.updated
    }

    /// Ids of rows deleted in this cycle.
    #[must_use]
    pub fn deleted(&self) -> &IdSet {
        &self.deleted
    }

    /// The created rows only. Computed on first use, then cached.
    #[must_use]
    pub fn created_rows(&self) -> &RowMap<T> {
        self.created_rows.get_or_init(|| {
            self.created
                .iter()
                .filter_map(|id| self.upserted.get(id).map(|row| (*id, row.clone())))
                .collect()
        })
    }

    /// The updated rows only. Computed on first use, then cached.
    #[must_use]
    pub fn updated_rows(&self) -> &RowMap<T> {
        self.updated_rows.get_or_init(|| {
            self.updated
                .iter()
                .filter_map(|id| self.upserted.get(id).map(|row| (*id, row.clone())))
                .collect()
        })
    }

    /// Ids whose previous value is gone after this cycle: the union of
    /// updated and deleted. Computed on first use, then cached.
    #[must_use]
    pub fn touched(&self) -> &IdSet {
        self.touched
            .get_or_init(|| self.updated.union(&self.deleted).copied().collect())
    }

    /// Whether the change set carries no ids at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of ids across the three sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Read handle over a mirror cache's live row map.
///
/// This is a view, not a snapshot: the map keeps changing as later
/// batches are applied. Callers needing a point-in-time copy should
/// use [`MirrorReader::to_map`].
#[derive(Debug)]
pub struct MirrorReader<T> {
    rows: Arc<RwLock<RowMap<T>>>,
}

impl<T: Clone> MirrorReader<T> {
    pub(crate) fn new(rows: Arc<RwLock<RowMap<T>>>) -> Self {
        Self { rows }
    }

    /// Returns the current value of a row, if present.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }

    /// Whether a row is currently present.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.rows.read().contains_key(&id)
    }

    /// Ids of all rows currently present.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.rows.read().keys().copied().collect()
    }

    /// All rows currently present.
    #[must_use]
    pub fn rows(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    /// A point-in-time copy of the full map.
    #[must_use]
    pub fn to_map(&self) -> RowMap<T> {
        self.rows.read().clone()
    }

    /// Number of rows currently present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the mirror is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl<T> Clone for MirrorReader<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

/// A [`ChangeSet`] extended with the rows it made obsolete and a live
/// view of the full mirror.
///
/// Delivered to mirror listeners *before* the mirror map is mutated:
/// during the callback, [`mirror`](MirrorChangeSet::mirror) still shows
/// the pre-update state, and evolves afterwards.
#[derive(Debug)]
pub struct MirrorChangeSet<T> {
    changes: ChangeSet<T>,
    obsolete: RowMap<T>,
    mirror: MirrorReader<T>,
}

impl<T: Clone> MirrorChangeSet<T> {
    pub(crate) fn new(changes: ChangeSet<T>, obsolete: RowMap<T>, mirror: MirrorReader<T>) -> Self {
        debug_assert!(obsolete.keys().all(|id| changes.touched().contains(id)));
        Self {
            changes,
            obsolete,
            mirror,
        }
    }

    /// Pre-update values of every updated or deleted row that existed
    /// in the mirror before this batch. An id missing here simply was
    /// not present before.
    #[must_use]
    pub fn obsolete(&self) -> &RowMap<T> {
        &self.obsolete
    }

    /// Live view of the full mirror.
    #[must_use]
    pub fn mirror(&self) -> &MirrorReader<T> {
        &self.mirror
    }
}

impl<T> Deref for MirrorChangeSet<T> {
    type Target = ChangeSet<T>;

    fn deref(&self) -> &Self::Target {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[RecordId]) -> IdSet {
        raw.iter().copied().collect()
    }

    fn set() -> ChangeSet<String> {
        let mut upserted = RowMap::default();
        upserted.insert(1, "A".to_string());
        upserted.insert(3, "c".to_string());
        ChangeSet::new(upserted, ids(&[3]), ids(&[1]), ids(&[2]))
    }

    #[test]
    fn test_partition_accessors() {
        let cs = set();
        assert_eq!(cs.created(), &ids(&[3]));
        assert_eq!(cs.updated(), &ids(&[1]));
        assert_eq!(cs.deleted(), &ids(&[2]));
        assert_eq!(cs.upserted().len(), 2);
        assert_eq!(cs.len(), 3);
        assert!(!cs.is_empty());
    }

    #[test]
    fn test_lazy_views() {
        let cs = set();

        let created = cs.created_rows();
        assert_eq!(created.len(), 1);
        assert_eq!(created[&3], "c");

        let updated = cs.updated_rows();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[&1], "A");

        assert_eq!(cs.touched(), &ids(&[1, 2]));
        // Second call returns the cached map.
        assert!(std::ptr::eq(cs.created_rows(), cs.created_rows()));
    }

    #[test]
    fn test_initial_marks_everything_created() {
        let mut rows = RowMap::default();
        rows.insert(1, "a".to_string());
        rows.insert(2, "b".to_string());
        let cs = ChangeSet::initial(rows);

        assert_eq!(cs.created(), &ids(&[1, 2]));
        assert!(cs.updated().is_empty());
        assert!(cs.deleted().is_empty());
        assert_eq!(cs.upserted().len(), 2);
    }

    #[test]
    fn test_empty_change_set() {
        let cs: ChangeSet<String> =
            ChangeSet::new(RowMap::default(), IdSet::default(), IdSet::default(), IdSet::default());
        assert!(cs.is_empty());
        assert!(cs.touched().is_empty());
        assert!(cs.created_rows().is_empty());
    }

    #[test]
    fn test_mirror_reader_is_live() {
        let rows = Arc::new(RwLock::new(RowMap::default()));
        let reader: MirrorReader<String> = MirrorReader::new(Arc::clone(&rows));

        assert!(reader.is_empty());
        rows.write().insert(1, "a".to_string());
        assert_eq!(reader.get(1), Some("a".to_string()));
        assert!(reader.contains(1));
        assert_eq!(reader.len(), 1);

        let copy = reader.to_map();
        rows.write().insert(2, "b".to_string());
        assert_eq!(copy.len(), 1, "to_map is a point-in-time copy");
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn test_mirror_change_set_derefs_to_changes() {
        let rows = Arc::new(RwLock::new(RowMap::default()));
        rows.write().insert(1, "a".to_string());

        let mut obsolete = RowMap::default();
        obsolete.insert(1, "a".to_string());

        let mut upserted = RowMap::default();
        upserted.insert(1, "A".to_string());
        let changes = ChangeSet::new(upserted, IdSet::default(), ids(&[1]), IdSet::default());

        let mcs = MirrorChangeSet::new(changes, obsolete, MirrorReader::new(rows));
        assert_eq!(mcs.updated(), &ids(&[1]));
        assert_eq!(mcs.obsolete()[&1], "a");
        assert_eq!(mcs.mirror().get(1), Some("a".to_string()));
    }
}
