//! Testing utilities for the cache engine.
//!
//! Provides in-memory implementations of the collaborator traits plus
//! recording listeners, used by this crate's test suites and reusable
//! by downstream crates:
//!
//! - [`MemoryChangeLog`]: append-only change log with version
//!   assignment, paging, and failure injection
//! - [`MemoryTable`]: backing row store implementing [`ItemLoader`]
//!   with failure and latency injection
//! - [`RecordingDeltaListener`] / [`RecordingMirrorListener`]: capture
//!   delivered change sets in arrival order
//! - [`PanickingListener`]: always panics, for isolation tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::changelog::{ChangeEvent, ChangeOp, RecordId, Version};
use crate::changeset::{ChangeSet, MirrorChangeSet, RowMap};
use crate::error::SourceError;
use crate::identity::TableId;
use crate::listener::{DeltaListener, MirrorListener};
use crate::source::{ChangeLogSource, ItemLoader};

// ── Change log ──────────────────────────────────────────────────────────

/// In-memory append-only change log.
///
/// Versions are assigned from an internal monotonic counter. Reads can
/// be failed one-shot and paged to exercise the poller's re-read loop.
#[derive(Debug, Default)]
pub struct MemoryChangeLog {
    events: Mutex<Vec<ChangeEvent>>,
    next_version: AtomicU64,
    fail_next_read: AtomicBool,
    paused: AtomicBool,
    page_size: AtomicUsize,
    capture_checks: Mutex<Vec<(TableId, bool)>>,
}

impl MemoryChangeLog {
    /// Creates an empty change log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one change event and returns its assigned version.
    pub fn push(&self, table: &TableId, record_id: RecordId, op: ChangeOp) -> Version {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_possible_wrap)]
        self.events.lock().push(ChangeEvent {
            version,
            table: table.clone(),
            record_id,
            op,
            timestamp_ms: version as i64,
        });
        version
    }

    /// Makes the next `changes_after` call fail.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::Relaxed);
    }

    /// Hides all events from `changes_after` until [`resume`] is
    /// called. Lets a test stage a multi-event window atomically.
    ///
    /// [`resume`]: MemoryChangeLog::resume
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Makes events visible to `changes_after` again.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Limits each `changes_after` call to at most `size` events
    /// (0 = unlimited).
    pub fn set_page_size(&self, size: usize) {
        self.page_size.store(size, Ordering::Relaxed);
    }

    /// The capture checks seen so far, as `(table, repair)` pairs.
    #[must_use]
    pub fn capture_checks(&self) -> Vec<(TableId, bool)> {
        self.capture_checks.lock().clone()
    }
}

#[async_trait]
impl ChangeLogSource for MemoryChangeLog {
    async fn changes_after(&self, watermark: Version) -> Result<Vec<ChangeEvent>, SourceError> {
        if self.fail_next_read.swap(false, Ordering::Relaxed) {
            return Err(SourceError::ReadError("injected read failure".into()));
        }
        if self.paused.load(Ordering::Relaxed) {
            return Ok(Vec::new());
        }
        let mut page: Vec<ChangeEvent> = self
            .events
            .lock()
            .iter()
            .filter(|event| event.version > watermark)
            .cloned()
            .collect();
        page.sort_by_key(|event| event.version);
        let limit = self.page_size.load(Ordering::Relaxed);
        if limit > 0 {
            page.truncate(limit);
        }
        Ok(page)
    }

    async fn max_version(&self) -> Result<Version, SourceError> {
        if self.fail_next_read.swap(false, Ordering::Relaxed) {
            return Err(SourceError::ReadError("injected read failure".into()));
        }
        Ok(self.next_version.load(Ordering::Relaxed))
    }

    async fn ensure_capture(&self, table: &TableId, repair: bool) -> Result<(), SourceError> {
        self.capture_checks.lock().push((table.clone(), repair));
        Ok(())
    }
}

// ── Row store ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct MemoryTableInner<T> {
    rows: Mutex<RowMap<T>>,
    fail_next_load: AtomicBool,
    delay_next_load: Mutex<Option<Duration>>,
    row_loads: AtomicU64,
    table_loads: AtomicU64,
}

/// In-memory backing table implementing [`ItemLoader`].
///
/// Clones share state, so tests can hand a clone to the engine and
/// keep mutating rows through the original.
#[derive(Debug)]
pub struct MemoryTable<T> {
    inner: Arc<MemoryTableInner<T>>,
}

impl<T> Clone for MemoryTable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(MemoryTableInner {
                rows: Mutex::new(RowMap::default()),
                fail_next_load: AtomicBool::new(false),
                delay_next_load: Mutex::new(None),
                row_loads: AtomicU64::new(0),
                table_loads: AtomicU64::new(0),
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row.
    pub fn insert(&self, id: RecordId, row: T) {
        self.inner.rows.lock().insert(id, row);
    }

    /// Removes a row.
    pub fn remove(&self, id: RecordId) {
        self.inner.rows.lock().remove(&id);
    }

    /// Number of rows currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.rows.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.rows.lock().is_empty()
    }

    /// Makes the next load (rows or table) fail.
    pub fn fail_next_load(&self) {
        self.inner.fail_next_load.store(true, Ordering::Relaxed);
    }

    /// Delays the next load (rows or table) by `delay`.
    pub fn delay_next_load(&self, delay: Duration) {
        *self.inner.delay_next_load.lock() = Some(delay);
    }

    /// Number of `load_rows` calls so far.
    #[must_use]
    pub fn row_loads(&self) -> u64 {
        self.inner.row_loads.load(Ordering::Relaxed)
    }

    /// Number of `load_table` calls so far.
    #[must_use]
    pub fn table_loads(&self) -> u64 {
        self.inner.table_loads.load(Ordering::Relaxed)
    }

    async fn injected(&self) -> Result<(), SourceError> {
        let delay = self.inner.delay_next_load.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_next_load.swap(false, Ordering::Relaxed) {
            return Err(SourceError::ReadError("injected load failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> ItemLoader for MemoryTable<T> {
    type Item = T;

    async fn load_rows(&self, ids: &[RecordId]) -> Result<RowMap<T>, SourceError> {
        self.injected().await?;
        self.inner.row_loads.fetch_add(1, Ordering::Relaxed);
        let rows = self.inner.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|row| (*id, row.clone())))
            .collect())
    }

    async fn load_table(&self) -> Result<RowMap<T>, SourceError> {
        self.injected().await?;
        self.inner.table_loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.inner.rows.lock().clone())
    }
}

// ── Recording listeners ─────────────────────────────────────────────────

/// One delta change set as seen by a recording listener, with ids and
/// rows sorted for stable assertions.
#[derive(Debug, Clone)]
pub struct DeltaRecord<T> {
    /// Created ids, sorted.
    pub created: Vec<RecordId>,
    /// Updated ids, sorted.
    pub updated: Vec<RecordId>,
    /// Deleted ids, sorted.
    pub deleted: Vec<RecordId>,
    /// Created and updated rows, sorted by id.
    pub upserted: Vec<(RecordId, T)>,
}

impl<T: Clone> DeltaRecord<T> {
    fn from_changes(changes: &ChangeSet<T>) -> Self {
        let mut created: Vec<_> = changes.created().iter().copied().collect();
        let mut updated: Vec<_> = changes.updated().iter().copied().collect();
        let mut deleted: Vec<_> = changes.deleted().iter().copied().collect();
        let mut upserted: Vec<_> = changes
            .upserted()
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect();
        created.sort_unstable();
        updated.sort_unstable();
        deleted.sort_unstable();
        upserted.sort_by_key(|(id, _)| *id);
        Self {
            created,
            updated,
            deleted,
            upserted,
        }
    }
}

/// Captures every delta change set delivered to it, in order.
#[derive(Debug, Default)]
pub struct RecordingDeltaListener<T = String> {
    seen: Mutex<Vec<DeltaRecord<T>>>,
}

impl<T: Clone> RecordingDeltaListener<T> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// All records captured so far.
    #[must_use]
    pub fn seen(&self) -> Vec<DeltaRecord<T>> {
        self.seen.lock().clone()
    }
}

impl<T: Clone + Send + Sync> DeltaListener<T> for RecordingDeltaListener<T> {
    fn on_changes(&self, changes: &ChangeSet<T>) {
        self.seen.lock().push(DeltaRecord::from_changes(changes));
    }
}

/// One mirror change set as seen by a recording listener.
#[derive(Debug, Clone)]
pub struct MirrorRecord<T> {
    /// Created ids, sorted.
    pub created: Vec<RecordId>,
    /// Updated ids, sorted.
    pub updated: Vec<RecordId>,
    /// Deleted ids, sorted.
    pub deleted: Vec<RecordId>,
    /// Created and updated rows, sorted by id.
    pub upserted: Vec<(RecordId, T)>,
    /// Obsolete rows, sorted by id.
    pub obsolete: Vec<(RecordId, T)>,
    /// Copy of the mirror as it looked during delivery (pre-update).
    pub mirror_at_delivery: RowMap<T>,
}

/// Captures every mirror change set delivered to it, in order.
#[derive(Debug, Default)]
pub struct RecordingMirrorListener<T = String> {
    seen: Mutex<Vec<MirrorRecord<T>>>,
}

impl<T: Clone> RecordingMirrorListener<T> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// All records captured so far.
    #[must_use]
    pub fn seen(&self) -> Vec<MirrorRecord<T>> {
        self.seen.lock().clone()
    }
}

impl<T: Clone + Send + Sync> MirrorListener<T> for RecordingMirrorListener<T> {
    fn on_changes(&self, changes: &MirrorChangeSet<T>) {
        let delta = DeltaRecord::from_changes(changes);
        let mut obsolete: Vec<_> = changes
            .obsolete()
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect();
        obsolete.sort_by_key(|(id, _)| *id);
        self.seen.lock().push(MirrorRecord {
            created: delta.created,
            updated: delta.updated,
            deleted: delta.deleted,
            upserted: delta.upserted,
            obsolete,
            mirror_at_delivery: changes.mirror().to_map(),
        });
    }
}

/// A listener that always panics. Delivery must survive it.
#[derive(Debug, Default)]
pub struct PanickingListener;

impl PanickingListener {
    /// Creates the panicking listener.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<T> DeltaListener<T> for PanickingListener {
    fn on_changes(&self, _changes: &ChangeSet<T>) {
        panic!("listener failure (injected)");
    }
}

impl<T: Clone> MirrorListener<T> for PanickingListener {
    fn on_changes(&self, _changes: &MirrorChangeSet<T>) {
        panic!("listener failure (injected)");
    }
}
