//! Listener traits and isolated delivery.
//!
//! Listeners are plain callbacks registered against a table's caches.
//! Delivery never lets one listener take down the pipeline: every
//! invocation is wrapped in a panic guard, and a panicking listener is
//! logged and counted while delivery continues to the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::changeset::{ChangeSet, MirrorChangeSet};
use crate::identity::TableId;
use crate::metrics::SyncMetrics;

/// Callback receiving delta change sets from a [`DeltaCache`].
///
/// [`DeltaCache`]: crate::delta_cache::DeltaCache
pub trait DeltaListener<T>: Send + Sync {
    /// Called with each delivered change set, in registration order
    /// across listeners and in poll order across batches.
    fn on_changes(&self, changes: &ChangeSet<T>);
}

/// Callback receiving mirror change sets from a [`MirrorCache`].
///
/// [`MirrorCache`]: crate::mirror_cache::MirrorCache
pub trait MirrorListener<T>: Send + Sync {
    /// Called with each delivered change set, before the mirror map is
    /// mutated for that batch.
    fn on_changes(&self, changes: &MirrorChangeSet<T>);
}

pub(crate) fn notify_delta<T>(
    table: &TableId,
    listener: &Arc<dyn DeltaListener<T>>,
    changes: &ChangeSet<T>,
    metrics: &SyncMetrics,
) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_changes(changes))).is_err() {
        metrics.record_listener_panic();
        tracing::error!(table = %table, "delta listener panicked; continuing delivery");
    }
}

pub(crate) fn notify_mirror<T>(
    table: &TableId,
    listener: &Arc<dyn MirrorListener<T>>,
    changes: &MirrorChangeSet<T>,
    metrics: &SyncMetrics,
) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_changes(changes))).is_err() {
        metrics.record_listener_panic();
        tracing::error!(table = %table, "mirror listener panicked; continuing delivery");
    }
}
