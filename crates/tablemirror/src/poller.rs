//! Background change-log poller.
//!
//! One long-lived tokio task per service. Each cycle reads change-log
//! pages past the watermark until an empty page comes back, folds them
//! into per-table batches, hands the whole collection to the registry
//! in one call, and only then advances the watermark. A failed read
//! abandons the entire cycle, accumulated pages included, so the next
//! cycle re-reads the same window and delivery stays at-least-once.
//!
//! Shutdown is a oneshot signal checked between cycles; a cycle
//! cancelled mid-read dispatches nothing and advances nothing.

use std::sync::Arc;

use fxhash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tablemirror_core::changelog::accumulate;
use tablemirror_core::{ChangeBatch, ChangeLogSource, SyncMetrics, TableId, Version};

use crate::config::MirrorConfig;
use crate::registry::AgentRegistry;

pub(crate) fn spawn(
    source: Arc<dyn ChangeLogSource>,
    registry: Arc<AgentRegistry>,
    config: MirrorConfig,
    metrics: Arc<SyncMetrics>,
    initial_watermark: Version,
) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(poll_loop(
        source,
        registry,
        config,
        metrics,
        initial_watermark,
        shutdown_rx,
    ));
    (shutdown_tx, handle)
}

async fn poll_loop(
    source: Arc<dyn ChangeLogSource>,
    registry: Arc<AgentRegistry>,
    config: MirrorConfig,
    metrics: Arc<SyncMetrics>,
    mut watermark: Version,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tracing::debug!(watermark, "change poller started");
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::debug!(watermark, "change poller stopped");
                break;
            }
            () = tokio::time::sleep(config.poll_interval) => {
                if let Some(advanced) = run_cycle(&source, &registry, &config, &metrics, watermark).await {
                    watermark = advanced;
                }
            }
        }
    }
}

/// Runs one poll cycle. Returns the new watermark on success (possibly
/// unchanged), or `None` if the cycle was abandoned.
async fn run_cycle(
    source: &Arc<dyn ChangeLogSource>,
    registry: &Arc<AgentRegistry>,
    config: &MirrorConfig,
    metrics: &Arc<SyncMetrics>,
    watermark: Version,
) -> Option<Version> {
    let mut batches: FxHashMap<TableId, ChangeBatch> = FxHashMap::default();
    let mut high = watermark;
    let mut events_read = 0u64;

    loop {
        match source.changes_after(high).await {
            Ok(page) if page.is_empty() => break,
            Ok(page) => {
                events_read += page.len() as u64;
                high = page
                    .iter()
                    .map(|event| event.version)
                    .max()
                    .unwrap_or(high);
                accumulate(&mut batches, page);
            }
            Err(error) => {
                metrics.record_poll_error();
                tracing::error!(
                    watermark,
                    %error,
                    "change log read failed; retrying same window next cycle"
                );
                return None;
            }
        }
    }

    if events_read == 0 {
        return Some(watermark);
    }

    for (table, batch) in &batches {
        if config.log_changes {
            tracing::info!(
                table = %table,
                created = batch.created().len(),
                updated = batch.updated().len(),
                deleted = batch.deleted().len(),
                "table changes detected"
            );
        } else {
            tracing::debug!(
                table = %table,
                created = batch.created().len(),
                updated = batch.updated().len(),
                deleted = batch.deleted().len(),
                "table changes detected"
            );
        }
    }

    let dispatched = registry.dispatch(batches);
    metrics.record_cycle(events_read);
    tracing::debug!(
        events = events_read,
        dispatched,
        watermark = high,
        "poll cycle complete"
    );
    Some(high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use tablemirror_core::testing::{MemoryChangeLog, MemoryTable, RecordingDeltaListener};
    use tablemirror_core::{ChangeOp, ItemLoader};

    fn users() -> TableId {
        TableId::new("app", "users")
    }

    fn setup() -> (Arc<MemoryChangeLog>, Arc<AgentRegistry>, Arc<SyncMetrics>) {
        let metrics = Arc::new(SyncMetrics::new());
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&metrics),
            Arc::new(AtomicBool::new(false)),
        ));
        (Arc::new(MemoryChangeLog::new()), registry, metrics)
    }

    #[tokio::test]
    async fn test_cycle_reads_pages_until_empty() {
        let (log, registry, metrics) = setup();
        log.set_page_size(2);
        for id in 0..5 {
            log.push(&users(), id, ChangeOp::Insert);
        }

        let source: Arc<dyn ChangeLogSource> = log;
        let config = MirrorConfig::default();
        let advanced = run_cycle(&source, &registry, &config, &metrics, 0).await;

        assert_eq!(advanced, Some(5));
        assert_eq!(metrics.snapshot().events_total, 5);
    }

    #[tokio::test]
    async fn test_failed_cycle_does_not_advance() {
        let (log, registry, metrics) = setup();
        log.push(&users(), 1, ChangeOp::Insert);
        log.fail_next_read();

        let source: Arc<dyn ChangeLogSource> = Arc::clone(&log) as Arc<dyn ChangeLogSource>;
        let config = MirrorConfig::default();

        assert_eq!(run_cycle(&source, &registry, &config, &metrics, 0).await, None);
        assert_eq!(metrics.snapshot().poll_errors_total, 1);

        // Retry from the same watermark sees the event.
        let advanced = run_cycle(&source, &registry, &config, &metrics, 0).await;
        assert_eq!(advanced, Some(1));
    }

    #[tokio::test]
    async fn test_quiet_cycle_keeps_watermark() {
        let (log, registry, metrics) = setup();
        let source: Arc<dyn ChangeLogSource> = log;
        let config = MirrorConfig::default();

        let advanced = run_cycle(&source, &registry, &config, &metrics, 7).await;
        assert_eq!(advanced, Some(7));
        assert_eq!(metrics.snapshot().poll_cycles_total, 0);
    }

    #[tokio::test]
    async fn test_spawned_poller_delivers_and_stops() {
        let (log, registry, metrics) = setup();
        let table = MemoryTable::new();
        table.insert(1, "a".to_string());
        let loader: Arc<dyn ItemLoader<Item = String>> = Arc::new(table.clone());
        let (agent, _) = registry.get_or_create(users(), loader).unwrap();
        let listener = Arc::new(RecordingDeltaListener::new());
        agent.delta_cache().register(listener.clone()).await.unwrap();

        let config = MirrorConfig {
            poll_interval: Duration::from_millis(10),
            ..MirrorConfig::default()
        };
        let (shutdown, handle) = spawn(
            Arc::clone(&log) as Arc<dyn ChangeLogSource>,
            Arc::clone(&registry),
            config,
            metrics,
            0,
        );

        table.insert(2, "b".to_string());
        log.push(&users(), 2, ChangeOp::Insert);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = listener.seen();
        assert_eq!(seen.len(), 2, "initial snapshot plus one live batch");
        assert_eq!(seen[1].created, vec![2]);

        let _ = shutdown.send(());
        handle.await.unwrap();

        // Events after shutdown are never delivered.
        log.push(&users(), 3, ChangeOp::Insert);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.seen().len(), 2);
    }
}
