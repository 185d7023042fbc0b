//! Fluent builder for `TableMirror` construction.

use std::sync::Arc;
use std::time::Duration;

use tablemirror_core::ChangeLogSource;

use crate::config::{CaptureCheckMode, MirrorConfig};
use crate::error::MirrorError;
use crate::service::TableMirror;

/// Fluent builder for constructing a [`TableMirror`] instance.
///
/// # Example
///
/// ```rust,ignore
/// let mirror = TableMirror::builder()
///     .poll_interval(Duration::from_millis(250))
///     .capture_check(CaptureCheckMode::Repair)
///     .start(Arc::new(change_log))
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct MirrorBuilder {
    config: MirrorConfig,
}

impl MirrorBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between change-log poll cycles.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the capture-trigger verification mode.
    #[must_use]
    pub fn capture_check(mut self, mode: CaptureCheckMode) -> Self {
        self.config.capture_check = mode;
        self
    }

    /// Logs detected per-table changes at info level.
    #[must_use]
    pub fn log_changes(mut self, enabled: bool) -> Self {
        self.config.log_changes = enabled;
        self
    }

    /// Starts the service: positions the watermark at the change log's
    /// current high version and spawns the background poller.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Source`] if the initial watermark read
    /// fails.
    pub async fn start(self, source: Arc<dyn ChangeLogSource>) -> Result<TableMirror, MirrorError> {
        TableMirror::start(source, self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablemirror_core::testing::MemoryChangeLog;

    #[tokio::test]
    async fn test_builder_defaults() {
        let mirror = MirrorBuilder::new()
            .start(Arc::new(MemoryChangeLog::new()))
            .await
            .unwrap();
        assert!(!mirror.is_closed());
        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn test_builder_options() {
        let mirror = MirrorBuilder::new()
            .poll_interval(Duration::from_millis(20))
            .capture_check(CaptureCheckMode::Skip)
            .log_changes(true)
            .start(Arc::new(MemoryChangeLog::new()))
            .await
            .unwrap();
        assert!(!mirror.is_closed());
        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_on_dead_source() {
        let log = MemoryChangeLog::new();
        log.fail_next_read();
        let result = MirrorBuilder::new().start(Arc::new(log)).await;
        assert!(matches!(result, Err(MirrorError::Source(_))));
    }
}
