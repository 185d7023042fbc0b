//! Configuration for a `TableMirror` instance.

use std::fmt;
use std::time::Duration;

/// How to handle change-capture trigger verification when a table is
/// registered for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureCheckMode {
    /// Don't check; capture setup is managed elsewhere.
    Skip,
    /// Check and log a warning if capture looks broken.
    #[default]
    Warn,
    /// Check and attempt to recreate missing triggers.
    Repair,
}

impl fmt::Display for CaptureCheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureCheckMode::Skip => write!(f, "skip"),
            CaptureCheckMode::Warn => write!(f, "warn"),
            CaptureCheckMode::Repair => write!(f, "repair"),
        }
    }
}

/// Configuration for a [`TableMirror`](crate::TableMirror) instance.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Interval between change-log poll cycles.
    pub poll_interval: Duration,
    /// Capture-trigger verification mode for newly registered tables.
    pub capture_check: CaptureCheckMode,
    /// Log detected per-table changes at info level instead of debug.
    pub log_changes: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            capture_check: CaptureCheckMode::default(),
            log_changes: false,
        }
    }
}
