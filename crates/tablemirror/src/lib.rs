//! # `TableMirror`
//!
//! Keeps in-process caches of whole database tables synchronized with
//! concurrent writers. Database triggers append to a change-log table;
//! a background poller detects new entries, a per-table dispatch
//! pipeline loads the affected rows, and registered listeners receive
//! consistent, ordered change sets.
//!
//! The service object owns everything: no statics, no implicit
//! lifecycle. Build it, register tables, shut it down.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablemirror::{CaptureCheckMode, TableId, TableMirror};
//!
//! let mirror = TableMirror::builder()
//!     .poll_interval(std::time::Duration::from_millis(500))
//!     .capture_check(CaptureCheckMode::Warn)
//!     .start(Arc::new(change_log))
//!     .await?;
//!
//! let users = mirror
//!     .register_table(TableId::new("app", "users"), Arc::new(user_loader))
//!     .await?;
//!
//! // Delta side: stateless, forwards change sets.
//! users.delta().register(Arc::new(audit_listener)).await?;
//!
//! // Mirror side: live full-table map with a read API.
//! let cache = users.mirror().await?;
//! let user = cache.get_or_fail(42)?;
//!
//! mirror.shutdown().await;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod builder;
mod config;
mod error;
mod poller;
mod registry;
mod service;

pub use builder::MirrorBuilder;
pub use config::{CaptureCheckMode, MirrorConfig};
pub use error::MirrorError;
pub use service::{TableHandle, TableMirror};

pub use tablemirror_core::{
    CacheError, ChangeBatch, ChangeEvent, ChangeLogSource, ChangeOp, ChangeSet, DeltaCache,
    DeltaListener, IdSet, ItemLoader, MirrorCache, MirrorChangeSet, MirrorListener, MirrorReader,
    RecordId, RowMap, SourceError, SyncMetrics, SyncMetricsSnapshot, TableId, Version,
};

/// Testing utilities re-exported from the core crate.
pub use tablemirror_core::testing;
