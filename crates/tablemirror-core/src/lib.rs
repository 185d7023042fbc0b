//! # `TableMirror` Core
//!
//! The change-detection cache engine for `TableMirror`. Database triggers
//! append row-level events to a change-log table; this crate turns those
//! events into consistent, ordered updates applied to in-process caches
//! of whole tables.
//!
//! This crate provides:
//! - **Change model**: [`ChangeEvent`], [`ChangeOp`], and the per-table
//!   [`ChangeBatch`] accumulator with its collapse rules
//! - **Change sets**: [`ChangeSet`] (delta payload) and
//!   [`MirrorChangeSet`] (delta payload plus obsolete rows and a live
//!   mirror view) delivered to listeners
//! - **Caches**: [`DeltaCache`] (stateless, forwards deltas) and
//!   [`MirrorCache`] (authoritative live mirror of a table)
//! - **Agent**: [`TableAgent`], the per-table bundle of loader, caches,
//!   snapshot store, and FIFO ordering gate
//! - **Collaborator traits**: [`ChangeLogSource`] and [`ItemLoader`],
//!   the two narrow contracts to the data-access layer
//!
//! ## Design Principles
//!
//! 1. **Per-table ordering** - batches apply in poll order via a FIFO
//!    ticket chain, while row loads for different batches may overlap
//! 2. **No global locks** - each table's listener lists and mirror map
//!    are guarded by that table's own locks
//! 3. **Best effort over the source of truth** - the caches are a
//!    performance layer; failed cycles re-read, failed rows are dropped
//!
//! ## Example
//!
//! ```rust,ignore
//! use tablemirror_core::{TableAgent, TableId};
//!
//! let agent = TableAgent::new(TableId::new("app", "users"), loader, metrics, closed);
//! let mirror = agent.mirror_cache().await?;
//! let user = mirror.get_or_fail(42)?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod changelog;
pub mod changeset;
pub mod delta_cache;
pub mod error;
pub mod identity;
pub mod listener;
pub mod metrics;
pub mod mirror_cache;
pub mod ordering;
pub mod snapshot;
pub mod source;
pub mod testing;

pub use agent::{ChangeSink, TableAgent};
pub use changelog::{ChangeBatch, ChangeEvent, ChangeOp, RecordId, Version};
pub use changeset::{ChangeSet, IdSet, MirrorChangeSet, MirrorReader, RowMap};
pub use delta_cache::DeltaCache;
pub use error::{CacheError, SourceError};
pub use identity::TableId;
pub use listener::{DeltaListener, MirrorListener};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use mirror_cache::MirrorCache;
pub use ordering::{FifoGate, Ticket};
pub use snapshot::SnapshotStore;
pub use source::{ChangeLogSource, ItemLoader};
