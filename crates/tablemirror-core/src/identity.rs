//! Table identity.
//!
//! [`TableId`] is the canonical key for all per-table state in the
//! engine: the agent registry, change batches, and log fields. It is
//! recomputed for every change-log event, so the two name components
//! are held as shared `Arc<str>` slices and clones are two reference
//! bumps.

use std::fmt;
use std::sync::Arc;

/// Identity of a watched table: catalog (schema) plus table name.
///
/// Ordered lexicographically by catalog, then table. Cheap to clone;
/// clone freely instead of passing references across task boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    catalog: Arc<str>,
    table: Arc<str>,
}

impl TableId {
    /// Creates a table identity from catalog and table names.
    #[must_use]
    pub fn new(catalog: impl AsRef<str>, table: impl AsRef<str>) -> Self {
        Self {
            catalog: Arc::from(catalog.as_ref()),
            table: Arc::from(table.as_ref()),
        }
    }

    /// Returns the catalog (schema) name.
    #[must_use]
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.catalog, self.table)
    }
}
