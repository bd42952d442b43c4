//! JSON content snapshots.
//!
//! A snapshot maps table names to rows:
//!
//! ```json
//! {
//!   "pages": [{"uid": 1, "pid": 0, "is_siteroot": 1, "title": "Home"}],
//!   "tt_content": [{"uid": 5, "pid": 1, "header": "Welcome"}]
//! }
//! ```

use serde::{Deserialize, Serialize};
use sitesearch_core::{Record, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::memory::MemoryDatastore;

/// Rows of several tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentSnapshot {
    tables: BTreeMap<String, Vec<Record>>,
}

impl ContentSnapshot {
    /// Parse a snapshot from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut snapshot: Self = serde_json::from_str(json)?;
        for (table, rows) in &mut snapshot.tables {
            for row in rows {
                row.table.clone_from(table);
            }
        }
        Ok(snapshot)
    }

    /// Load a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json(&json)?;
        info!(
            "Loaded {} rows in {} tables from {:?}",
            snapshot.row_count(),
            snapshot.tables.len(),
            path
        );
        Ok(snapshot)
    }

    /// Write the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Build a snapshot from table rows.
    #[must_use]
    pub fn from_tables(tables: BTreeMap<String, Vec<Record>>) -> Self {
        Self { tables }
    }

    /// Rows of one table.
    #[must_use]
    pub fn rows(&self, table: &str) -> &[Record] {
        self.tables.get(table).map_or(&[], Vec::as_slice)
    }

    /// Total number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Datastore holding the snapshot's rows.
    pub async fn into_datastore(self) -> MemoryDatastore {
        let store = MemoryDatastore::new();
        for record in self.tables.into_values().flatten() {
            store.insert_record(record).await;
        }
        store
    }

    /// Snapshot of a datastore: content tables plus queue tables.
    pub async fn capture(store: &MemoryDatastore) -> Self {
        let mut tables = store.content_tables().await;
        tables.extend(store.queue_tables().await);
        Self { tables }
    }
}
