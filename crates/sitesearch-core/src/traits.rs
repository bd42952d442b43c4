//! Collaborator traits.
//!
//! The queue engine talks to the outside world only through these traits:
//!
//! - [`Datastore`]: content tables and the queue tables
//! - [`SiteConfigurationProvider`]: per-site indexing setup
//! - [`SearchEngineConnection`]: delete-by-query and commit against one core
//! - [`ConnectionManager`]: the search engine connections of a site

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{SearchEngineError, StoreError};
use crate::filter::RecordFilter;
use crate::types::{
    DeleteQuery, EngineMetadata, NewQueueItem, QueueInitializationSelect, QueueItem,
    QueueItemQuery, QueueItemUpdate, QueueWrite, Record, Site, SiteConfiguration, UpsertOutcome,
};

// ============================================================================
// Datastore
// ============================================================================

/// Relational storage of content and queue rows.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch one row, `None` if it does not exist.
    async fn fetch_record(&self, table: &str, uid: i64) -> Result<Option<Record>, StoreError>;

    /// All rows of a table matching the filter, ordered by uid.
    async fn find_records(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, StoreError>;

    /// Page ids below `root`, breadth first, excluding `root`.
    ///
    /// Only pages matching `filter` are returned and descended into. A
    /// `max_depth` of 0 means unlimited.
    async fn subpage_ids(
        &self,
        root: i64,
        max_depth: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<i64>, StoreError>;

    /// Name of the physical connection serving a table.
    fn connection_name(&self, table: &str) -> String;

    /// Queue items matching the query, ordered by id.
    async fn queue_items(&self, query: &QueueItemQuery) -> Result<Vec<QueueItem>, StoreError>;

    /// Insert the item, or refresh the existing row with the same key.
    ///
    /// A refresh raises `changed` monotonically and updates configuration and
    /// priority; it never touches `indexed` or `errors`.
    async fn upsert_queue_item(&self, item: &NewQueueItem) -> Result<UpsertOutcome, StoreError>;

    /// Apply an update to every selected item. Returns the affected rows.
    async fn update_queue_items(
        &self,
        query: &QueueItemQuery,
        update: &QueueItemUpdate,
    ) -> Result<u64, StoreError>;

    /// Delete the selected items and their indexing properties.
    async fn delete_queue_items(&self, query: &QueueItemQuery) -> Result<u64, StoreError>;

    /// `INSERT ... SELECT` of queue items from a content table.
    ///
    /// Only valid when the source table and the queue share a connection.
    async fn insert_queue_items_from_select(
        &self,
        select: &QueueInitializationSelect,
    ) -> Result<u64, StoreError>;

    /// Run the writes in one transaction: all apply or none do.
    async fn apply_queue_batch(&self, writes: &[QueueWrite]) -> Result<u64, StoreError>;

    /// Indexing properties of a queue item.
    async fn indexing_properties(
        &self,
        item_id: i64,
    ) -> Result<BTreeMap<String, String>, StoreError>;
}

// ============================================================================
// Sites
// ============================================================================

/// Source of site configurations.
#[async_trait]
pub trait SiteConfigurationProvider: Send + Sync {
    /// Configuration of the site rooted at the page, if any.
    async fn site_configuration(&self, root_page_id: i64) -> Option<Arc<SiteConfiguration>>;

    /// Root pages of all configured sites.
    async fn root_page_ids(&self) -> Vec<i64>;
}

// ============================================================================
// Search Engine
// ============================================================================

/// One search engine core.
#[async_trait]
pub trait SearchEngineConnection: Send + Sync {
    /// Delete matching documents; deleting nothing is not an error.
    async fn delete_by_query(&self, query: &DeleteQuery) -> Result<(), SearchEngineError>;

    /// Make pending changes visible.
    async fn commit(&self) -> Result<(), SearchEngineError>;

    /// Whether the core answers.
    async fn ping(&self) -> bool;

    /// Engine identification.
    async fn metadata(&self) -> Result<EngineMetadata, SearchEngineError>;
}

/// Resolves the search engine connections of a site.
pub trait ConnectionManager: Send + Sync {
    /// One connection per indexed language, as `(language_id, connection)`.
    fn connections(&self, site: &Site) -> Vec<(i64, Arc<dyn SearchEngineConnection>)>;
}
