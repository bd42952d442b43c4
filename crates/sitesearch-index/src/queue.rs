//! Queue store: the durable, priority ordered work queue.

use sitesearch_core::{
    Datastore, MountFilter, NewQueueItem, QueueInitializationSelect, QueueItem, QueueItemQuery,
    QueueItemState, QueueItemUpdate, QueueStatistics, QueueWrite, Result, UpsertOutcome,
    QUEUE_ITEM_TABLE,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Queue change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueUpdate {
    ItemQueued {
        root: i64,
        item_type: String,
        item_uid: i64,
        inserted: bool,
    },
    ItemsRemoved {
        item_type: String,
        item_uid: i64,
        count: u64,
    },
    QueueInitialized {
        root: i64,
        item_type: String,
        configuration: String,
        rows: u64,
    },
    ItemIndexed {
        item_id: i64,
    },
    ItemFailed {
        item_id: i64,
        error: String,
    },
}

/// Queue operations on top of a [`Datastore`].
pub struct QueueStore {
    datastore: Arc<dyn Datastore>,
    update_tx: broadcast::Sender<QueueUpdate>,
}

impl QueueStore {
    /// Create a new queue store.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        let (update_tx, _) = broadcast::channel(256);
        Self {
            datastore,
            update_tx,
        }
    }

    /// Subscribe to queue updates.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueUpdate> {
        self.update_tx.subscribe()
    }

    fn notify(&self, update: QueueUpdate) {
        let _ = self.update_tx.send(update);
    }

    /// Insert the item or refresh its `changed` time, configuration and priority.
    pub async fn upsert_item(&self, item: &NewQueueItem) -> Result<UpsertOutcome> {
        let outcome = self.datastore.upsert_queue_item(item).await?;
        debug!(
            "Queued {}:{} for site {} (changed {}, {:?})",
            item.item_type, item.item_uid, item.root, item.changed, outcome
        );
        self.notify(QueueUpdate::ItemQueued {
            root: item.root,
            item_type: item.item_type.clone(),
            item_uid: item.item_uid,
            inserted: outcome.is_inserted(),
        });
        Ok(outcome)
    }

    /// Remove every queue row of a record, including mounted copies.
    pub async fn delete_item(&self, table: &str, uid: i64) -> Result<u64> {
        self.delete_items(&QueueItemQuery::for_item(table, uid)).await
    }

    /// Remove the record's queue rows of one site.
    pub async fn delete_item_for_root(&self, root: i64, table: &str, uid: i64) -> Result<u64> {
        self.delete_items(&QueueItemQuery::for_item(table, uid).with_root(root))
            .await
    }

    /// Remove the selected rows and their indexing properties.
    pub async fn delete_items(&self, query: &QueueItemQuery) -> Result<u64> {
        let count = self.datastore.delete_queue_items(query).await?;
        if count > 0 {
            debug!("Removed {} queue rows ({:?})", count, query);
            if let (Some(item_type), Some([item_uid])) =
                (query.item_type.as_ref(), query.item_uids.as_deref())
            {
                self.notify(QueueUpdate::ItemsRemoved {
                    item_type: item_type.clone(),
                    item_uid: *item_uid,
                    count,
                });
            }
        }
        Ok(count)
    }

    /// Remove a site's rows, optionally only those of one configuration.
    pub async fn delete_items_by_site(&self, root: i64, configuration: Option<&str>) -> Result<u64> {
        let mut query = QueueItemQuery::for_root(root);
        if let Some(name) = configuration {
            query = query.with_configuration(name);
        }
        self.delete_items(&query).await
    }

    /// Whether any row exists for the record.
    pub async fn contains_item(&self, table: &str, uid: i64) -> Result<bool> {
        Ok(!self.items(table, uid).await?.is_empty())
    }

    /// Whether a row without mount identifier exists for the record.
    pub async fn contains_unmounted_item(&self, table: &str, uid: i64) -> Result<bool> {
        let query = QueueItemQuery::for_item(table, uid).with_mount(MountFilter::Unmounted);
        Ok(!self.datastore.queue_items(&query).await?.is_empty())
    }

    /// Whether a row of the record was indexed at least once.
    pub async fn contains_indexed_item(&self, table: &str, uid: i64) -> Result<bool> {
        Ok(self
            .items(table, uid)
            .await?
            .iter()
            .any(|item| item.indexed > 0))
    }

    /// All rows of a record.
    pub async fn items(&self, table: &str, uid: i64) -> Result<Vec<QueueItem>> {
        Ok(self
            .datastore
            .queue_items(&QueueItemQuery::for_item(table, uid))
            .await?)
    }

    /// Rows selected by a query.
    pub async fn find_items(&self, query: &QueueItemQuery) -> Result<Vec<QueueItem>> {
        Ok(self.datastore.queue_items(query).await?)
    }

    /// Page rows of a site queued under a mount identifier.
    pub async fn mounted_items(&self, root: i64, mount_identifier: &str) -> Result<Vec<QueueItem>> {
        let query = QueueItemQuery::for_root(root)
            .with_type(sitesearch_core::PAGES_TABLE)
            .with_mount(MountFilter::Identifier(mount_identifier.to_string()));
        Ok(self.datastore.queue_items(&query).await?)
    }

    /// Page ids of a site queued under a mount identifier.
    pub async fn page_ids_by_mount_identifier(
        &self,
        root: i64,
        mount_identifier: &str,
    ) -> Result<Vec<i64>> {
        Ok(self
            .mounted_items(root, mount_identifier)
            .await?
            .iter()
            .map(|item| item.item_uid)
            .collect())
    }

    /// Indexing properties of a row.
    pub async fn indexing_properties(&self, item_id: i64) -> Result<BTreeMap<String, String>> {
        Ok(self.datastore.indexing_properties(item_id).await?)
    }

    /// Populate the queue from a content table.
    ///
    /// Runs as one set-based statement when the content table lives on the
    /// queue's connection, otherwise fetches the rows and inserts them in one
    /// batch. Either way nothing is inserted when the statement fails.
    pub async fn bulk_initialize(&self, select: &QueueInitializationSelect) -> Result<u64> {
        let source_connection = self.datastore.connection_name(&select.source_table);
        let rows = if source_connection == self.datastore.connection_name(QUEUE_ITEM_TABLE) {
            debug!(
                "Initializing {} with INSERT ... SELECT on '{}'",
                select.source_table, source_connection
            );
            self.datastore.insert_queue_items_from_select(select).await?
        } else {
            debug!(
                "Initializing {} across connections ('{}' to queue)",
                select.source_table, source_connection
            );
            let records = self
                .datastore
                .find_records(&select.source_table, &select.filter)
                .await?;
            let items: Vec<NewQueueItem> =
                records.iter().map(|record| select.new_item(record)).collect();
            if items.is_empty() {
                0
            } else {
                self.datastore
                    .apply_queue_batch(&[QueueWrite::Insert(items)])
                    .await?
            }
        };

        info!(
            "Queued {} {} rows for site {} ({})",
            rows, select.source_table, select.root, select.indexing_configuration
        );
        self.notify(QueueUpdate::QueueInitialized {
            root: select.root,
            item_type: select.source_table.clone(),
            configuration: select.indexing_configuration.clone(),
            rows,
        });
        Ok(rows)
    }

    /// Run writes in one transaction.
    pub async fn apply_batch(&self, writes: &[QueueWrite]) -> Result<u64> {
        Ok(self.datastore.apply_queue_batch(writes).await?)
    }

    /// Pending, error free rows of a site, highest priority first, then
    /// most recently changed.
    pub async fn items_to_index(&self, root: i64, limit: usize) -> Result<Vec<QueueItem>> {
        let query = QueueItemQuery::for_root(root).with_state(QueueItemState::Pending);
        let mut items = self.datastore.queue_items(&query).await?;
        items.sort_by(|a, b| {
            b.indexing_priority
                .cmp(&a.indexing_priority)
                .then(b.changed.cmp(&a.changed))
                .then(a.id.cmp(&b.id))
        });
        items.truncate(limit);
        Ok(items)
    }

    /// Record a successful indexing run.
    pub async fn mark_indexed(&self, item_id: i64, indexed_at: i64) -> Result<()> {
        let update = QueueItemUpdate {
            indexed: Some(indexed_at),
            errors: Some(String::new()),
            ..Default::default()
        };
        self.datastore
            .update_queue_items(&QueueItemQuery::new().with_ids(vec![item_id]), &update)
            .await?;
        self.notify(QueueUpdate::ItemIndexed { item_id });
        Ok(())
    }

    /// Record a failed indexing run.
    pub async fn mark_failed(&self, item_id: i64, error: &str) -> Result<()> {
        let update = QueueItemUpdate {
            errors: Some(error.to_string()),
            ..Default::default()
        };
        self.datastore
            .update_queue_items(&QueueItemQuery::new().with_ids(vec![item_id]), &update)
            .await?;
        self.notify(QueueUpdate::ItemFailed {
            item_id,
            error: error.to_string(),
        });
        Ok(())
    }

    /// Clear errors so failed rows are retried; all sites when `root` is `None`.
    pub async fn reset_errors(&self, root: Option<i64>) -> Result<u64> {
        let mut query = QueueItemQuery::new().with_state(QueueItemState::Erroneous);
        if let Some(root) = root {
            query = query.with_root(root);
        }
        let update = QueueItemUpdate {
            errors: Some(String::new()),
            ..Default::default()
        };
        Ok(self.datastore.update_queue_items(&query, &update).await?)
    }

    /// Row counts by state; all sites when `root` is `None`.
    pub async fn statistics(&self, root: Option<i64>) -> Result<QueueStatistics> {
        let query = root.map_or_else(QueueItemQuery::new, QueueItemQuery::for_root);
        let items = self.datastore.queue_items(&query).await?;
        Ok(QueueStatistics::from_items(&items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, NOW};
    use sitesearch_core::{MountPoint, RecordFilter};
    use sitesearch_store::MemoryDatastore;

    fn page_item(uid: i64, changed: i64) -> NewQueueItem {
        NewQueueItem::new(1, "pages", uid, "pages").changed_at(changed)
    }

    #[tokio::test]
    async fn test_idempotent_upsert() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();

        queue.upsert_item(&page_item(10, 100)).await.unwrap();
        queue.upsert_item(&page_item(10, 200)).await.unwrap();

        let items = queue.items("pages", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].changed, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_one_row() {
        let fixture = Fixture::new().await;
        let queue = Arc::new(fixture.queue());

        let handles: Vec<_> = (0..64)
            .map(|changed| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.upsert_item(&page_item(99, changed)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let items = queue.items("pages", 99).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].changed, 63);
    }

    #[tokio::test]
    async fn test_upsert_keeps_indexed_and_errors() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();

        let id = queue.upsert_item(&page_item(10, 100)).await.unwrap().id();
        queue.mark_indexed(id, 150).await.unwrap();
        queue.mark_failed(id, "timeout").await.unwrap();
        queue.upsert_item(&page_item(10, 300)).await.unwrap();

        let item = &queue.items("pages", 10).await.unwrap()[0];
        assert_eq!(item.indexed, 150);
        assert_eq!(item.errors, "timeout");
        assert_eq!(item.changed, 300);
        assert!(queue.contains_indexed_item("pages", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_then_delete_round_trip() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();
        let mount = MountPoint::new(30, 20, false);

        let id = queue
            .upsert_item(&page_item(31, 100).mounted(&mount))
            .await
            .unwrap()
            .id();
        assert!(!queue.indexing_properties(id).await.unwrap().is_empty());

        queue.delete_item("pages", 31).await.unwrap();
        assert!(!queue.contains_item("pages", 31).await.unwrap());
        assert!(queue.indexing_properties(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_contains_indexed_item_requires_indexing() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();
        queue.upsert_item(&page_item(10, 100)).await.unwrap();
        assert!(queue.contains_item("pages", 10).await.unwrap());
        assert!(!queue.contains_indexed_item("pages", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_item_for_root_keeps_other_sites() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();
        queue
            .upsert_item(&NewQueueItem::new(1, "tx_news", 3, "tx_news"))
            .await
            .unwrap();
        queue
            .upsert_item(&NewQueueItem::new(100, "tx_news", 3, "tx_news"))
            .await
            .unwrap();

        assert_eq!(queue.delete_item_for_root(1, "tx_news", 3).await.unwrap(), 1);
        let left = queue.items("tx_news", 3).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].root, 100);
    }

    #[tokio::test]
    async fn test_items_to_index_ordering() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();
        queue.upsert_item(&page_item(10, 100)).await.unwrap();
        queue.upsert_item(&page_item(11, 300)).await.unwrap();
        queue
            .upsert_item(&page_item(12, 50).with_priority(5))
            .await
            .unwrap();
        let done = queue.upsert_item(&page_item(13, 100)).await.unwrap().id();
        queue.mark_indexed(done, 200).await.unwrap();
        let failed = queue.upsert_item(&page_item(14, 100)).await.unwrap().id();
        queue.mark_failed(failed, "boom").await.unwrap();

        let uids: Vec<i64> = queue
            .items_to_index(1, 10)
            .await
            .unwrap()
            .iter()
            .map(|i| i.item_uid)
            .collect();
        assert_eq!(uids, vec![12, 11, 10]);

        let stats = queue.statistics(Some(1)).await.unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.erroneous, 1);

        assert_eq!(queue.reset_errors(None).await.unwrap(), 1);
        assert_eq!(queue.items_to_index(1, 2).await.unwrap().len(), 2);
        assert_eq!(queue.statistics(None).await.unwrap().erroneous, 0);
    }

    fn select() -> QueueInitializationSelect {
        QueueInitializationSelect {
            source_table: "pages".to_string(),
            filter: RecordFilter::eq("hidden", 0),
            root: 1,
            indexing_configuration: "pages".to_string(),
            indexing_priority: 0,
            changed_fields: vec!["tstamp".to_string()],
            mount_identifier: None,
            indexing_properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_bulk_initialize_paths_produce_identical_rows() {
        let shared = Fixture::new().await;
        let split_store = MemoryDatastore::new().with_connection("pages", "content");
        let split = Fixture::with_store(split_store, vec![Fixture::site_configuration()]).await;

        let shared_rows = shared.queue().bulk_initialize(&select()).await.unwrap();
        let split_rows = split.queue().bulk_initialize(&select()).await.unwrap();
        assert_eq!(shared_rows, split_rows);

        let strip = |items: Vec<QueueItem>| -> Vec<(i64, String, i64, i64)> {
            items
                .into_iter()
                .map(|i| (i.root, i.item_type, i.item_uid, i.changed))
                .collect()
        };
        let all = QueueItemQuery::new();
        assert_eq!(
            strip(shared.queue().find_items(&all).await.unwrap()),
            strip(split.queue().find_items(&all).await.unwrap())
        );
    }

    #[tokio::test]
    async fn test_bulk_initialize_failure_inserts_nothing() {
        let fixture = Fixture::new().await;
        fixture.store.reject_item("pages", 11).await;
        let queue = fixture.queue();

        let err = queue.bulk_initialize(&select()).await.unwrap_err();
        assert!(!err.is_store_wide());
        assert_eq!(queue.statistics(None).await.unwrap().total, 0);

        fixture.store.set_disconnected(true);
        let err = queue.bulk_initialize(&select()).await.unwrap_err();
        assert!(err.is_store_wide());
    }

    #[tokio::test]
    async fn test_subscribe_receives_updates() {
        let fixture = Fixture::new().await;
        let queue = fixture.queue();
        let mut updates = queue.subscribe();

        queue.upsert_item(&page_item(10, NOW)).await.unwrap();
        queue.delete_item("pages", 10).await.unwrap();

        assert_eq!(
            updates.recv().await.unwrap(),
            QueueUpdate::ItemQueued {
                root: 1,
                item_type: "pages".to_string(),
                item_uid: 10,
                inserted: true,
            }
        );
        assert!(matches!(
            updates.recv().await.unwrap(),
            QueueUpdate::ItemsRemoved { item_uid: 10, count: 1, .. }
        ));
    }
}
