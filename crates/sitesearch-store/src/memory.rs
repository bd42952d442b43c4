//! In-memory datastore.
//!
//! [`MemoryDatastore`] keeps content tables and the queue tables in memory.
//! It is the reference [`Datastore`] used by tests and the CLI.
//!
//! Every queue write holds the queue lock for its whole read-modify-write,
//! so concurrent upserts of one key cannot lose updates. When both locks are
//! needed they are taken in the order content tables, then queue.

use async_trait::async_trait;
use sitesearch_core::{
    Datastore, FieldMap, NewQueueItem, QueueInitializationSelect, QueueItem, QueueItemKey,
    QueueItemQuery, QueueItemUpdate, QueueWrite, Record, RecordFilter, StoreError, UpsertOutcome,
    PAGES_TABLE, QUEUE_ITEM_TABLE,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::schema::{indexing_property_rows, queue_item_row};

/// Connection name of tables without an explicit connection.
pub const DEFAULT_CONNECTION: &str = "default";

type Table = BTreeMap<i64, Record>;

#[derive(Debug, Clone, Default)]
struct QueueTables {
    next_id: i64,
    items: BTreeMap<i64, QueueItem>,
    properties: BTreeMap<i64, BTreeMap<String, String>>,
    rejected: HashSet<(String, i64)>,
}

impl QueueTables {
    fn find(&self, key: &QueueItemKey) -> Option<i64> {
        self.items
            .values()
            .find(|item| item.key() == *key)
            .map(|item| item.id)
    }

    fn check_accepted(&self, item: &NewQueueItem) -> Result<(), StoreError> {
        if self.rejected.contains(&(item.item_type.clone(), item.item_uid)) {
            return Err(StoreError::Insert(format!(
                "row {}:{} rejected by the database",
                item.item_type, item.item_uid
            )));
        }
        Ok(())
    }

    /// Insert all items or none; a key already present fails the whole set.
    fn insert_all(&mut self, items: &[NewQueueItem]) -> Result<u64, StoreError> {
        let mut keys = HashSet::new();
        for item in items {
            self.check_accepted(item)?;
            let key = item.key();
            if self.find(&key).is_some() || !keys.insert(key) {
                return Err(StoreError::Constraint(format!(
                    "duplicate queue item {}:{} for root {} (mount {:?})",
                    item.item_type, item.item_uid, item.root, item.mount_identifier
                )));
            }
        }
        for item in items {
            self.insert(item);
        }
        Ok(items.len() as u64)
    }

    fn insert(&mut self, item: &NewQueueItem) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.items.insert(
            id,
            QueueItem {
                id,
                root: item.root,
                item_type: item.item_type.clone(),
                item_uid: item.item_uid,
                indexing_configuration: item.indexing_configuration.clone(),
                indexing_priority: item.indexing_priority,
                changed: item.changed,
                indexed: 0,
                errors: String::new(),
                has_indexing_properties: !item.indexing_properties.is_empty(),
                mount_identifier: item.mount_identifier.clone(),
            },
        );
        if !item.indexing_properties.is_empty() {
            self.properties.insert(id, item.indexing_properties.clone());
        }
        id
    }

    fn set_properties(
        &mut self,
        item_id: i64,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let item = self
            .items
            .get_mut(&item_id)
            .ok_or_else(|| StoreError::Query(format!("queue item {item_id} does not exist")))?;
        item.has_indexing_properties = !properties.is_empty();
        if properties.is_empty() {
            self.properties.remove(&item_id);
        } else {
            self.properties.insert(item_id, properties.clone());
        }
        Ok(())
    }

    fn delete(&mut self, query: &QueueItemQuery) -> u64 {
        let ids: Vec<i64> = self
            .items
            .values()
            .filter(|item| query.matches(item))
            .map(|item| item.id)
            .collect();
        for id in &ids {
            self.items.remove(id);
            self.properties.remove(id);
        }
        ids.len() as u64
    }
}

/// In-memory content and queue tables.
///
/// # Example
///
/// ```rust
/// use sitesearch_core::{Datastore, NewQueueItem, QueueItemQuery, Record};
/// use sitesearch_store::MemoryDatastore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryDatastore::new();
/// store.insert_record(Record::new("pages", 1).with("is_siteroot", 1)).await;
///
/// store
///     .upsert_queue_item(&NewQueueItem::new(1, "pages", 1, "pages").changed_at(100))
///     .await?;
/// assert_eq!(store.queue_items(&QueueItemQuery::new()).await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    queue: Arc<RwLock<QueueTables>>,
    connections: HashMap<String, String>,
    disconnected: Arc<AtomicBool>,
}

impl MemoryDatastore {
    /// Create an empty datastore where every table shares one connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: serve a table from a separate connection.
    #[must_use]
    pub fn with_connection(mut self, table: &str, connection: &str) -> Self {
        self.connections
            .insert(table.to_string(), connection.to_string());
        self
    }

    /// Simulate a lost database connection: every operation fails.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Make every insert of this record into the queue fail.
    pub async fn reject_item(&self, item_type: &str, item_uid: i64) {
        self.queue
            .write()
            .await
            .rejected
            .insert((item_type.to_string(), item_uid));
    }

    fn check_connection(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "database connection lost".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert or replace a content row.
    pub async fn insert_record(&self, record: Record) {
        let mut tables = self.tables.write().await;
        tables
            .entry(record.table.clone())
            .or_default()
            .insert(record.uid, record);
    }

    /// Overlay field values on an existing row; returns the new row.
    pub async fn update_record(&self, table: &str, uid: i64, fields: &FieldMap) -> Option<Record> {
        let mut tables = self.tables.write().await;
        let record = tables.get_mut(table)?.get_mut(&uid)?;
        *record = record.merged_with(fields);
        Some(record.clone())
    }

    /// Physically delete a content row.
    pub async fn remove_record(&self, table: &str, uid: i64) -> Option<Record> {
        self.tables.write().await.get_mut(table)?.remove(&uid)
    }

    /// All content rows, by table.
    pub async fn content_tables(&self) -> BTreeMap<String, Vec<Record>> {
        self.tables
            .read()
            .await
            .iter()
            .map(|(name, rows)| (name.clone(), rows.values().cloned().collect()))
            .collect()
    }

    /// Queue tables rendered as rows, keyed by table name.
    pub async fn queue_tables(&self) -> BTreeMap<String, Vec<Record>> {
        let queue = self.queue.read().await;
        let items = queue.items.values().map(queue_item_row).collect();

        let mut properties = Vec::new();
        for (item_id, props) in &queue.properties {
            let first_uid = properties.len() as i64 + 1;
            properties.extend(indexing_property_rows(*item_id, props, first_uid));
        }

        BTreeMap::from([
            (QUEUE_ITEM_TABLE.to_string(), items),
            (
                sitesearch_core::INDEXING_PROPERTY_TABLE.to_string(),
                properties,
            ),
        ])
    }

    fn children_index(pages: Option<&Table>) -> HashMap<i64, Vec<&Record>> {
        let mut children: HashMap<i64, Vec<&Record>> = HashMap::new();
        for page in pages.into_iter().flat_map(BTreeMap::values) {
            children.entry(page.pid()).or_default().push(page);
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|page| (page.int("sorting"), page.uid));
        }
        children
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn fetch_record(&self, table: &str, uid: i64) -> Result<Option<Record>, StoreError> {
        self.check_connection()?;
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|rows| rows.get(&uid)).map(|record| {
            let mut record = record.clone();
            record.table = table.to_string();
            record
        }))
    }

    async fn find_records(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, StoreError> {
        self.check_connection()?;
        let tables = self.tables.read().await;
        let records: Vec<Record> = tables
            .get(table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| filter.matches(record))
            .map(|record| {
                let mut record = record.clone();
                record.table = table.to_string();
                record
            })
            .collect();
        debug!("Found {} {} rows matching '{}'", records.len(), table, filter);
        Ok(records)
    }

    async fn subpage_ids(
        &self,
        root: i64,
        max_depth: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<i64>, StoreError> {
        self.check_connection()?;
        let tables = self.tables.read().await;
        let children = Self::children_index(tables.get(PAGES_TABLE));

        let mut result = Vec::new();
        let mut visited = HashSet::from([root]);
        let mut pending = VecDeque::from([(root, 0usize)]);
        while let Some((page_id, depth)) = pending.pop_front() {
            if max_depth != 0 && depth >= max_depth {
                continue;
            }
            for child in children.get(&page_id).into_iter().flatten() {
                if !filter.matches(child) || !visited.insert(child.uid) {
                    continue;
                }
                result.push(child.uid);
                pending.push_back((child.uid, depth + 1));
            }
        }
        Ok(result)
    }

    fn connection_name(&self, table: &str) -> String {
        self.connections
            .get(table)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONNECTION.to_string())
    }

    async fn queue_items(&self, query: &QueueItemQuery) -> Result<Vec<QueueItem>, StoreError> {
        self.check_connection()?;
        let queue = self.queue.read().await;
        Ok(queue
            .items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect())
    }

    async fn upsert_queue_item(&self, item: &NewQueueItem) -> Result<UpsertOutcome, StoreError> {
        self.check_connection()?;
        let mut queue = self.queue.write().await;

        if let Some(id) = queue.find(&item.key()) {
            let update = QueueItemUpdate {
                changed: Some(item.changed),
                indexing_configuration: Some(item.indexing_configuration.clone()),
                indexing_priority: Some(item.indexing_priority),
                ..Default::default()
            };
            if let Some(existing) = queue.items.get_mut(&id) {
                update.apply(existing);
            }
            if !item.indexing_properties.is_empty() {
                queue.set_properties(id, &item.indexing_properties)?;
            }
            return Ok(UpsertOutcome::Updated(id));
        }

        queue.check_accepted(item)?;
        Ok(UpsertOutcome::Inserted(queue.insert(item)))
    }

    async fn update_queue_items(
        &self,
        query: &QueueItemQuery,
        update: &QueueItemUpdate,
    ) -> Result<u64, StoreError> {
        self.check_connection()?;
        let mut queue = self.queue.write().await;
        let mut affected = 0;
        for item in queue.items.values_mut().filter(|item| query.matches(item)) {
            update.apply(item);
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_queue_items(&self, query: &QueueItemQuery) -> Result<u64, StoreError> {
        self.check_connection()?;
        Ok(self.queue.write().await.delete(query))
    }

    async fn insert_queue_items_from_select(
        &self,
        select: &QueueInitializationSelect,
    ) -> Result<u64, StoreError> {
        self.check_connection()?;
        let source_connection = self.connection_name(&select.source_table);
        let queue_connection = self.connection_name(QUEUE_ITEM_TABLE);
        if source_connection != queue_connection {
            return Err(StoreError::Query(format!(
                "cannot select from {} ({}) into {} ({})",
                select.source_table, source_connection, QUEUE_ITEM_TABLE, queue_connection
            )));
        }

        let tables = self.tables.read().await;
        let items: Vec<NewQueueItem> = tables
            .get(&select.source_table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| select.filter.matches(record))
            .map(|record| select.new_item(record))
            .collect();

        let mut queue = self.queue.write().await;
        queue.insert_all(&items)
    }

    async fn apply_queue_batch(&self, writes: &[QueueWrite]) -> Result<u64, StoreError> {
        self.check_connection()?;
        let mut queue = self.queue.write().await;
        let mut staged = queue.clone();

        let mut affected = 0;
        for write in writes {
            affected += match write {
                QueueWrite::Insert(items) => staged.insert_all(items)?,
                QueueWrite::SetProperties {
                    item_id,
                    properties,
                } => {
                    staged.set_properties(*item_id, properties)?;
                    1
                }
                QueueWrite::Delete(query) => staged.delete(query),
            };
        }

        *queue = staged;
        Ok(affected)
    }

    async fn indexing_properties(
        &self,
        item_id: i64,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        self.check_connection()?;
        let queue = self.queue.read().await;
        Ok(queue.properties.get(&item_id).cloned().unwrap_or_default())
    }
}
