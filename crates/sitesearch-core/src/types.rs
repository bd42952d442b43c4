//! Core types for the index queue.
//!
//! ## Records
//! - [`Record`]: A row snapshot of any content table
//! - [`MutationSignal`]: An inbound content change
//! - [`RequestContext`]: Time and workspace of the request being processed
//!
//! ## Queue
//! - [`QueueItem`]: One unit of indexing work
//! - [`NewQueueItem`]: A queue item before the store assigned its id
//! - [`QueueItemQuery`]: Selection of queue items
//! - [`QueueInitializationSelect`]: Set-based queue population
//! - [`MountPoint`]: A mounted subtree and its identifier
//!
//! ## Sites
//! - [`Site`]: A resolved root content tree
//! - [`SiteConfiguration`]: Indexing setup of a site
//! - [`IndexingConfiguration`]: How one kind of record gets indexed
//! - [`RecursiveUpdateTrigger`]: When a page change cascades to its subtree
//!
//! ## Search engine
//! - [`DeleteQuery`]: Delete-by-query request
//! - [`SearchDocument`]: Identity of an indexed document

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{compare_values, RecordFilter};

/// Field name to value map of a row.
pub type FieldMap = BTreeMap<String, Value>;

/// Render a field value the way it would compare in SQL.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Integer view of a field value. Missing, empty and non-numeric values are 0.
#[must_use]
pub fn value_to_i64(value: &Value) -> i64 {
    match value {
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

// ============================================================================
// Records
// ============================================================================

/// A row of a content table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Table name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table: String,
    /// Row uid
    pub uid: i64,
    /// All other columns
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl Record {
    /// Create an empty record.
    pub fn new(table: impl Into<String>, uid: i64) -> Self {
        Self {
            table: table.into(),
            uid,
            fields: FieldMap::new(),
        }
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        if field == "uid" {
            self.uid = value_to_i64(&value.into());
        } else {
            self.fields.insert(field.to_string(), value.into());
        }
    }

    /// Raw value of a field; `uid` is served from the record identity.
    #[must_use]
    pub fn get(&self, field: &str) -> Value {
        if field == "uid" {
            return Value::from(self.uid);
        }
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Whether the record carries the field at all.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        field == "uid" || self.fields.contains_key(field)
    }

    /// Integer value of a field (0 when missing).
    #[must_use]
    pub fn int(&self, field: &str) -> i64 {
        if field == "uid" {
            return self.uid;
        }
        self.fields.get(field).map_or(0, value_to_i64)
    }

    /// Text value of a field ("" when missing).
    #[must_use]
    pub fn text(&self, field: &str) -> String {
        if field == "uid" {
            return self.uid.to_string();
        }
        self.fields.get(field).map(value_to_string).unwrap_or_default()
    }

    /// Boolean flag (`1`, `"1"`, `true`).
    #[must_use]
    pub fn flag(&self, field: &str) -> bool {
        self.int(field) != 0
    }

    /// Page id the record is stored on.
    #[must_use]
    pub fn pid(&self) -> i64 {
        self.int("pid")
    }

    /// Copy the record, overlaying the given field values.
    #[must_use]
    pub fn merged_with(&self, fields: &FieldMap) -> Self {
        let mut merged = self.clone();
        for (field, value) in fields {
            merged.set(field, value.clone());
        }
        merged
    }

    /// Copy the record keeping only the given fields.
    #[must_use]
    pub fn project(&self, fields: &[&str]) -> Self {
        let mut projected = Record::new(self.table.clone(), self.uid);
        for field in fields {
            if let Some(value) = self.fields.get(*field) {
                projected.fields.insert((*field).to_string(), value.clone());
            }
        }
        projected
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Kind of content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Move,
    VersionSwap,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::Move => "move",
            MutationKind::VersionSwap => "version_swap",
        };
        f.write_str(name)
    }
}

/// A content change emitted by the CMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSignal {
    /// What happened
    pub kind: MutationKind,
    /// Table of the changed record
    pub table: String,
    /// Uid of the changed record
    pub uid: i64,
    /// New values of the fields the mutation changed
    #[serde(default)]
    pub changed_fields: FieldMap,
    /// Values of the changed fields before the mutation
    #[serde(default)]
    pub previous_fields: FieldMap,
    /// Parent page before a move
    #[serde(default)]
    pub previous_parent_id: Option<i64>,
    /// Workspace the change happened in (0 = live)
    #[serde(default)]
    pub workspace_id: i64,
}

impl MutationSignal {
    fn new(kind: MutationKind, table: &str, uid: i64) -> Self {
        Self {
            kind,
            table: table.to_string(),
            uid,
            changed_fields: FieldMap::new(),
            previous_fields: FieldMap::new(),
            previous_parent_id: None,
            workspace_id: 0,
        }
    }

    /// A record was created.
    #[must_use]
    pub fn created(table: &str, uid: i64) -> Self {
        Self::new(MutationKind::Create, table, uid)
    }

    /// A record was updated.
    #[must_use]
    pub fn updated(table: &str, uid: i64) -> Self {
        Self::new(MutationKind::Update, table, uid)
    }

    /// A record was deleted.
    #[must_use]
    pub fn deleted(table: &str, uid: i64) -> Self {
        Self::new(MutationKind::Delete, table, uid)
    }

    /// A record was moved away from `previous_parent_id`.
    #[must_use]
    pub fn moved(table: &str, uid: i64, previous_parent_id: i64) -> Self {
        let mut signal = Self::new(MutationKind::Move, table, uid);
        signal.previous_parent_id = Some(previous_parent_id);
        signal
    }

    /// A draft version was swapped into live.
    #[must_use]
    pub fn version_swapped(table: &str, uid: i64) -> Self {
        Self::new(MutationKind::VersionSwap, table, uid)
    }

    /// Builder: record a field change from `previous` to `current`.
    #[must_use]
    pub fn with_change(
        mut self,
        field: &str,
        previous: impl Into<Value>,
        current: impl Into<Value>,
    ) -> Self {
        self.previous_fields.insert(field.to_string(), previous.into());
        self.changed_fields.insert(field.to_string(), current.into());
        self
    }

    /// Builder: set the workspace.
    #[must_use]
    pub fn in_workspace(mut self, workspace_id: i64) -> Self {
        self.workspace_id = workspace_id;
        self
    }

    /// Whether the change happened in the live workspace.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.workspace_id == 0
    }
}

/// Explicit per-request state threaded through every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Request time (unix seconds)
    pub now: i64,
    /// Workspace of the request (0 = live)
    pub workspace_id: i64,
}

impl RequestContext {
    /// Context for a live request at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now().timestamp())
    }

    /// Context for a live request at a fixed time.
    #[must_use]
    pub fn at(now: i64) -> Self {
        Self {
            now,
            workspace_id: 0,
        }
    }

    /// Whether the request runs in the live workspace.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.workspace_id == 0
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Derived state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemState {
    /// Changed after the last successful indexing run
    Pending,
    /// Last indexing run failed
    Erroneous,
    /// Up to date in the index
    Indexed,
}

/// One unit of indexing work: a record under a root site, optionally mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store assigned id
    pub id: i64,
    /// Root page of the site
    pub root: i64,
    /// Table of the record
    pub item_type: String,
    /// Uid of the record
    pub item_uid: i64,
    /// Indexing configuration name
    pub indexing_configuration: String,
    /// Higher is indexed sooner
    pub indexing_priority: i32,
    /// Last relevant change
    pub changed: i64,
    /// Last successful indexing (0 = never)
    pub indexed: i64,
    /// Last indexing error (empty = none)
    pub errors: String,
    /// Whether indexing properties are attached
    pub has_indexing_properties: bool,
    /// Mount identifier for mounted copies of a page
    pub mount_identifier: Option<String>,
}

impl QueueItem {
    /// Derived state.
    #[must_use]
    pub fn state(&self) -> QueueItemState {
        if !self.errors.is_empty() {
            QueueItemState::Erroneous
        } else if self.indexed < self.changed {
            QueueItemState::Pending
        } else {
            QueueItemState::Indexed
        }
    }

    /// Whether the item needs indexing.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.indexed < self.changed
    }

    /// Whether the last indexing run failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Unique key of the item.
    #[must_use]
    pub fn key(&self) -> QueueItemKey {
        QueueItemKey {
            root: self.root,
            item_type: self.item_type.clone(),
            item_uid: self.item_uid,
            mount_identifier: self.mount_identifier.clone(),
        }
    }
}

/// Unique key of a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueItemKey {
    pub root: i64,
    pub item_type: String,
    pub item_uid: i64,
    pub mount_identifier: Option<String>,
}

/// A queue item to insert or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub root: i64,
    pub item_type: String,
    pub item_uid: i64,
    pub indexing_configuration: String,
    pub indexing_priority: i32,
    pub changed: i64,
    #[serde(default)]
    pub mount_identifier: Option<String>,
    /// Properties stored alongside the item
    #[serde(default)]
    pub indexing_properties: BTreeMap<String, String>,
}

impl NewQueueItem {
    /// Create an unmounted item without properties.
    pub fn new(
        root: i64,
        item_type: impl Into<String>,
        item_uid: i64,
        indexing_configuration: impl Into<String>,
    ) -> Self {
        Self {
            root,
            item_type: item_type.into(),
            item_uid,
            indexing_configuration: indexing_configuration.into(),
            indexing_priority: 0,
            changed: 0,
            mount_identifier: None,
            indexing_properties: BTreeMap::new(),
        }
    }

    /// Builder: set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.indexing_priority = priority;
        self
    }

    /// Builder: set the changed time.
    #[must_use]
    pub fn changed_at(mut self, changed: i64) -> Self {
        self.changed = changed;
        self
    }

    /// Builder: tag the item as a mounted copy and attach the mount properties.
    #[must_use]
    pub fn mounted(mut self, mount_point: &MountPoint) -> Self {
        self.mount_identifier = Some(mount_point.identifier());
        self.indexing_properties.extend(mount_point.indexing_properties());
        self
    }

    /// Unique key of the item.
    #[must_use]
    pub fn key(&self) -> QueueItemKey {
        QueueItemKey {
            root: self.root,
            item_type: self.item_type.clone(),
            item_uid: self.item_uid,
            mount_identifier: self.mount_identifier.clone(),
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    /// Id of the affected row.
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }

    #[must_use]
    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Mount restriction of a queue item query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MountFilter {
    /// Mounted and unmounted items
    #[default]
    Any,
    /// Only items without mount identifier
    Unmounted,
    /// Only items with some mount identifier
    Mounted,
    /// Only items with this mount identifier
    Identifier(String),
}

impl MountFilter {
    fn accepts(&self, mount_identifier: Option<&str>) -> bool {
        match self {
            MountFilter::Any => true,
            MountFilter::Unmounted => mount_identifier.is_none(),
            MountFilter::Mounted => mount_identifier.is_some(),
            MountFilter::Identifier(id) => mount_identifier == Some(id.as_str()),
        }
    }
}

/// Selection of queue items. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueItemQuery {
    pub ids: Option<Vec<i64>>,
    pub root: Option<i64>,
    pub item_type: Option<String>,
    pub item_uids: Option<Vec<i64>>,
    pub indexing_configuration: Option<String>,
    pub mount: MountFilter,
    pub state: Option<QueueItemState>,
}

impl QueueItemQuery {
    /// Query matching every item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items of one record.
    #[must_use]
    pub fn for_item(item_type: &str, item_uid: i64) -> Self {
        Self::new().with_uids(item_type, vec![item_uid])
    }

    /// Items of one site.
    #[must_use]
    pub fn for_root(root: i64) -> Self {
        Self::new().with_root(root)
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub fn with_root(mut self, root: i64) -> Self {
        self.root = Some(root);
        self
    }

    #[must_use]
    pub fn with_type(mut self, item_type: &str) -> Self {
        self.item_type = Some(item_type.to_string());
        self
    }

    #[must_use]
    pub fn with_uids(mut self, item_type: &str, item_uids: Vec<i64>) -> Self {
        self.item_type = Some(item_type.to_string());
        self.item_uids = Some(item_uids);
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, name: &str) -> Self {
        self.indexing_configuration = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_mount(mut self, mount: MountFilter) -> Self {
        self.mount = mount;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: QueueItemState) -> Self {
        self.state = Some(state);
        self
    }

    /// Whether an item is selected.
    #[must_use]
    pub fn matches(&self, item: &QueueItem) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&item.id) {
                return false;
            }
        }
        if self.root.is_some_and(|root| root != item.root) {
            return false;
        }
        if self
            .item_type
            .as_deref()
            .is_some_and(|t| t != item.item_type)
        {
            return false;
        }
        if let Some(uids) = &self.item_uids {
            if !uids.contains(&item.item_uid) {
                return false;
            }
        }
        if self
            .indexing_configuration
            .as_deref()
            .is_some_and(|c| c != item.indexing_configuration)
        {
            return false;
        }
        if self.state.is_some_and(|s| s != item.state()) {
            return false;
        }
        self.mount.accepts(item.mount_identifier.as_deref())
    }
}

/// Field changes applied to selected queue items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueItemUpdate {
    /// New changed time; applied only when later than the stored one
    pub changed: Option<i64>,
    pub indexing_configuration: Option<String>,
    pub indexing_priority: Option<i32>,
    pub indexed: Option<i64>,
    pub errors: Option<String>,
}

impl QueueItemUpdate {
    /// Apply the update to an item.
    pub fn apply(&self, item: &mut QueueItem) {
        if let Some(changed) = self.changed {
            item.changed = item.changed.max(changed);
        }
        if let Some(name) = &self.indexing_configuration {
            item.indexing_configuration.clone_from(name);
        }
        if let Some(priority) = self.indexing_priority {
            item.indexing_priority = priority;
        }
        if let Some(indexed) = self.indexed {
            item.indexed = indexed;
        }
        if let Some(errors) = &self.errors {
            item.errors.clone_from(errors);
        }
    }
}

/// One statement of an atomic queue batch.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueWrite {
    /// Insert new items; any key conflict fails the batch
    Insert(Vec<NewQueueItem>),
    /// Replace the properties of an existing item
    SetProperties {
        item_id: i64,
        properties: BTreeMap<String, String>,
    },
    /// Delete the selected items and their properties
    Delete(QueueItemQuery),
}

/// Set-based queue population: every record of `source_table` matching
/// `filter` becomes one queue item.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInitializationSelect {
    pub source_table: String,
    pub filter: RecordFilter,
    pub root: i64,
    pub indexing_configuration: String,
    pub indexing_priority: i32,
    /// Fields whose maximum becomes the changed time
    pub changed_fields: Vec<String>,
    pub mount_identifier: Option<String>,
    pub indexing_properties: BTreeMap<String, String>,
}

impl QueueInitializationSelect {
    /// Queue item produced for one selected record.
    #[must_use]
    pub fn new_item(&self, record: &Record) -> NewQueueItem {
        let changed = self
            .changed_fields
            .iter()
            .map(|field| record.int(field))
            .max()
            .unwrap_or(0);
        NewQueueItem {
            root: self.root,
            item_type: self.source_table.clone(),
            item_uid: record.uid,
            indexing_configuration: self.indexing_configuration.clone(),
            indexing_priority: self.indexing_priority,
            changed,
            mount_identifier: self.mount_identifier.clone(),
            indexing_properties: self.indexing_properties.clone(),
        }
    }
}

// ============================================================================
// Mount Points
// ============================================================================

/// Indexing property: page the mounted subtree comes from.
pub const MOUNT_PAGE_SOURCE: &str = "mountPageSource";
/// Indexing property: page the subtree is mounted under.
pub const MOUNT_PAGE_DESTINATION: &str = "mountPageDestination";
/// Indexing property: marks mounted copies.
pub const IS_MOUNTED_PAGE: &str = "isMountedPage";

/// A subtree projected below another page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountPoint {
    /// Root of the mounted subtree
    pub source: i64,
    /// Mount page the subtree appears under
    pub destination: i64,
    /// Destination shows the source content itself
    pub overlay: bool,
}

impl MountPoint {
    #[must_use]
    pub fn new(source: i64, destination: i64, overlay: bool) -> Self {
        Self {
            source,
            destination,
            overlay,
        }
    }

    /// Identifier stored on queue items, `source-destination-overlay`.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.to_string()
    }

    /// Properties attached to every mounted queue item.
    #[must_use]
    pub fn indexing_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MOUNT_PAGE_SOURCE.to_string(), self.source.to_string()),
            (MOUNT_PAGE_DESTINATION.to_string(), self.destination.to_string()),
            (IS_MOUNTED_PAGE.to_string(), "1".to_string()),
        ])
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.source,
            self.destination,
            u8::from(self.overlay)
        )
    }
}

impl FromStr for MountPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfiguration(format!("invalid mount identifier '{s}'"));
        let parts: Vec<&str> = s.split('-').collect();
        let [source, destination, overlay] = parts.as_slice() else {
            return Err(invalid());
        };
        let source = source.parse().map_err(|_| invalid())?;
        let destination = destination.parse().map_err(|_| invalid())?;
        let overlay = match *overlay {
            "0" => false,
            "1" => true,
            _ => return Err(invalid()),
        };
        Ok(Self::new(source, destination, overlay))
    }
}

// ============================================================================
// Sites
// ============================================================================

/// How one kind of record gets indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingConfiguration {
    /// Configuration name (unique per site)
    pub name: String,
    /// Source table; defaults to the configuration name
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queue priority of the items
    #[serde(default)]
    pub priority: i32,
    /// Pages outside the site whose records are indexed too
    #[serde(default)]
    pub additional_page_ids: Vec<i64>,
    /// Extra restriction on the source records
    #[serde(default)]
    pub additional_where: Option<RecordFilter>,
    /// Page fields whose change requeues the subtree
    #[serde(default)]
    pub recursive_update_fields: Vec<String>,
    /// Initializer name; derived from the table when unset
    #[serde(default)]
    pub initializer: Option<String>,
}

fn default_true() -> bool {
    true
}

impl IndexingConfiguration {
    /// Enabled configuration indexing `table` under its own name.
    pub fn for_table(table: &str) -> Self {
        Self {
            name: table.to_string(),
            table: None,
            enabled: true,
            priority: 0,
            additional_page_ids: Vec::new(),
            additional_where: None,
            recursive_update_fields: Vec::new(),
            initializer: None,
        }
    }

    /// Source table.
    #[must_use]
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Initializer that populates the queue for this configuration.
    #[must_use]
    pub fn initializer_name(&self) -> &str {
        match self.initializer.as_deref() {
            Some(name) => name,
            None if self.table() == crate::tables::PAGES_TABLE => "page",
            None => "record",
        }
    }

    /// Whether the record passes the additional filter.
    #[must_use]
    pub fn accepts(&self, record: &Record) -> bool {
        self.additional_where
            .as_ref()
            .map_or(true, |filter| filter.matches(record))
    }
}

/// Language setup of a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfiguration {
    /// Default language id
    pub default_language_id: i64,
    /// All language ids the site is indexed in
    pub available: Vec<i64>,
    /// Languages whose records are independent of the default language
    pub free_content_mode: Vec<i64>,
}

/// Indexing setup of one site, as provided by the CMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfiguration {
    /// Root page of the site
    pub root_page_id: i64,
    /// Site domain
    pub domain: String,
    /// Installation secret mixed into the site hash
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub languages: LanguageConfiguration,
    /// Whether deletes are followed by a commit
    #[serde(default = "default_true")]
    pub enable_commits: bool,
    /// Extra restriction on the site's page tree
    #[serde(default)]
    pub initial_pages_additional_where: Option<RecordFilter>,
    /// Indexing configurations
    #[serde(default, rename = "indexing")]
    pub indexing_configurations: Vec<IndexingConfiguration>,
}

impl SiteConfiguration {
    /// Site without indexing configurations.
    pub fn new(root_page_id: i64, domain: impl Into<String>) -> Self {
        Self {
            root_page_id,
            domain: domain.into(),
            encryption_key: String::new(),
            languages: LanguageConfiguration::default(),
            enable_commits: true,
            initial_pages_additional_where: None,
            indexing_configurations: Vec::new(),
        }
    }

    /// Builder: add an indexing configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: IndexingConfiguration) -> Self {
        self.indexing_configurations.push(configuration);
        self
    }

    /// Enabled indexing configurations.
    pub fn enabled_configurations(&self) -> impl Iterator<Item = &IndexingConfiguration> {
        self.indexing_configurations.iter().filter(|c| c.enabled)
    }

    /// Tables with at least one enabled configuration.
    #[must_use]
    pub fn monitored_tables(&self) -> BTreeSet<&str> {
        self.enabled_configurations()
            .map(IndexingConfiguration::table)
            .collect()
    }

    #[must_use]
    pub fn is_monitored_table(&self, table: &str) -> bool {
        self.enabled_configurations().any(|c| c.table() == table)
    }

    /// Enabled configuration by name.
    #[must_use]
    pub fn indexing_configuration(&self, name: &str) -> Option<&IndexingConfiguration> {
        self.enabled_configurations().find(|c| c.name == name)
    }

    /// First enabled configuration of `table` accepting the record.
    #[must_use]
    pub fn indexing_configuration_for_record(
        &self,
        table: &str,
        record: &Record,
    ) -> Option<&IndexingConfiguration> {
        self.enabled_configurations()
            .find(|c| c.table() == table && c.accepts(record))
    }

    /// Whether any configuration of `table` lists the page as additional page.
    #[must_use]
    pub fn observes_page(&self, table: &str, page_id: i64) -> bool {
        self.enabled_configurations()
            .any(|c| c.table() == table && c.additional_page_ids.contains(&page_id))
    }

    /// Whether records of the language are indexed independently.
    #[must_use]
    pub fn is_free_content_mode(&self, language: i64) -> bool {
        self.languages.free_content_mode.contains(&language)
    }

    /// Check the configuration for operator errors.
    pub fn validate(&self) -> Result<()> {
        if self.root_page_id <= 0 {
            return Err(Error::InvalidConfiguration(format!(
                "site '{}' has no root page",
                self.domain
            )));
        }
        let mut names = BTreeSet::new();
        for configuration in &self.indexing_configurations {
            if configuration.name.is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "site {} has an indexing configuration without name",
                    self.root_page_id
                )));
            }
            if !names.insert(configuration.name.as_str()) {
                return Err(Error::InvalidConfiguration(format!(
                    "site {} defines indexing configuration '{}' twice",
                    self.root_page_id, configuration.name
                )));
            }
        }
        Ok(())
    }
}

/// A resolved root content tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub root_page_id: i64,
    pub domain: String,
    /// Stable fingerprint of domain and secret
    pub site_hash: String,
    pub default_language_id: i64,
    pub available_language_ids: Vec<i64>,
    pub configuration: Arc<SiteConfiguration>,
}

impl Site {
    /// Build a site from its configuration.
    #[must_use]
    pub fn new(configuration: Arc<SiteConfiguration>) -> Self {
        let languages = &configuration.languages;
        let mut available: Vec<i64> = languages.available.clone();
        available.push(languages.default_language_id);
        available.sort_unstable();
        available.dedup();

        Self {
            root_page_id: configuration.root_page_id,
            domain: configuration.domain.clone(),
            site_hash: Self::compute_site_hash(&configuration.domain, &configuration.encryption_key),
            default_language_id: languages.default_language_id,
            available_language_ids: available,
            configuration,
        }
    }

    /// Site hash of a domain.
    #[must_use]
    pub fn compute_site_hash(domain: &str, encryption_key: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(encryption_key.as_bytes());
        hasher.update(b"sitesearch");
        hasher.finalize().to_hex().to_string()
    }
}

/// Declarative rule deciding when a page change cascades to its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursiveUpdateTrigger {
    /// Rule name for logs
    #[serde(default)]
    pub name: String,
    /// Constraints on the live record
    #[serde(default)]
    pub current_state: BTreeMap<String, String>,
    /// Constraints on the changed fields
    pub change_set: BTreeMap<String, String>,
}

impl RecursiveUpdateTrigger {
    pub fn new<const C: usize, const S: usize>(
        name: &str,
        current_state: [(&str, &str); C],
        change_set: [(&str, &str); S],
    ) -> Self {
        Self {
            name: name.to_string(),
            current_state: owned_pairs(&current_state),
            change_set: owned_pairs(&change_set),
        }
    }

    /// Reject rules that would fire on every change.
    pub fn validate(&self) -> Result<()> {
        if self.change_set.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "recursive update trigger '{}' has an empty change set",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether the live record and the changed fields satisfy the rule.
    ///
    /// The live record is compared like a filter: a missing field equals `0`.
    #[must_use]
    pub fn matches(&self, current: &Record, changed_fields: &FieldMap) -> bool {
        let current_ok = self
            .current_state
            .iter()
            .all(|(field, expected)| same_value(&current.text(field), expected));
        let changes_ok = self.change_set.iter().all(|(field, expected)| {
            changed_fields
                .get(field)
                .is_some_and(|value| value_to_string(value) == *expected)
        });
        current_ok && changes_ok
    }
}

fn same_value(actual: &str, expected: &str) -> bool {
    compare_values(actual, expected) == std::cmp::Ordering::Equal
}

fn owned_pairs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ============================================================================
// Reports
// ============================================================================

/// Queue item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total: usize,
    pub pending: usize,
    pub indexed: usize,
    pub erroneous: usize,
}

impl QueueStatistics {
    /// Count items by state.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a QueueItem>) -> Self {
        let mut stats = Self::default();
        for item in items {
            stats.total += 1;
            match item.state() {
                QueueItemState::Pending => stats.pending += 1,
                QueueItemState::Indexed => stats.indexed += 1,
                QueueItemState::Erroneous => stats.erroneous += 1,
            }
        }
        stats
    }
}

/// Outcome of initializing one indexing configuration of a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationStatus {
    /// Whether every step succeeded
    pub initialized: bool,
    pub table: String,
    pub configuration_name: String,
    pub rows_affected: u64,
    /// First error, if any
    pub error: Option<String>,
    /// Operator-visible warnings
    pub messages: Vec<String>,
}

// ============================================================================
// Search Engine
// ============================================================================

/// Identity fields of an indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub item_type: String,
    pub uid: i64,
    pub pid: i64,
    pub site_hash: String,
    pub language: i64,
}

/// Delete-by-query request scoped to one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteQuery {
    pub item_type: String,
    pub uid: Option<i64>,
    pub pid: Option<i64>,
    pub site_hash: String,
    pub language: Option<i64>,
}

impl DeleteQuery {
    /// Delete every document of `item_type` in the site.
    pub fn new(item_type: &str, site_hash: &str) -> Self {
        Self {
            item_type: item_type.to_string(),
            uid: None,
            pid: None,
            site_hash: site_hash.to_string(),
            language: None,
        }
    }

    #[must_use]
    pub fn uid(mut self, uid: i64) -> Self {
        self.uid = Some(uid);
        self
    }

    #[must_use]
    pub fn pid(mut self, pid: i64) -> Self {
        self.pid = Some(pid);
        self
    }

    #[must_use]
    pub fn language(mut self, language: i64) -> Self {
        self.language = Some(language);
        self
    }

    /// Whether the query selects the document.
    #[must_use]
    pub fn matches(&self, document: &SearchDocument) -> bool {
        document.item_type == self.item_type
            && document.site_hash == self.site_hash
            && self.uid.map_or(true, |uid| uid == document.uid)
            && self.pid.map_or(true, |pid| pid == document.pid)
            && self.language.map_or(true, |l| l == document.language)
    }
}

impl fmt::Display for DeleteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type:{}", self.item_type)?;
        if let Some(uid) = self.uid {
            write!(f, " AND uid:{uid}")?;
        }
        if let Some(pid) = self.pid {
            write!(f, " AND pid:{pid}")?;
        }
        write!(f, " AND siteHash:{}", self.site_hash)?;
        if let Some(language) = self.language {
            write!(f, " AND language:{language}")?;
        }
        Ok(())
    }
}

/// Search engine identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub name: String,
    pub version: String,
}
