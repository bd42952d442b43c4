//! Column layout of the queue tables.
//!
//! Queue rows are exported in this shape so they can be inspected or loaded
//! into a relational database as-is.

use serde_json::Value;
use sitesearch_core::{QueueItem, Record, INDEXING_PROPERTY_TABLE, QUEUE_ITEM_TABLE};
use std::collections::BTreeMap;

/// Columns of the queue item table.
pub const QUEUE_ITEM_COLUMNS: &[&str] = &[
    "uid",
    "root",
    "item_type",
    "item_uid",
    "indexing_configuration",
    "indexing_priority",
    "changed",
    "indexed",
    "errors",
    "has_indexing_properties",
    "pages_mountidentifier",
];

/// Columns of the indexing property table.
pub const INDEXING_PROPERTY_COLUMNS: &[&str] =
    &["uid", "item_id", "property_key", "property_value"];

/// Row of the queue item table.
#[must_use]
pub fn queue_item_row(item: &QueueItem) -> Record {
    Record::new(QUEUE_ITEM_TABLE, item.id)
        .with("root", item.root)
        .with("item_type", item.item_type.as_str())
        .with("item_uid", item.item_uid)
        .with("indexing_configuration", item.indexing_configuration.as_str())
        .with("indexing_priority", item.indexing_priority)
        .with("changed", item.changed)
        .with("indexed", item.indexed)
        .with("errors", item.errors.as_str())
        .with("has_indexing_properties", i64::from(item.has_indexing_properties))
        .with(
            "pages_mountidentifier",
            item.mount_identifier
                .as_deref()
                .map_or(Value::String(String::new()), Value::from),
        )
}

/// Rows of the indexing property table for one item, numbered from `first_uid`.
#[must_use]
pub fn indexing_property_rows(
    item_id: i64,
    properties: &BTreeMap<String, String>,
    first_uid: i64,
) -> Vec<Record> {
    properties
        .iter()
        .zip(first_uid..)
        .map(|((key, value), uid)| {
            Record::new(INDEXING_PROPERTY_TABLE, uid)
                .with("item_id", item_id)
                .with("property_key", key.as_str())
                .with("property_value", value.as_str())
        })
        .collect()
}
