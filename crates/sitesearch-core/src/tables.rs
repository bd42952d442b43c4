//! Table definitions: which columns carry visibility and translation state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Page tree table.
pub const PAGES_TABLE: &str = "pages";
/// Content element table.
pub const CONTENT_TABLE: &str = "tt_content";
/// Queue item table.
pub const QUEUE_ITEM_TABLE: &str = "index_queue_item";
/// Indexing property side table.
pub const INDEXING_PROPERTY_TABLE: &str = "index_queue_indexing_property";

/// Standard page type.
pub const DOKTYPE_STANDARD: i64 = 1;
/// Mount point page type.
pub const DOKTYPE_MOUNT_POINT: i64 = 7;
/// Page types indexed unless configured otherwise.
pub const DEFAULT_ALLOWED_PAGE_TYPES: [i64; 2] = [DOKTYPE_STANDARD, DOKTYPE_MOUNT_POINT];

/// Control columns of a table.
///
/// `None` means the table has no such column and the related check is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDefinition {
    /// Soft delete flag
    pub delete_field: Option<String>,
    /// Hidden/disabled flag
    pub disabled_field: Option<String>,
    /// Publication start (unix timestamp, 0 = none)
    pub starttime_field: Option<String>,
    /// Publication end (unix timestamp, 0 = none)
    pub endtime_field: Option<String>,
    /// Comma separated frontend group list
    pub fe_group_field: Option<String>,
    /// Language id
    pub language_field: Option<String>,
    /// Uid of the default language record this one translates
    pub translation_parent_field: Option<String>,
    /// Last modification time
    pub tstamp_field: Option<String>,
    /// Draft workspace id (0 = live)
    pub workspace_field: Option<String>,
}

impl Default for TableDefinition {
    fn default() -> Self {
        Self {
            delete_field: Some("deleted".to_string()),
            disabled_field: Some("hidden".to_string()),
            starttime_field: Some("starttime".to_string()),
            endtime_field: Some("endtime".to_string()),
            fe_group_field: Some("fe_group".to_string()),
            language_field: Some("sys_language_uid".to_string()),
            translation_parent_field: Some("l10n_parent".to_string()),
            tstamp_field: Some("tstamp".to_string()),
            workspace_field: Some("t3ver_wsid".to_string()),
        }
    }
}

impl TableDefinition {
    /// A table without any control columns.
    #[must_use]
    pub fn bare() -> Self {
        Self {
            delete_field: None,
            disabled_field: None,
            starttime_field: None,
            endtime_field: None,
            fe_group_field: None,
            language_field: None,
            translation_parent_field: None,
            tstamp_field: None,
            workspace_field: None,
        }
    }

    /// Whether records of this table can be translations of other records.
    #[must_use]
    pub fn is_translatable(&self) -> bool {
        self.language_field.is_some() && self.translation_parent_field.is_some()
    }
}

/// Lookup of table definitions with a conventional fallback.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    definitions: HashMap<String, TableDefinition>,
    fallback: TableDefinition,
}

impl TableCatalog {
    /// Create a catalog where every table uses the conventional columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the definition of one table.
    pub fn register(&mut self, table: &str, definition: TableDefinition) {
        self.definitions.insert(table.to_string(), definition);
    }

    /// Builder variant of [`register`](Self::register).
    #[must_use]
    pub fn with_table(mut self, table: &str, definition: TableDefinition) -> Self {
        self.register(table, definition);
        self
    }

    /// Definition for a table.
    #[must_use]
    pub fn get(&self, table: &str) -> &TableDefinition {
        self.definitions.get(table).unwrap_or(&self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_table_uses_conventional_columns() {
        let catalog = TableCatalog::new();
        let def = catalog.get("tx_news_domain_model_news");
        assert_eq!(def.disabled_field.as_deref(), Some("hidden"));
        assert!(def.is_translatable());
    }

    #[test]
    fn test_registered_definition_wins() {
        let catalog = TableCatalog::new().with_table("sys_category", TableDefinition::bare());
        assert!(catalog.get("sys_category").disabled_field.is_none());
        assert!(!catalog.get("sys_category").is_translatable());
    }

    #[test]
    fn test_partial_definition_deserializes_with_defaults() {
        let def: TableDefinition =
            serde_json::from_str(r#"{"disabled_field": "disable"}"#).unwrap();
        assert_eq!(def.disabled_field.as_deref(), Some("disable"));
        assert_eq!(def.delete_field.as_deref(), Some("deleted"));
    }
}
