//! Eligibility rules: should a record be indexed, skipped, or removed.

use sitesearch_core::{
    Datastore, Record, Result, Site, SiteConfiguration, TableCatalog, DEFAULT_ALLOWED_PAGE_TYPES,
    DOKTYPE_MOUNT_POINT, PAGES_TABLE,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Decides indexability from record snapshots.
///
/// Pure apart from [`is_translation_parent_enabled`](Self::is_translation_parent_enabled),
/// which looks up the default language record.
#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    tables: Arc<TableCatalog>,
    allowed_page_types: Vec<i64>,
}

impl EligibilityEvaluator {
    /// Create an evaluator with the default page types.
    pub fn new(tables: Arc<TableCatalog>) -> Self {
        Self {
            tables,
            allowed_page_types: DEFAULT_ALLOWED_PAGE_TYPES.to_vec(),
        }
    }

    /// Builder: set the indexable page types.
    #[must_use]
    pub fn with_allowed_page_types(mut self, page_types: Vec<i64>) -> Self {
        self.allowed_page_types = page_types;
        self
    }

    /// Indexable page types.
    #[must_use]
    pub fn allowed_page_types(&self) -> &[i64] {
        &self.allowed_page_types
    }

    /// Table definitions in use.
    #[must_use]
    pub fn tables(&self) -> &TableCatalog {
        &self.tables
    }

    #[must_use]
    pub fn is_monitored_table(&self, site: &Site, table: &str) -> bool {
        site.configuration.is_monitored_table(table)
    }

    #[must_use]
    pub fn is_deleted(&self, table: &str, record: &Record) -> bool {
        self.tables
            .get(table)
            .delete_field
            .as_deref()
            .is_some_and(|field| record.flag(field))
    }

    #[must_use]
    pub fn is_hidden(&self, table: &str, record: &Record) -> bool {
        self.tables
            .get(table)
            .disabled_field
            .as_deref()
            .is_some_and(|field| record.flag(field))
    }

    #[must_use]
    pub fn is_start_time_in_future(&self, table: &str, record: &Record, now: i64) -> bool {
        self.tables
            .get(table)
            .starttime_field
            .as_deref()
            .is_some_and(|field| record.int(field) > now)
    }

    #[must_use]
    pub fn is_end_time_in_past(&self, table: &str, record: &Record, now: i64) -> bool {
        self.tables
            .get(table)
            .endtime_field
            .as_deref()
            .is_some_and(|field| {
                let endtime = record.int(field);
                endtime > 0 && endtime <= now
            })
    }

    #[must_use]
    pub fn is_indexable_page_type(&self, page: &Record) -> bool {
        self.allowed_page_types.contains(&page.int("doktype"))
    }

    /// Mount page whose mounted tree replaces the page itself.
    #[must_use]
    pub fn is_overlay_mount_point(&self, table: &str, record: &Record) -> bool {
        table == PAGES_TABLE
            && record.int("doktype") == DOKTYPE_MOUNT_POINT
            && record.int("mount_pid") > 0
            && record.flag("mount_pid_ol")
    }

    /// Page flagged to stay out of search.
    #[must_use]
    pub fn is_excluded_from_search(&self, page: &Record) -> bool {
        page.flag("no_search")
    }

    /// Whether the record should be in the index right now.
    #[must_use]
    pub fn is_enabled_record(&self, table: &str, record: &Record, now: i64) -> bool {
        if self.is_deleted(table, record)
            || self.is_hidden(table, record)
            || self.is_start_time_in_future(table, record, now)
            || self.is_end_time_in_past(table, record, now)
        {
            return false;
        }
        if table == PAGES_TABLE {
            return !self.is_excluded_from_search(record) && self.is_indexable_page_type(record);
        }
        true
    }

    /// Whether the record's index documents must be removed.
    ///
    /// Records that left their time window are only garbage when their queued
    /// copy was indexed before; never indexed records are left alone.
    #[must_use]
    pub fn is_garbage(
        &self,
        table: &str,
        record: &Record,
        now: i64,
        frontend_groups_removed: bool,
        queued_copy_indexed: bool,
    ) -> bool {
        if frontend_groups_removed || self.is_deleted(table, record) || self.is_hidden(table, record)
        {
            return true;
        }
        let out_of_time_window = self.is_start_time_in_future(table, record, now)
            || self.is_end_time_in_past(table, record, now);
        if out_of_time_window && queued_copy_indexed {
            return true;
        }
        table == PAGES_TABLE
            && (self.is_excluded_from_search(record) || !self.is_indexable_page_type(record))
    }

    /// Whether the record translates a default language record.
    #[must_use]
    pub fn is_localized_record(&self, table: &str, record: &Record) -> bool {
        let definition = self.tables.get(table);
        match (
            definition.language_field.as_deref(),
            definition.translation_parent_field.as_deref(),
        ) {
            (Some(language), Some(parent)) => record.int(language) > 0 && record.int(parent) > 0,
            _ => false,
        }
    }

    /// Language id of the record (0 when the table is not translatable).
    #[must_use]
    pub fn language_of(&self, table: &str, record: &Record) -> i64 {
        self.tables
            .get(table)
            .language_field
            .as_deref()
            .map_or(0, |field| record.int(field))
    }

    /// Uid the record is queued under: the default language uid for
    /// translations, unless the language runs in free content mode.
    #[must_use]
    pub fn translation_original_uid(
        &self,
        table: &str,
        record: &Record,
        site: &SiteConfiguration,
    ) -> i64 {
        if !self.is_localized_record(table, record)
            || site.is_free_content_mode(self.language_of(table, record))
        {
            return record.uid;
        }
        self.tables
            .get(table)
            .translation_parent_field
            .as_deref()
            .map_or(record.uid, |field| record.int(field))
    }

    /// Whether the default language record of a translation is enabled.
    /// Always true for records that are not translations.
    pub async fn is_translation_parent_enabled(
        &self,
        datastore: &dyn Datastore,
        table: &str,
        record: &Record,
        now: i64,
    ) -> Result<bool> {
        if !self.is_localized_record(table, record) {
            return Ok(true);
        }
        let Some(parent_field) = self.tables.get(table).translation_parent_field.clone() else {
            return Ok(true);
        };
        let parent = datastore
            .fetch_record(table, record.int(&parent_field))
            .await?;
        Ok(parent.is_some_and(|parent| self.is_enabled_record(table, &parent, now)))
    }

    /// Fields needed to decide visibility of a record.
    #[must_use]
    pub fn visibility_affecting_fields(&self, table: &str) -> Vec<String> {
        let definition = self.tables.get(table);
        let mut fields: Vec<String> = [
            &definition.delete_field,
            &definition.disabled_field,
            &definition.starttime_field,
            &definition.endtime_field,
            &definition.fe_group_field,
            &definition.language_field,
            &definition.translation_parent_field,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
        fields.push("pid".to_string());
        if table == PAGES_TABLE {
            for field in [
                "doktype",
                "no_search",
                "extendToSubpages",
                "no_search_sub_entries",
                "is_siteroot",
            ] {
                fields.push(field.to_string());
            }
        }
        fields
    }

    /// Whether a group that could see the indexed copy lost access.
    ///
    /// Group lists are comma separated; `""` and `"0"` mean public. Turning
    /// a public record into a restricted one also counts as removal.
    #[must_use]
    pub fn frontend_groups_removed(previous: &str, current: &str) -> bool {
        let parse = |groups: &str| -> BTreeSet<String> {
            groups
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty() && *group != "0")
                .map(str::to_string)
                .collect()
        };
        let previous = parse(previous);
        let current = parse(current);
        if previous.is_empty() {
            return !current.is_empty();
        }
        previous.difference(&current).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture, NOW};
    use sitesearch_core::{TableDefinition, CONTENT_TABLE};

    fn evaluator() -> EligibilityEvaluator {
        EligibilityEvaluator::new(Arc::new(TableCatalog::new()))
    }

    #[test]
    fn test_enabled_record() {
        let eval = evaluator();
        let content = Record::new(CONTENT_TABLE, 1).with("pid", 10);
        assert!(eval.is_enabled_record(CONTENT_TABLE, &content, NOW));
        assert!(!eval.is_enabled_record(CONTENT_TABLE, &content.clone().with("hidden", 1), NOW));
        assert!(!eval.is_enabled_record(CONTENT_TABLE, &content.clone().with("deleted", 1), NOW));
        assert!(!eval.is_enabled_record(
            CONTENT_TABLE,
            &content.clone().with("starttime", NOW + 10),
            NOW
        ));
        assert!(!eval.is_enabled_record(CONTENT_TABLE, &content.with("endtime", NOW), NOW));
    }

    #[test]
    fn test_page_rules() {
        let eval = evaluator();
        assert!(eval.is_enabled_record(PAGES_TABLE, &page(10, 1), NOW));
        assert!(eval.is_enabled_record(PAGES_TABLE, &page(10, 1).with("doktype", 7), NOW));
        assert!(!eval.is_enabled_record(PAGES_TABLE, &page(10, 1).with("doktype", 254), NOW));
        assert!(!eval.is_enabled_record(PAGES_TABLE, &page(10, 1).with("no_search", 1), NOW));

        let folders = evaluator().with_allowed_page_types(vec![1, 254]);
        assert!(folders.is_enabled_record(PAGES_TABLE, &page(10, 1).with("doktype", 254), NOW));
    }

    #[test]
    fn test_table_without_control_columns() {
        let tables = TableCatalog::new().with_table("sys_category", TableDefinition::bare());
        let eval = EligibilityEvaluator::new(Arc::new(tables));
        let category = Record::new("sys_category", 1).with("hidden", 1);
        assert!(eval.is_enabled_record("sys_category", &category, NOW));
        assert!(!eval.is_localized_record("sys_category", &category.with("l10n_parent", 3)));
    }

    #[test]
    fn test_eligibility_boundary_for_expired_records() {
        let eval = evaluator();
        let expired = Record::new("tx_news", 1).with("endtime", NOW - 1);

        assert!(!eval.is_garbage("tx_news", &expired, NOW, false, false));
        assert!(eval.is_garbage("tx_news", &expired, NOW, false, true));
    }

    #[test]
    fn test_garbage_rules() {
        let eval = evaluator();
        let news = Record::new("tx_news", 1);
        assert!(!eval.is_garbage("tx_news", &news, NOW, false, true));
        assert!(eval.is_garbage("tx_news", &news, NOW, true, false));
        assert!(eval.is_garbage("tx_news", &news.with("hidden", 1), NOW, false, false));
        assert!(eval.is_garbage(PAGES_TABLE, &page(10, 1).with("no_search", 1), NOW, false, false));
        assert!(eval.is_garbage(PAGES_TABLE, &page(10, 1).with("doktype", 199), NOW, false, false));
    }

    #[test]
    fn test_translation_original_uid() {
        let eval = evaluator();
        let mut site = SiteConfiguration::new(1, "example.org");
        site.languages.free_content_mode = vec![2];

        let translation = Record::new("tx_news", 7)
            .with("sys_language_uid", 1)
            .with("l10n_parent", 3);
        assert!(eval.is_localized_record("tx_news", &translation));
        assert_eq!(eval.translation_original_uid("tx_news", &translation, &site), 3);

        let free = translation.clone().with("sys_language_uid", 2);
        assert_eq!(eval.translation_original_uid("tx_news", &free, &site), 7);

        let original = Record::new("tx_news", 3);
        assert_eq!(eval.translation_original_uid("tx_news", &original, &site), 3);
    }

    #[tokio::test]
    async fn test_translation_of_hidden_parent_is_not_indexable() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 3).with("pid", 11).with("hidden", 1))
            .await;
        let translation = Record::new("tx_news", 7)
            .with("pid", 11)
            .with("sys_language_uid", 1)
            .with("l10n_parent", 3);

        let eval = evaluator();
        let enabled = eval
            .is_translation_parent_enabled(fixture.store.as_ref(), "tx_news", &translation, NOW)
            .await
            .unwrap();
        assert!(!enabled);

        let standalone = Record::new("tx_news", 8);
        assert!(eval
            .is_translation_parent_enabled(fixture.store.as_ref(), "tx_news", &standalone, NOW)
            .await
            .unwrap());
    }

    #[test]
    fn test_frontend_groups_removed() {
        assert!(EligibilityEvaluator::frontend_groups_removed("1,2", "1"));
        assert!(EligibilityEvaluator::frontend_groups_removed("", "3"));
        assert!(!EligibilityEvaluator::frontend_groups_removed("1", "1,2"));
        assert!(!EligibilityEvaluator::frontend_groups_removed("0", ""));
        assert!(!EligibilityEvaluator::frontend_groups_removed("2, 1", "1,2"));
    }

    #[test]
    fn test_visibility_fields() {
        let eval = evaluator();
        let fields = eval.visibility_affecting_fields(PAGES_TABLE);
        for field in ["hidden", "fe_group", "l10n_parent", "extendToSubpages", "pid"] {
            assert!(fields.iter().any(|f| f == field), "missing {field}");
        }
        assert!(!eval
            .visibility_affecting_fields("tx_news")
            .iter()
            .any(|f| f == "doktype"));
    }
}
