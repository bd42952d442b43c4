//! Initializer for plain record tables.

use super::Initializer;
use crate::eligibility::EligibilityEvaluator;
use crate::queue::QueueStore;
use crate::site::SiteResolver;
use async_trait::async_trait;
use sitesearch_core::{
    IndexingConfiguration, InitializationStatus, Operator, QueueInitializationSelect,
    RecordFilter, RequestContext, Result, Site, PAGES_TABLE,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Queues every eligible record of a table stored in the site.
#[derive(Clone)]
pub struct RecordInitializer {
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    queue: Arc<QueueStore>,
}

impl RecordInitializer {
    pub fn new(
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        queue: Arc<QueueStore>,
    ) -> Self {
        Self {
            resolver,
            eligibility,
            queue,
        }
    }

    /// Records that may be indexed right now, wherever they are stored.
    ///
    /// Not deleted, not hidden, inside the time window, default language or
    /// standalone translation, live workspace; pages additionally need an
    /// indexable type and must not be excluded from search.
    #[must_use]
    pub fn eligibility_filter(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> RecordFilter {
        let table = configuration.table();
        let definition = self.eligibility.tables().get(table);
        let mut filter = RecordFilter::all();

        if let Some(field) = &definition.delete_field {
            filter = filter.and(RecordFilter::eq(field, 0));
        }
        if let Some(field) = &definition.disabled_field {
            filter = filter.and(RecordFilter::eq(field, 0));
        }
        if let Some(field) = &definition.starttime_field {
            filter = filter.and(RecordFilter::compare(field, Operator::Le, ctx.now));
        }
        if let Some(field) = &definition.endtime_field {
            filter = filter.and(
                RecordFilter::eq(field, 0).or(RecordFilter::compare(field, Operator::Gt, ctx.now)),
            );
        }
        if let (Some(language), Some(parent)) = (
            &definition.language_field,
            &definition.translation_parent_field,
        ) {
            let mut translation = RecordFilter::compare(language, Operator::Le, 0)
                .or(RecordFilter::eq(parent, 0));
            let free = &site.configuration.languages.free_content_mode;
            if !free.is_empty() {
                translation = translation.or(RecordFilter::in_list(language, free));
            }
            filter = filter.and(translation);
        }
        if let Some(field) = &definition.workspace_field {
            filter = filter.and(RecordFilter::eq(field, 0));
        }
        if table == PAGES_TABLE {
            filter = filter
                .and(RecordFilter::in_list(
                    "doktype",
                    self.eligibility.allowed_page_types(),
                ))
                .and(RecordFilter::eq("no_search", 0));
        }
        if let Some(additional) = &configuration.additional_where {
            filter = filter.and(additional.clone());
        }
        filter
    }

    /// Pages of the site plus the configuration's additional pages.
    pub async fn site_page_ids(
        &self,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<Vec<i64>> {
        let tree_filter = site
            .configuration
            .initial_pages_additional_where
            .clone()
            .unwrap_or_default();
        let mut pages = self
            .resolver
            .page_tree(site.root_page_id, &tree_filter)
            .await?;
        for page_id in &configuration.additional_page_ids {
            if !pages.contains(page_id) {
                pages.push(*page_id);
            }
        }
        Ok(pages)
    }

    /// Set-based selection of the configuration's queue items.
    pub async fn select(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<QueueInitializationSelect> {
        let table = configuration.table();
        let pages = self.site_page_ids(site, configuration).await?;
        let location = if table == PAGES_TABLE {
            RecordFilter::in_list("uid", &pages)
        } else {
            RecordFilter::in_list("pid", &pages)
        };
        let definition = self.eligibility.tables().get(table);
        let changed_fields = [&definition.tstamp_field, &definition.starttime_field]
            .into_iter()
            .flatten()
            .cloned()
            .collect();

        Ok(QueueInitializationSelect {
            source_table: table.to_string(),
            filter: location.and(self.eligibility_filter(ctx, site, configuration)),
            root: site.root_page_id,
            indexing_configuration: configuration.name.clone(),
            indexing_priority: configuration.priority,
            changed_fields,
            mount_identifier: None,
            indexing_properties: BTreeMap::new(),
        })
    }
}

#[async_trait]
impl Initializer for RecordInitializer {
    fn name(&self) -> &str {
        "record"
    }

    async fn initialize(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<InitializationStatus> {
        let mut status = InitializationStatus {
            table: configuration.table().to_string(),
            configuration_name: configuration.name.clone(),
            ..Default::default()
        };

        let result = match self.select(ctx, site, configuration).await {
            Ok(select) => {
                debug!("Initializing '{}' with filter '{}'", configuration.name, select.filter);
                self.queue.bulk_initialize(&select).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(rows) => {
                status.initialized = true;
                status.rows_affected = rows;
            }
            Err(e) if e.is_store_wide() => return Err(e),
            Err(e) => {
                warn!(
                    "Could not initialize '{}' for site {}: {}",
                    configuration.name, site.root_page_id, e
                );
                status.error = Some(e.to_string());
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture, NOW};
    use sitesearch_core::{Record, SiteConfiguration};

    fn initializer(fixture: &Fixture) -> RecordInitializer {
        RecordInitializer::new(
            Arc::new(fixture.resolver()),
            Arc::new(fixture.eligibility()),
            Arc::new(fixture.queue()),
        )
    }

    async fn site(fixture: &Fixture) -> Arc<Site> {
        fixture.resolver().resolve_site(1).await.unwrap()
    }

    #[tokio::test]
    async fn test_eligibility_filter_rules() {
        let fixture = Fixture::new().await;
        let site = site(&fixture).await;
        let news = IndexingConfiguration::for_table("tx_news");
        let filter = initializer(&fixture).eligibility_filter(&fixture.ctx(), &site, &news);

        let record = Record::new("tx_news", 1);
        assert!(filter.matches(&record));
        assert!(!filter.matches(&record.clone().with("hidden", 1)));
        assert!(!filter.matches(&record.clone().with("deleted", 1)));
        assert!(!filter.matches(&record.clone().with("starttime", NOW + 1)));
        assert!(!filter.matches(&record.clone().with("endtime", NOW)));
        assert!(filter.matches(&record.clone().with("endtime", NOW + 1)));
        assert!(!filter.matches(&record.clone().with("t3ver_wsid", 2)));
        assert!(filter.matches(&record.clone().with("sys_language_uid", 1)));
        assert!(!filter.matches(
            &record
                .with("sys_language_uid", 1)
                .with("l10n_parent", 3)
        ));
    }

    #[tokio::test]
    async fn test_initialize_records_of_site() {
        let mut news = IndexingConfiguration::for_table("tx_news");
        news.priority = 3;
        news.additional_page_ids = vec![500];
        let fixture = Fixture::with_sites(vec![
            SiteConfiguration::new(1, "example.org").with_configuration(news.clone())
        ])
        .await;
        for (uid, pid) in [(1, 10), (2, 11), (3, 500), (4, 999)] {
            fixture
                .store
                .insert_record(Record::new("tx_news", uid).with("pid", pid).with("tstamp", 50))
                .await;
        }
        fixture
            .store
            .insert_record(Record::new("tx_news", 5).with("pid", 10).with("hidden", 1))
            .await;
        let site = site(&fixture).await;
        let initializer = initializer(&fixture);

        let status = initializer
            .initialize(&fixture.ctx(), &site, &news)
            .await
            .unwrap();
        assert!(status.initialized);
        assert_eq!(status.rows_affected, 3);
        assert_eq!(status.table, "tx_news");

        let queue = fixture.queue();
        for uid in [1, 2, 3] {
            let item = &queue.items("tx_news", uid).await.unwrap()[0];
            assert_eq!(item.indexing_priority, 3);
            assert_eq!(item.changed, 50);
        }
        assert!(!queue.contains_item("tx_news", 4).await.unwrap());
        assert!(!queue.contains_item("tx_news", 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_pages_respects_page_rules() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(page(12, 1).with("no_search", 1))
            .await;
        fixture
            .store
            .insert_record(page(13, 1).with("doktype", 254))
            .await;
        fixture
            .store
            .insert_record(page(14, 1).with("no_search_sub_entries", 1))
            .await;
        fixture.store.insert_record(page(15, 14)).await;
        let site = site(&fixture).await;

        let pages = IndexingConfiguration::for_table("pages");
        let status = initializer(&fixture)
            .initialize(&fixture.ctx(), &site, &pages)
            .await
            .unwrap();
        assert_eq!(status.rows_affected, 4);

        let queue = fixture.queue();
        for uid in [1, 10, 11, 14] {
            assert!(queue.contains_item("pages", uid).await.unwrap(), "page {uid}");
        }
        for uid in [12, 13, 15] {
            assert!(!queue.contains_item("pages", uid).await.unwrap(), "page {uid}");
        }
    }

    #[tokio::test]
    async fn test_initial_pages_additional_where_limits_tree() {
        let mut configuration = Fixture::site_configuration();
        configuration.initial_pages_additional_where = Some(RecordFilter::compare(
            "uid",
            Operator::NotEq,
            10,
        ));
        let fixture = Fixture::with_sites(vec![configuration]).await;
        let site = site(&fixture).await;

        let pages = initializer(&fixture)
            .site_page_ids(&site, &IndexingConfiguration::for_table("pages"))
            .await
            .unwrap();
        assert_eq!(pages, vec![1]);
    }
}
