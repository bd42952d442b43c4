//! Index queue: turn one record into queue items for its sites.

use crate::eligibility::EligibilityEvaluator;
use crate::queue::QueueStore;
use crate::site::SiteResolver;
use sitesearch_core::{
    Datastore, Error, NewQueueItem, Record, RequestContext, Result, Site, PAGES_TABLE,
};
use std::sync::Arc;
use tracing::debug;

/// Queues records that are eligible for indexing.
pub struct IndexQueue {
    datastore: Arc<dyn Datastore>,
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    queue: Arc<QueueStore>,
}

impl IndexQueue {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        queue: Arc<QueueStore>,
    ) -> Self {
        Self {
            datastore,
            resolver,
            eligibility,
            queue,
        }
    }

    /// Queue the record for every responsible site.
    ///
    /// Returns the number of sites the record was queued for.
    pub async fn update_item(&self, ctx: &RequestContext, table: &str, uid: i64) -> Result<usize> {
        let record = self
            .datastore
            .fetch_record(table, uid)
            .await?
            .ok_or_else(|| Error::RecordNotFound {
                table: table.to_string(),
                uid,
            })?;

        let mut queued = 0;
        for root in self.resolver.responsible_root_site_ids(table, uid).await? {
            let site = match self.resolver.resolve_site(root).await {
                Ok(site) => site,
                Err(Error::SiteNotFound(root)) => {
                    debug!("Skipping {}:{} for unconfigured root {}", table, uid, root);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.update_item_for_site(ctx, &site, table, &record).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Queue the record for one site if it is eligible there.
    ///
    /// Translations are queued under their default language uid unless the
    /// language runs in free content mode.
    pub async fn update_item_for_site(
        &self,
        ctx: &RequestContext,
        site: &Site,
        table: &str,
        record: &Record,
    ) -> Result<bool> {
        if !self.eligibility.is_monitored_table(site, table)
            || !self.eligibility.is_enabled_record(table, record, ctx.now)
        {
            return Ok(false);
        }
        if self.eligibility.is_overlay_mount_point(table, record) {
            debug!("Mount page {} is replaced by its mounted pages", record.uid);
            return Ok(false);
        }
        if table == PAGES_TABLE
            && (self.resolver.is_hidden_by_ancestor(record.uid).await?
                || self.resolver.is_in_excluded_subtree(record.uid).await?)
        {
            debug!("Page {} is hidden by its rootline", record.uid);
            return Ok(false);
        }

        let original_uid =
            self.eligibility
                .translation_original_uid(table, record, &site.configuration);
        let source = if original_uid == record.uid {
            record.clone()
        } else {
            match self.datastore.fetch_record(table, original_uid).await? {
                Some(original) if self.eligibility.is_enabled_record(table, &original, ctx.now) => {
                    original
                }
                _ => {
                    debug!(
                        "Translation {}:{} has no enabled original {}",
                        table, record.uid, original_uid
                    );
                    return Ok(false);
                }
            }
        };

        let Some(configuration) = site
            .configuration
            .indexing_configuration_for_record(table, &source)
        else {
            return Ok(false);
        };

        let item = NewQueueItem::new(site.root_page_id, table, source.uid, &configuration.name)
            .with_priority(configuration.priority)
            .changed_at(self.changed_time(ctx, table, &source));
        self.queue.upsert_item(&item).await?;
        Ok(true)
    }

    /// Latest of request time, record timestamp and start time.
    fn changed_time(&self, ctx: &RequestContext, table: &str, record: &Record) -> i64 {
        let definition = self.eligibility.tables().get(table);
        [&definition.tstamp_field, &definition.starttime_field]
            .into_iter()
            .flatten()
            .map(|field| record.int(field))
            .fold(ctx.now, i64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture, NOW};
    use sitesearch_core::{IndexingConfiguration, RecordFilter, SiteConfiguration};

    fn index_queue(fixture: &Fixture) -> (IndexQueue, Arc<QueueStore>) {
        let queue = Arc::new(fixture.queue());
        let index_queue = IndexQueue::new(
            fixture.store.clone(),
            Arc::new(fixture.resolver()),
            Arc::new(fixture.eligibility()),
            queue.clone(),
        );
        (index_queue, queue)
    }

    #[tokio::test]
    async fn test_queues_enabled_page() {
        let fixture = Fixture::new().await;
        let (index_queue, queue) = index_queue(&fixture);

        assert_eq!(index_queue.update_item(&fixture.ctx(), "pages", 11).await.unwrap(), 1);
        let items = queue.items("pages", 11).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].root, 1);
        assert_eq!(items[0].indexing_configuration, "pages");
        assert_eq!(items[0].changed, NOW);
    }

    #[tokio::test]
    async fn test_changed_time_follows_record_timestamp() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10).with("tstamp", NOW + 50))
            .await;
        let (index_queue, queue) = index_queue(&fixture);

        index_queue.update_item(&fixture.ctx(), "tx_news", 1).await.unwrap();
        assert_eq!(queue.items("tx_news", 1).await.unwrap()[0].changed, NOW + 50);
    }

    #[tokio::test]
    async fn test_skips_hidden_and_unmonitored() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10).with("hidden", 1))
            .await;
        fixture
            .store
            .insert_record(Record::new("tx_blog", 1).with("pid", 10))
            .await;
        let (index_queue, queue) = index_queue(&fixture);

        assert_eq!(index_queue.update_item(&fixture.ctx(), "tx_news", 1).await.unwrap(), 0);
        assert_eq!(index_queue.update_item(&fixture.ctx(), "tx_blog", 1).await.unwrap(), 0);
        assert_eq!(queue.statistics(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_page_below_hidden_extend_to_subpages_is_skipped() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(page(10, 1).with("hidden", 1).with("extendToSubpages", 1))
            .await;
        let (index_queue, _) = index_queue(&fixture);
        assert_eq!(index_queue.update_item(&fixture.ctx(), "pages", 11).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_translation_redirects_to_source_uid() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 3).with("pid", 10))
            .await;
        fixture
            .store
            .insert_record(
                Record::new("tx_news", 7)
                    .with("pid", 10)
                    .with("sys_language_uid", 1)
                    .with("l10n_parent", 3),
            )
            .await;
        let (index_queue, queue) = index_queue(&fixture);

        index_queue.update_item(&fixture.ctx(), "tx_news", 7).await.unwrap();
        assert!(queue.contains_item("tx_news", 3).await.unwrap());
        assert!(!queue.contains_item("tx_news", 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_free_content_mode_keeps_translation_uid() {
        let mut site = Fixture::site_configuration();
        site.languages.free_content_mode = vec![1];
        let fixture = Fixture::with_sites(vec![site]).await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 3).with("pid", 10))
            .await;
        fixture
            .store
            .insert_record(
                Record::new("tx_news", 7)
                    .with("pid", 10)
                    .with("sys_language_uid", 1)
                    .with("l10n_parent", 3),
            )
            .await;
        let (index_queue, queue) = index_queue(&fixture);

        index_queue.update_item(&fixture.ctx(), "tx_news", 7).await.unwrap();
        assert!(queue.contains_item("tx_news", 7).await.unwrap());
        assert!(!queue.contains_item("tx_news", 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_additional_where_selects_configuration() {
        let mut top = IndexingConfiguration::for_table("tx_news");
        top.name = "top_news".to_string();
        top.priority = 10;
        top.additional_where = Some(RecordFilter::eq("top", 1));
        let site = SiteConfiguration::new(1, "example.org")
            .with_configuration(top)
            .with_configuration(IndexingConfiguration::for_table("tx_news"));
        let fixture = Fixture::with_sites(vec![site]).await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10).with("top", 1))
            .await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 2).with("pid", 10))
            .await;
        let (index_queue, queue) = index_queue(&fixture);

        index_queue.update_item(&fixture.ctx(), "tx_news", 1).await.unwrap();
        index_queue.update_item(&fixture.ctx(), "tx_news", 2).await.unwrap();

        let top = &queue.items("tx_news", 1).await.unwrap()[0];
        assert_eq!(top.indexing_configuration, "top_news");
        assert_eq!(top.indexing_priority, 10);
        let plain = &queue.items("tx_news", 2).await.unwrap()[0];
        assert_eq!(plain.indexing_configuration, "tx_news");
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let fixture = Fixture::new().await;
        let (index_queue, _) = index_queue(&fixture);
        let err = index_queue
            .update_item(&fixture.ctx(), "tx_news", 99)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
