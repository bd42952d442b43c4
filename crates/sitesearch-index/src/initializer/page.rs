//! Initializer for the pages table, including mount pages.

use super::{Initializer, RecordInitializer};
use crate::eligibility::EligibilityEvaluator;
use crate::index_queue::IndexQueue;
use crate::queue::QueueStore;
use crate::site::SiteResolver;
use async_trait::async_trait;
use sitesearch_core::{
    Datastore, Error, IndexingConfiguration, InitializationStatus, MountFilter, MountPoint,
    NewQueueItem, QueueItemQuery, QueueWrite, Record, RecordFilter, RequestContext, Result, Site,
    DOKTYPE_MOUNT_POINT, PAGES_TABLE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queues the site's pages, then the subtrees mounted into the site.
pub struct PageInitializer {
    records: RecordInitializer,
    datastore: Arc<dyn Datastore>,
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    queue: Arc<QueueStore>,
    index_queue: Arc<IndexQueue>,
}

impl PageInitializer {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        queue: Arc<QueueStore>,
        index_queue: Arc<IndexQueue>,
    ) -> Self {
        Self {
            records: RecordInitializer::new(resolver.clone(), eligibility.clone(), queue.clone()),
            datastore,
            resolver,
            eligibility,
            queue,
            index_queue,
        }
    }

    /// Queue the subtrees of every mount page in the site.
    ///
    /// Mount pages are handled one by one, each in its own transaction. An
    /// invalid mount page becomes a message in `status`; a failed write
    /// marks `status` as not initialized. Both leave the other mount pages
    /// untouched. Returns the number of inserted rows.
    pub async fn initialize_mount_pages(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
        status: &mut InitializationStatus,
    ) -> Result<u64> {
        let filter = self
            .records
            .eligibility_filter(ctx, site, configuration)
            .and(RecordFilter::in_list(
                "uid",
                self.records.site_page_ids(site, configuration).await?,
            ))
            .and(RecordFilter::eq("doktype", DOKTYPE_MOUNT_POINT));
        let mount_pages = self.datastore.find_records(PAGES_TABLE, &filter).await?;
        debug!("Site {} has {} mount pages", site.root_page_id, mount_pages.len());

        let mut inserted = 0;
        for mount_page in &mount_pages {
            match self
                .initialize_mount_page(ctx, site, configuration, mount_page)
                .await
            {
                Ok(rows) => inserted += rows,
                Err(e) if e.is_store_wide() => return Err(e),
                Err(Error::InvalidConfiguration(message)) => {
                    warn!("Skipping mount page {}: {}", mount_page.uid, message);
                    status.messages.push(message);
                }
                Err(e) => {
                    warn!("Mount page {} failed: {}", mount_page.uid, e);
                    status.initialized = false;
                    status
                        .messages
                        .push(format!("mount page {} failed: {}", mount_page.uid, e));
                    status.error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        Ok(inserted)
    }

    /// Mount point of a mount page, after checking its source is usable.
    pub async fn mount_point_of(&self, mount_page: &Record) -> Result<MountPoint> {
        let source = mount_page.int("mount_pid");
        if source <= 0 {
            return Err(Error::InvalidConfiguration(format!(
                "mount page {} has no mount source",
                mount_page.uid
            )));
        }
        let Some(source_page) = self.datastore.fetch_record(PAGES_TABLE, source).await? else {
            return Err(Error::InvalidConfiguration(format!(
                "mount page {} points to missing page {}",
                mount_page.uid, source
            )));
        };
        if self.eligibility.is_deleted(PAGES_TABLE, &source_page)
            || self.eligibility.is_hidden(PAGES_TABLE, &source_page)
        {
            return Err(Error::InvalidConfiguration(format!(
                "mount page {} points to inaccessible page {}",
                mount_page.uid, source
            )));
        }
        Ok(MountPoint::new(
            source,
            mount_page.uid,
            mount_page.flag("mount_pid_ol"),
        ))
    }

    /// Eligible pages of the mounted subtree, source first.
    pub async fn mounted_page_ids(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
        mount_point: &MountPoint,
    ) -> Result<Vec<i64>> {
        let filter = self.records.eligibility_filter(ctx, site, configuration);
        let mut pages = self.resolver.page_tree(mount_point.source, &filter).await?;
        let source_enabled = self
            .datastore
            .fetch_record(PAGES_TABLE, mount_point.source)
            .await?
            .is_some_and(|page| filter.matches(&page));
        if !source_enabled {
            pages.retain(|uid| *uid != mount_point.source);
        }
        Ok(pages)
    }

    async fn initialize_mount_page(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
        mount_page: &Record,
    ) -> Result<u64> {
        let mount_point = self.mount_point_of(mount_page).await?;
        let identifier = mount_point.identifier();
        let mounted = self
            .mounted_page_ids(ctx, site, configuration, &mount_point)
            .await?;

        if mount_point.overlay {
            self.queue
                .delete_items(
                    &QueueItemQuery::for_item(PAGES_TABLE, mount_point.destination)
                        .with_root(site.root_page_id)
                        .with_mount(MountFilter::Unmounted),
                )
                .await?;
        } else {
            self.index_queue
                .update_item_for_site(ctx, site, PAGES_TABLE, mount_page)
                .await?;
        }

        let existing: BTreeMap<i64, i64> = self
            .queue
            .mounted_items(site.root_page_id, &identifier)
            .await?
            .into_iter()
            .map(|item| (item.item_uid, item.id))
            .collect();
        let wanted: BTreeSet<i64> = mounted.iter().copied().collect();

        let new_items: Vec<NewQueueItem> = mounted
            .iter()
            .filter(|uid| !existing.contains_key(uid))
            .map(|uid| {
                NewQueueItem::new(site.root_page_id, PAGES_TABLE, *uid, &configuration.name)
                    .with_priority(configuration.priority)
                    .changed_at(ctx.now)
                    .mounted(&mount_point)
            })
            .collect();
        let stale: Vec<i64> = existing
            .iter()
            .filter(|(uid, _)| !wanted.contains(uid))
            .map(|(_, id)| *id)
            .collect();

        let mut writes = Vec::new();
        let inserted = new_items.len() as u64;
        if !new_items.is_empty() {
            writes.push(QueueWrite::Insert(new_items));
        }
        for (uid, id) in &existing {
            if wanted.contains(uid) {
                writes.push(QueueWrite::SetProperties {
                    item_id: *id,
                    properties: mount_point.indexing_properties(),
                });
            }
        }
        if !stale.is_empty() {
            writes.push(QueueWrite::Delete(QueueItemQuery::new().with_ids(stale)));
        }
        if !writes.is_empty() {
            self.queue.apply_batch(&writes).await?;
        }

        info!(
            "Mount page {} ({}): {} new, {} existing pages",
            mount_point.destination,
            identifier,
            inserted,
            existing.len()
        );
        Ok(inserted)
    }

    /// Queue one page under a mount point if it is eligible.
    pub async fn initialize_mounted_page(
        &self,
        ctx: &RequestContext,
        site: &Site,
        mount_point: &MountPoint,
        page_id: i64,
    ) -> Result<bool> {
        let Some(page) = self.datastore.fetch_record(PAGES_TABLE, page_id).await? else {
            return Ok(false);
        };
        if !self.eligibility.is_enabled_record(PAGES_TABLE, &page, ctx.now) {
            return Ok(false);
        }
        let Some(configuration) = site
            .configuration
            .indexing_configuration_for_record(PAGES_TABLE, &page)
        else {
            return Ok(false);
        };
        let item = NewQueueItem::new(site.root_page_id, PAGES_TABLE, page_id, &configuration.name)
            .with_priority(configuration.priority)
            .changed_at(ctx.now)
            .mounted(mount_point);
        self.queue.upsert_item(&item).await?;
        Ok(true)
    }
}

#[async_trait]
impl Initializer for PageInitializer {
    fn name(&self) -> &str {
        "page"
    }

    async fn initialize(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<InitializationStatus> {
        let mut status = self.records.initialize(ctx, site, configuration).await?;
        if !status.initialized {
            return Ok(status);
        }
        let mounted = self
            .initialize_mount_pages(ctx, site, configuration, &mut status)
            .await?;
        status.rows_affected += mounted;
        Ok(status)
    }
}
