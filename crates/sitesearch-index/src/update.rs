//! Data update handling: requeue records after content changes.

use crate::eligibility::EligibilityEvaluator;
use crate::garbage::GarbageHandler;
use crate::index_queue::IndexQueue;
use crate::mount::MountPagesUpdater;
use crate::queue::QueueStore;
use crate::site::SiteResolver;
use crate::triggers::RecursiveUpdateTriggers;
use sitesearch_core::{
    value_to_i64, Datastore, FieldMap, RecordFilter, RequestContext, Result, CONTENT_TABLE,
    PAGES_TABLE,
};
use std::sync::Arc;
use tracing::debug;

/// Requeues records, pages and subtrees affected by a change.
pub struct DataUpdateHandler {
    datastore: Arc<dyn Datastore>,
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    queue: Arc<QueueStore>,
    index_queue: Arc<IndexQueue>,
    mount_pages: Arc<MountPagesUpdater>,
    garbage: Arc<GarbageHandler>,
    triggers: Arc<RecursiveUpdateTriggers>,
}

impl DataUpdateHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        datastore: Arc<dyn Datastore>,
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        queue: Arc<QueueStore>,
        index_queue: Arc<IndexQueue>,
        mount_pages: Arc<MountPagesUpdater>,
        garbage: Arc<GarbageHandler>,
        triggers: Arc<RecursiveUpdateTriggers>,
    ) -> Self {
        Self {
            datastore,
            resolver,
            eligibility,
            queue,
            index_queue,
            mount_pages,
            garbage,
            triggers,
        }
    }

    /// A content element changed: its page document must be rebuilt.
    pub async fn handle_content_element_update(
        &self,
        ctx: &RequestContext,
        uid: i64,
        changed_fields: &FieldMap,
    ) -> Result<()> {
        let page_id = match changed_fields.get("pid") {
            Some(pid) => value_to_i64(pid),
            None => match self.datastore.fetch_record(CONTENT_TABLE, uid).await? {
                Some(content) => content.pid(),
                None => {
                    debug!("Content element {} is gone", uid);
                    return Ok(());
                }
            },
        };
        self.process_page_record(ctx, page_id, page_id, &FieldMap::new())
            .await
    }

    /// A content element was deleted from `page_id`.
    pub async fn handle_content_element_deletion(
        &self,
        ctx: &RequestContext,
        uid: i64,
        page_id: Option<i64>,
    ) -> Result<()> {
        let page_id = match page_id {
            Some(page_id) => page_id,
            None => match self.datastore.fetch_record(CONTENT_TABLE, uid).await? {
                Some(content) => content.pid(),
                None => return Ok(()),
            },
        };
        self.process_page_record(ctx, page_id, page_id, &FieldMap::new())
            .await
    }

    /// A page changed.
    ///
    /// The site is resolved through the translation parent, the page itself
    /// when it is a site root, or its parent page.
    pub async fn handle_page_update(
        &self,
        ctx: &RequestContext,
        uid: i64,
        changed_fields: &FieldMap,
    ) -> Result<()> {
        let Some(page) = self.datastore.fetch_record(PAGES_TABLE, uid).await? else {
            return self.remove_when_in_queue(ctx, PAGES_TABLE, uid).await;
        };

        let translation_parent = changed_fields
            .get("l10n_parent")
            .map(value_to_i64)
            .filter(|parent| *parent > 0)
            .or_else(|| {
                let parent = page.int("l10n_parent");
                (page.int("sys_language_uid") > 0 && parent > 0).then_some(parent)
            });
        let configuration_page = match translation_parent {
            Some(parent) => parent,
            None if page.flag("is_siteroot") => uid,
            None => page.pid(),
        };
        self.process_page_record(ctx, uid, configuration_page, changed_fields)
            .await
    }

    /// Requeue a page, its mounted copies, pages showing its content and,
    /// when a requeue trigger fires, its subtree.
    pub async fn process_page_record(
        &self,
        ctx: &RequestContext,
        uid: i64,
        configuration_page: i64,
        changed_fields: &FieldMap,
    ) -> Result<()> {
        let site = match self
            .resolver
            .resolve_root_site_id(PAGES_TABLE, configuration_page)
            .await
        {
            Ok(root) => self.resolver.resolve_site(root).await,
            Err(e) => Err(e),
        };
        let site = match site {
            Ok(site) => site,
            Err(e) if e.is_not_found() => {
                debug!("Page {} belongs to no site: {}", uid, e);
                self.remove_when_in_queue(ctx, PAGES_TABLE, uid).await?;
                self.mount_pages.update(ctx, uid).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !self.eligibility.is_monitored_table(&site, PAGES_TABLE) {
            return Ok(());
        }

        self.process_record(ctx, PAGES_TABLE, uid).await?;
        self.update_canonical_pages(ctx, uid).await?;
        self.mount_pages.update(ctx, uid).await?;

        if let Some(page) = self.datastore.fetch_record(PAGES_TABLE, uid).await? {
            let configuration = site
                .configuration
                .indexing_configuration_for_record(PAGES_TABLE, &page);
            if self
                .triggers
                .requeue_triggered(&page, changed_fields, configuration)
            {
                self.requeue_subtree(ctx, uid).await?;
            }
        }
        Ok(())
    }

    /// A record of a non-page table changed.
    pub async fn handle_record_update(
        &self,
        ctx: &RequestContext,
        table: &str,
        uid: i64,
    ) -> Result<()> {
        self.process_record(ctx, table, uid).await
    }

    /// A record moved: drop the old documents, then queue it again.
    pub async fn handle_moved_record(
        &self,
        ctx: &RequestContext,
        table: &str,
        uid: i64,
    ) -> Result<()> {
        self.garbage.collect_garbage(ctx, table, uid).await?;
        self.process_record(ctx, table, uid).await
    }

    /// A draft version went live.
    pub async fn handle_version_swap(
        &self,
        ctx: &RequestContext,
        table: &str,
        uid: i64,
    ) -> Result<()> {
        match table {
            PAGES_TABLE => self.handle_page_update(ctx, uid, &FieldMap::new()).await,
            CONTENT_TABLE => {
                self.handle_content_element_update(ctx, uid, &FieldMap::new())
                    .await
            }
            _ => self.process_record(ctx, table, uid).await,
        }
    }

    /// A page moved. A new parent also requeues the subtree.
    pub async fn handle_moved_page(
        &self,
        ctx: &RequestContext,
        uid: i64,
        previous_parent_id: Option<i64>,
    ) -> Result<()> {
        if self.resolver.is_in_excluded_subtree(uid).await? {
            debug!("Page {} moved into an excluded subtree", uid);
            return Ok(());
        }
        self.handle_page_update(ctx, uid, &FieldMap::new()).await?;

        let Some(page) = self.datastore.fetch_record(PAGES_TABLE, uid).await? else {
            return Ok(());
        };
        if previous_parent_id.is_some_and(|previous| previous != page.pid()) {
            self.requeue_subtree(ctx, uid).await?;
        }
        Ok(())
    }

    /// Queue or skip the record for each responsible site.
    pub async fn process_record(&self, ctx: &RequestContext, table: &str, uid: i64) -> Result<()> {
        let roots = match self.resolver.responsible_root_site_ids(table, uid).await {
            Ok(roots) => roots,
            Err(e) if e.is_not_found() => {
                debug!("{}:{} cannot be indexed: {}", table, uid, e);
                return self.remove_when_in_queue(ctx, table, uid).await;
            }
            Err(e) => return Err(e),
        };
        let Some(record) = self.datastore.fetch_record(table, uid).await? else {
            return self.remove_when_in_queue(ctx, table, uid).await;
        };
        if self.eligibility.is_overlay_mount_point(table, &record) {
            debug!("Mount page {} is replaced by its mounted pages", uid);
            return self.remove_when_in_queue(ctx, table, uid).await;
        }

        for root in roots {
            let site = match self.resolver.resolve_site(root).await {
                Ok(site) => site,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if !self.eligibility.is_monitored_table(&site, table) {
                continue;
            }
            if site
                .configuration
                .indexing_configuration_for_record(table, &record)
                .is_none()
            {
                debug!("No indexing configuration of site {} accepts {}:{}", root, table, uid);
                self.remove_when_in_queue(ctx, table, uid).await?;
                continue;
            }
            if !self
                .eligibility
                .is_translation_parent_enabled(self.datastore.as_ref(), table, &record, ctx.now)
                .await?
            {
                debug!("{}:{} translates a disabled record", table, uid);
                continue;
            }
            if self.eligibility.is_enabled_record(table, &record, ctx.now) {
                self.index_queue
                    .update_item_for_site(ctx, &site, table, &record)
                    .await?;
            }
        }
        Ok(())
    }

    /// Collect the record's garbage if it has an unmounted queue row.
    pub async fn remove_when_in_queue(
        &self,
        ctx: &RequestContext,
        table: &str,
        uid: i64,
    ) -> Result<()> {
        if self.queue.contains_unmounted_item(table, uid).await? {
            self.garbage.collect_garbage(ctx, table, uid).await?;
        }
        Ok(())
    }

    /// Requeue pages that show the content of `page_id`.
    async fn update_canonical_pages(&self, ctx: &RequestContext, page_id: i64) -> Result<()> {
        let pages = self
            .datastore
            .find_records(PAGES_TABLE, &RecordFilter::eq("content_from_pid", page_id))
            .await?;
        for page in pages {
            self.update_page(ctx, page.uid).await?;
        }
        Ok(())
    }

    async fn requeue_subtree(&self, ctx: &RequestContext, page_id: i64) -> Result<()> {
        let subpages = self
            .datastore
            .subpage_ids(page_id, 0, &RecordFilter::all())
            .await?;
        debug!("Requeueing {} subpages of page {}", subpages.len(), page_id);
        for uid in subpages {
            self.update_page(ctx, uid).await?;
        }
        Ok(())
    }

    async fn update_page(&self, ctx: &RequestContext, uid: i64) -> Result<()> {
        match self.index_queue.update_item(ctx, PAGES_TABLE, uid).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Skipping page {}: {}", uid, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
