//! Keeps mounted copies of a page in sync when the page changes.

use crate::eligibility::EligibilityEvaluator;
use crate::initializer::PageInitializer;
use crate::site::SiteResolver;
use sitesearch_core::{
    Datastore, Error, RecordFilter, RequestContext, Result, DOKTYPE_MOUNT_POINT, PAGES_TABLE,
};
use std::sync::Arc;
use tracing::debug;

/// Requeues a page under every mount point that shows it.
pub struct MountPagesUpdater {
    datastore: Arc<dyn Datastore>,
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    pages: Arc<PageInitializer>,
}

impl MountPagesUpdater {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        pages: Arc<PageInitializer>,
    ) -> Self {
        Self {
            datastore,
            resolver,
            eligibility,
            pages,
        }
    }

    /// Queue the page below each enabled mount page whose source is the page
    /// or one of its ancestors. Returns the number of mount points updated.
    pub async fn update(&self, ctx: &RequestContext, page_id: i64) -> Result<usize> {
        let root_line: Vec<i64> = self
            .resolver
            .root_line(page_id)
            .await?
            .iter()
            .map(|page| page.uid)
            .collect();
        if root_line.is_empty() {
            return Ok(0);
        }

        let filter = RecordFilter::eq("doktype", DOKTYPE_MOUNT_POINT)
            .and(RecordFilter::eq("no_search", 0))
            .and(RecordFilter::in_list("mount_pid", &root_line));
        let mount_pages = self.datastore.find_records(PAGES_TABLE, &filter).await?;

        let mut updated = 0;
        for mount_page in mount_pages {
            if !self
                .eligibility
                .is_enabled_record(PAGES_TABLE, &mount_page, ctx.now)
            {
                continue;
            }
            let site = match self.resolver.site_by_page_id(mount_page.uid).await {
                Ok(site) => site,
                Err(e) if e.is_not_found() => {
                    debug!("Mount page {} belongs to no site: {}", mount_page.uid, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let mount_point = match self.pages.mount_point_of(&mount_page).await {
                Ok(mount_point) => mount_point,
                Err(Error::InvalidConfiguration(message)) => {
                    debug!("Ignoring mount page {}: {}", mount_page.uid, message);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self
                .pages
                .initialize_mounted_page(ctx, &site, &mount_point, page_id)
                .await?
            {
                updated += 1;
            }
        }
        Ok(updated)
    }
}
