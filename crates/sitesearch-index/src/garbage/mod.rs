//! Garbage handling: remove records that no longer qualify for the index.

mod strategy;

pub use strategy::{
    GarbageRemoverRegistry, GarbageRemoverStrategy, IndexCleaner, PageGarbageRemover,
    RecordGarbageRemover,
};

use crate::eligibility::EligibilityEvaluator;
use crate::queue::QueueStore;
use crate::triggers::RecursiveUpdateTriggers;
use sitesearch_core::{
    Datastore, FieldMap, RecordFilter, RequestContext, Result, PAGES_TABLE,
};
use std::sync::Arc;
use tracing::debug;

/// Decides when records become garbage and dispatches their removal.
pub struct GarbageHandler {
    datastore: Arc<dyn Datastore>,
    eligibility: Arc<EligibilityEvaluator>,
    queue: Arc<QueueStore>,
    triggers: Arc<RecursiveUpdateTriggers>,
    removers: Arc<GarbageRemoverRegistry>,
}

impl GarbageHandler {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        eligibility: Arc<EligibilityEvaluator>,
        queue: Arc<QueueStore>,
        triggers: Arc<RecursiveUpdateTriggers>,
        removers: Arc<GarbageRemoverRegistry>,
    ) -> Self {
        Self {
            datastore,
            eligibility,
            queue,
            triggers,
            removers,
        }
    }

    pub fn removers(&self) -> &GarbageRemoverRegistry {
        &self.removers
    }

    /// Remove the record with its table's strategy.
    pub async fn collect_garbage(&self, ctx: &RequestContext, table: &str, uid: i64) -> Result<()> {
        self.removers
            .get(table)
            .remove_garbage_of(ctx, table, uid)
            .await
    }

    /// Remove a moved page from its old position.
    ///
    /// When the parent changed the whole subtree is removed too, since its
    /// rootline changed with it.
    pub async fn handle_page_movement(
        &self,
        ctx: &RequestContext,
        uid: i64,
        previous_parent_id: Option<i64>,
    ) -> Result<()> {
        self.collect_garbage(ctx, PAGES_TABLE, uid).await?;

        let Some(page) = self.datastore.fetch_record(PAGES_TABLE, uid).await? else {
            return Ok(());
        };
        if previous_parent_id.is_some_and(|previous| previous != page.pid()) {
            self.collect_subtree(ctx, uid).await?;
        }
        Ok(())
    }

    /// Check an updated record and remove it if it became garbage.
    ///
    /// Pages matching a garbage trigger also lose their whole subtree.
    /// Returns whether the record itself was removed.
    pub async fn perform_record_garbage_check(
        &self,
        ctx: &RequestContext,
        table: &str,
        uid: i64,
        changed_fields: &FieldMap,
        frontend_groups_removed: bool,
    ) -> Result<bool> {
        let Some(record) = self.datastore.fetch_record(table, uid).await? else {
            return Ok(false);
        };
        let fields = self.eligibility.visibility_affecting_fields(table);
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        let record = record.project(&fields);

        if table == PAGES_TABLE && self.triggers.garbage_triggered(&record, changed_fields) {
            self.collect_subtree(ctx, uid).await?;
        }

        let queued_uid = if self.eligibility.is_localized_record(table, &record) {
            record.int("l10n_parent")
        } else {
            uid
        };
        let indexed = self.queue.contains_indexed_item(table, queued_uid).await?;
        if self
            .eligibility
            .is_garbage(table, &record, ctx.now, frontend_groups_removed, indexed)
        {
            debug!("{}:{} became garbage", table, uid);
            self.collect_garbage(ctx, table, uid).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn collect_subtree(&self, ctx: &RequestContext, uid: i64) -> Result<()> {
        let subpages = self
            .datastore
            .subpage_ids(uid, 0, &RecordFilter::all())
            .await?;
        debug!("Collecting {} subpages of page {}", subpages.len(), uid);
        for page_id in subpages {
            self.collect_garbage(ctx, PAGES_TABLE, page_id).await?;
        }
        Ok(())
    }
}
