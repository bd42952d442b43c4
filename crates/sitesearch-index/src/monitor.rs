//! Entry point for content mutation signals.

use crate::eligibility::EligibilityEvaluator;
use crate::garbage::GarbageHandler;
use crate::site::SiteResolver;
use crate::update::DataUpdateHandler;
use sitesearch_core::{
    value_to_i64, value_to_string, MutationKind, MutationSignal, RequestContext, Result,
    CONTENT_TABLE, PAGES_TABLE,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Routes mutation signals to garbage collection and requeueing.
pub struct RecordMonitor {
    resolver: Arc<SiteResolver>,
    eligibility: Arc<EligibilityEvaluator>,
    garbage: Arc<GarbageHandler>,
    data: Arc<DataUpdateHandler>,
}

impl RecordMonitor {
    pub fn new(
        resolver: Arc<SiteResolver>,
        eligibility: Arc<EligibilityEvaluator>,
        garbage: Arc<GarbageHandler>,
        data: Arc<DataUpdateHandler>,
    ) -> Self {
        Self {
            resolver,
            eligibility,
            garbage,
            data,
        }
    }

    /// Handle one signal.
    ///
    /// Draft workspace changes are ignored. A record that vanished while the
    /// signal was in flight is not an error.
    pub async fn handle(&self, ctx: &RequestContext, signal: &MutationSignal) -> Result<()> {
        if !signal.is_live() || !ctx.is_live() {
            debug!(
                "Ignoring {} of {}:{} in workspace {}",
                signal.kind, signal.table, signal.uid, signal.workspace_id
            );
            return Ok(());
        }
        // Resolutions are only valid within one signal.
        self.resolver.clear_cache().await;

        info!("Handling {} of {}:{}", signal.kind, signal.table, signal.uid);
        let result = match signal.kind {
            MutationKind::Create | MutationKind::Update => self.handle_update(ctx, signal).await,
            MutationKind::Delete => self.handle_delete(ctx, signal).await,
            MutationKind::Move => self.handle_move(ctx, signal).await,
            MutationKind::VersionSwap => {
                self.data
                    .handle_version_swap(ctx, &signal.table, signal.uid)
                    .await
            }
        };
        match result {
            Err(e) if e.is_not_found() => {
                debug!("{}:{} skipped: {}", signal.table, signal.uid, e);
                Ok(())
            }
            other => other,
        }
    }

    async fn handle_update(&self, ctx: &RequestContext, signal: &MutationSignal) -> Result<()> {
        let table = signal.table.as_str();
        if signal.kind == MutationKind::Update {
            let frontend_groups_removed = self.frontend_groups_removed(signal);
            self.garbage
                .perform_record_garbage_check(
                    ctx,
                    table,
                    signal.uid,
                    &signal.changed_fields,
                    frontend_groups_removed,
                )
                .await?;
        }

        match table {
            PAGES_TABLE => {
                self.data
                    .handle_page_update(ctx, signal.uid, &signal.changed_fields)
                    .await
            }
            CONTENT_TABLE => {
                self.data
                    .handle_content_element_update(ctx, signal.uid, &signal.changed_fields)
                    .await
            }
            _ => self.data.handle_record_update(ctx, table, signal.uid).await,
        }
    }

    async fn handle_delete(&self, ctx: &RequestContext, signal: &MutationSignal) -> Result<()> {
        if signal.table == CONTENT_TABLE {
            let page_id = signal
                .previous_fields
                .get("pid")
                .or_else(|| signal.changed_fields.get("pid"))
                .map(value_to_i64);
            return self
                .data
                .handle_content_element_deletion(ctx, signal.uid, page_id)
                .await;
        }
        self.garbage
            .collect_garbage(ctx, &signal.table, signal.uid)
            .await
    }

    async fn handle_move(&self, ctx: &RequestContext, signal: &MutationSignal) -> Result<()> {
        if signal.table == PAGES_TABLE {
            self.garbage
                .handle_page_movement(ctx, signal.uid, signal.previous_parent_id)
                .await?;
            return self
                .data
                .handle_moved_page(ctx, signal.uid, signal.previous_parent_id)
                .await;
        }
        self.data
            .handle_moved_record(ctx, &signal.table, signal.uid)
            .await
    }

    fn frontend_groups_removed(&self, signal: &MutationSignal) -> bool {
        let Some(field) = self
            .eligibility
            .tables()
            .get(&signal.table)
            .fe_group_field
            .as_deref()
        else {
            return false;
        };
        let Some(current) = signal.changed_fields.get(field) else {
            return false;
        };
        let previous = signal
            .previous_fields
            .get(field)
            .map(value_to_string)
            .unwrap_or_default();
        EligibilityEvaluator::frontend_groups_removed(&previous, &value_to_string(current))
    }
}
