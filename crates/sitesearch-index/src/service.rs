//! Wiring of the index queue components.

use crate::eligibility::EligibilityEvaluator;
use crate::garbage::{
    GarbageHandler, GarbageRemoverRegistry, IndexCleaner, PageGarbageRemover,
    RecordGarbageRemover,
};
use crate::index_queue::IndexQueue;
use crate::initializer::{
    Initializer, InitializerRegistry, PageInitializer, QueueInitializationService,
    RecordInitializer,
};
use crate::monitor::RecordMonitor;
use crate::mount::MountPagesUpdater;
use crate::queue::{QueueStore, QueueUpdate};
use crate::site::SiteResolver;
use crate::triggers::RecursiveUpdateTriggers;
use crate::update::DataUpdateHandler;
use sitesearch_core::{
    ConnectionManager, Datastore, InitializationStatus, MutationSignal, RecursiveUpdateTrigger,
    RequestContext, Result, SiteConfigurationProvider, TableCatalog, CONTENT_TABLE,
    DEFAULT_ALLOWED_PAGE_TYPES, PAGES_TABLE,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Tunables of the index queue.
#[derive(Debug, Clone)]
pub struct IndexQueueConfig {
    /// Page types that may be indexed
    pub allowed_page_types: Vec<i64>,
    /// Queue records stored outside a site root for sites listing their page
    pub track_records_outside_siteroot: bool,
    /// Rules requeueing a page's subtree
    pub requeue_triggers: Vec<RecursiveUpdateTrigger>,
    /// Rules removing a page's subtree
    pub garbage_triggers: Vec<RecursiveUpdateTrigger>,
    /// Field layout of the content tables
    pub tables: TableCatalog,
}

impl Default for IndexQueueConfig {
    fn default() -> Self {
        let triggers = RecursiveUpdateTriggers::default();
        Self {
            allowed_page_types: DEFAULT_ALLOWED_PAGE_TYPES.to_vec(),
            track_records_outside_siteroot: true,
            requeue_triggers: triggers.requeue_triggers().to_vec(),
            garbage_triggers: triggers.garbage_triggers().to_vec(),
            tables: TableCatalog::new(),
        }
    }
}

impl IndexQueueConfig {
    fn triggers(&self) -> Result<RecursiveUpdateTriggers> {
        let mut triggers = RecursiveUpdateTriggers::empty();
        for trigger in &self.requeue_triggers {
            triggers = triggers.with_requeue_trigger(trigger.clone())?;
        }
        for trigger in &self.garbage_triggers {
            triggers = triggers.with_garbage_trigger(trigger.clone())?;
        }
        Ok(triggers)
    }
}

/// The index queue with all of its handlers.
///
/// Feed content changes to [`IndexQueueService::handle`] and (re)build a
/// site's queue with [`IndexQueueService::initialize`].
pub struct IndexQueueService {
    pub resolver: Arc<SiteResolver>,
    pub eligibility: Arc<EligibilityEvaluator>,
    pub queue: Arc<QueueStore>,
    pub index_queue: Arc<IndexQueue>,
    pub initialization: Arc<QueueInitializationService>,
    pub mount_pages: Arc<MountPagesUpdater>,
    pub garbage: Arc<GarbageHandler>,
    pub data: Arc<DataUpdateHandler>,
    pub monitor: Arc<RecordMonitor>,
}

impl IndexQueueService {
    /// Build the service. Fails on invalid trigger rules.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        sites: Arc<dyn SiteConfigurationProvider>,
        connections: Arc<dyn ConnectionManager>,
        config: IndexQueueConfig,
    ) -> Result<Self> {
        let triggers = Arc::new(config.triggers()?);
        let resolver = Arc::new(
            SiteResolver::new(Arc::clone(&datastore), sites)
                .with_outside_siteroot_tracking(config.track_records_outside_siteroot),
        );
        let eligibility = Arc::new(
            EligibilityEvaluator::new(Arc::new(config.tables))
                .with_allowed_page_types(config.allowed_page_types),
        );
        let queue = Arc::new(QueueStore::new(Arc::clone(&datastore)));
        let index_queue = Arc::new(IndexQueue::new(
            Arc::clone(&datastore),
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            Arc::clone(&queue),
        ));

        let pages = Arc::new(PageInitializer::new(
            Arc::clone(&datastore),
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            Arc::clone(&queue),
            Arc::clone(&index_queue),
        ));
        let mut initializers = InitializerRegistry::new();
        initializers.register(Arc::new(RecordInitializer::new(
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            Arc::clone(&queue),
        )));
        initializers.register(Arc::clone(&pages) as Arc<dyn Initializer>);
        let initialization = Arc::new(QueueInitializationService::new(
            Arc::clone(&resolver),
            Arc::clone(&queue),
            Arc::new(initializers),
        ));

        let mount_pages = Arc::new(MountPagesUpdater::new(
            Arc::clone(&datastore),
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            pages,
        ));

        let cleaner = IndexCleaner::new(Arc::clone(&resolver), Arc::clone(&queue), connections);
        let page_remover = Arc::new(PageGarbageRemover::new(
            cleaner.clone(),
            Arc::clone(&datastore),
            Arc::clone(&eligibility),
            Arc::clone(&index_queue),
        ));
        let mut removers = GarbageRemoverRegistry::new(Arc::new(RecordGarbageRemover::new(cleaner)));
        removers.register(PAGES_TABLE, page_remover.clone());
        removers.register(CONTENT_TABLE, page_remover);
        let garbage = Arc::new(GarbageHandler::new(
            Arc::clone(&datastore),
            Arc::clone(&eligibility),
            Arc::clone(&queue),
            Arc::clone(&triggers),
            Arc::new(removers),
        ));

        let data = Arc::new(DataUpdateHandler::new(
            datastore,
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            Arc::clone(&queue),
            Arc::clone(&index_queue),
            Arc::clone(&mount_pages),
            Arc::clone(&garbage),
            triggers,
        ));
        let monitor = Arc::new(RecordMonitor::new(
            Arc::clone(&resolver),
            Arc::clone(&eligibility),
            Arc::clone(&garbage),
            Arc::clone(&data),
        ));

        info!("Index queue service ready");
        Ok(Self {
            resolver,
            eligibility,
            queue,
            index_queue,
            initialization,
            mount_pages,
            garbage,
            data,
            monitor,
        })
    }

    /// Process one content change.
    pub async fn handle(&self, ctx: &RequestContext, signal: &MutationSignal) -> Result<()> {
        self.monitor.handle(ctx, signal).await
    }

    /// Rebuild the queue of the site rooted at `root_page_id`, for one
    /// indexing configuration or all of them.
    pub async fn initialize(
        &self,
        ctx: &RequestContext,
        root_page_id: i64,
        configuration: Option<&str>,
    ) -> Result<Vec<InitializationStatus>> {
        self.resolver.clear_cache().await;
        let site = self.resolver.resolve_site(root_page_id).await?;
        self.initialization
            .initialize_site(ctx, &site, configuration)
            .await
    }

    /// Subscribe to queue changes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueUpdate> {
        self.queue.subscribe()
    }
}
