//! Garbage remover strategies: delete a record's documents and queue rows.

use crate::eligibility::EligibilityEvaluator;
use crate::index_queue::IndexQueue;
use crate::queue::QueueStore;
use crate::site::SiteResolver;
use async_trait::async_trait;
use sitesearch_core::{
    ConnectionManager, Datastore, DeleteQuery, RequestContext, Result, Site, CONTENT_TABLE,
    PAGES_TABLE,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Removes the index documents and queue rows of one record.
#[async_trait]
pub trait GarbageRemoverStrategy: Send + Sync {
    /// Remove the record from the index. Safe when nothing is indexed.
    async fn remove_garbage_of(&self, ctx: &RequestContext, table: &str, uid: i64) -> Result<()>;
}

// ============================================================================
// Shared removal steps
// ============================================================================

/// Search engine and queue access shared by the strategies.
#[derive(Clone)]
pub struct IndexCleaner {
    resolver: Arc<SiteResolver>,
    queue: Arc<QueueStore>,
    connections: Arc<dyn ConnectionManager>,
}

impl IndexCleaner {
    pub fn new(
        resolver: Arc<SiteResolver>,
        queue: Arc<QueueStore>,
        connections: Arc<dyn ConnectionManager>,
    ) -> Self {
        Self {
            resolver,
            queue,
            connections,
        }
    }

    /// Sites that may hold documents of the record.
    ///
    /// Taken from the record's queue rows, or from its responsible sites
    /// when it is not queued.
    pub async fn sites_for(&self, table: &str, uid: i64) -> Result<Vec<Arc<Site>>> {
        let mut roots: BTreeSet<i64> = self
            .queue
            .items(table, uid)
            .await?
            .iter()
            .map(|item| item.root)
            .collect();
        if roots.is_empty() {
            match self.resolver.responsible_root_site_ids(table, uid).await {
                Ok(responsible) => roots.extend(responsible),
                Err(e) if e.is_not_found() => {
                    debug!("{}:{} belongs to no site: {}", table, uid, e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut sites = Vec::with_capacity(roots.len());
        for root in roots {
            match self.resolver.resolve_site(root).await {
                Ok(site) if site.configuration.is_monitored_table(table) => sites.push(site),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(sites)
    }

    /// Delete matching documents from the site's cores, then commit if the
    /// site enables commits. `language` limits the cores to one language.
    pub async fn delete_documents(
        &self,
        site: &Site,
        query: &DeleteQuery,
        language: Option<i64>,
    ) -> Result<()> {
        for (core_language, connection) in self.connections.connections(site) {
            if language.is_some_and(|l| l != core_language) {
                continue;
            }
            connection.delete_by_query(query).await?;
            if site.configuration.enable_commits {
                connection.commit().await?;
            }
        }
        debug!("Deleted '{}' from site {}", query, site.root_page_id);
        Ok(())
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Default strategy: the record's own documents in every language.
pub struct RecordGarbageRemover {
    cleaner: IndexCleaner,
}

impl RecordGarbageRemover {
    pub fn new(cleaner: IndexCleaner) -> Self {
        Self { cleaner }
    }
}

#[async_trait]
impl GarbageRemoverStrategy for RecordGarbageRemover {
    async fn remove_garbage_of(&self, _ctx: &RequestContext, table: &str, uid: i64) -> Result<()> {
        for site in self.cleaner.sites_for(table, uid).await? {
            let query = DeleteQuery::new(table, &site.site_hash).uid(uid);
            self.cleaner.delete_documents(&site, &query, None).await?;
        }
        let removed = self.cleaner.queue().delete_item(table, uid).await?;
        info!("Removed {}:{} from the index ({} queue rows)", table, uid, removed);
        Ok(())
    }
}

/// Strategy for pages and content elements.
///
/// Content elements live inside their page's document, so their garbage
/// requeues the page. Page garbage also removes the page's content element
/// documents; a translated page only loses the documents of its language.
pub struct PageGarbageRemover {
    cleaner: IndexCleaner,
    datastore: Arc<dyn Datastore>,
    eligibility: Arc<EligibilityEvaluator>,
    index_queue: Arc<IndexQueue>,
}

impl PageGarbageRemover {
    pub fn new(
        cleaner: IndexCleaner,
        datastore: Arc<dyn Datastore>,
        eligibility: Arc<EligibilityEvaluator>,
        index_queue: Arc<IndexQueue>,
    ) -> Self {
        Self {
            cleaner,
            datastore,
            eligibility,
            index_queue,
        }
    }

    async fn remove_content_element(&self, ctx: &RequestContext, uid: i64) -> Result<()> {
        let Some(content) = self.datastore.fetch_record(CONTENT_TABLE, uid).await? else {
            return Ok(());
        };
        match self
            .index_queue
            .update_item(ctx, PAGES_TABLE, content.pid())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Page of content element {} is gone: {}", uid, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_page(&self, uid: i64) -> Result<()> {
        let page = self.datastore.fetch_record(PAGES_TABLE, uid).await?;
        if let Some(page) = page.filter(|p| self.eligibility.is_localized_record(PAGES_TABLE, p)) {
            let language = self.eligibility.language_of(PAGES_TABLE, &page);
            let original = page.int("l10n_parent");
            for site in self.cleaner.sites_for(PAGES_TABLE, original).await? {
                let query = DeleteQuery::new(PAGES_TABLE, &site.site_hash)
                    .uid(original)
                    .language(language);
                self.cleaner
                    .delete_documents(&site, &query, Some(language))
                    .await?;
            }
            info!("Removed language {} of page {} from the index", language, original);
            return Ok(());
        }

        for site in self.cleaner.sites_for(PAGES_TABLE, uid).await? {
            let page_query = DeleteQuery::new(PAGES_TABLE, &site.site_hash).uid(uid);
            self.cleaner.delete_documents(&site, &page_query, None).await?;
            let content_query = DeleteQuery::new(CONTENT_TABLE, &site.site_hash).pid(uid);
            self.cleaner
                .delete_documents(&site, &content_query, None)
                .await?;
        }
        let removed = self.cleaner.queue().delete_item(PAGES_TABLE, uid).await?;
        info!("Removed page {} from the index ({} queue rows)", uid, removed);
        Ok(())
    }
}

#[async_trait]
impl GarbageRemoverStrategy for PageGarbageRemover {
    async fn remove_garbage_of(&self, ctx: &RequestContext, table: &str, uid: i64) -> Result<()> {
        if table == CONTENT_TABLE {
            self.remove_content_element(ctx, uid).await
        } else {
            self.remove_page(uid).await
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Strategy per table with a default for all other tables.
pub struct GarbageRemoverRegistry {
    strategies: HashMap<String, Arc<dyn GarbageRemoverStrategy>>,
    default: Arc<dyn GarbageRemoverStrategy>,
}

impl GarbageRemoverRegistry {
    /// Registry using `default` for every table.
    pub fn new(default: Arc<dyn GarbageRemoverStrategy>) -> Self {
        Self {
            strategies: HashMap::new(),
            default,
        }
    }

    /// Register a strategy for a table.
    pub fn register(&mut self, table: &str, strategy: Arc<dyn GarbageRemoverStrategy>) {
        self.strategies.insert(table.to_string(), strategy);
    }

    /// Strategy for a table.
    #[must_use]
    pub fn get(&self, table: &str) -> Arc<dyn GarbageRemoverStrategy> {
        self.strategies
            .get(table)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Whether a table has its own strategy.
    #[must_use]
    pub fn has_strategy(&self, table: &str) -> bool {
        self.strategies.contains_key(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture};
    use sitesearch_core::{Error, NewQueueItem, Record, SearchDocument, SearchEngineError};

    fn document(site: &Site, item_type: &str, uid: i64, pid: i64, language: i64) -> SearchDocument {
        SearchDocument {
            item_type: item_type.to_string(),
            uid,
            pid,
            site_hash: site.site_hash.clone(),
            language,
        }
    }

    #[tokio::test]
    async fn test_record_removal_deletes_documents_then_queue_row() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10))
            .await;
        let service = fixture.service();
        let site = service.resolver.resolve_site(1).await.unwrap();
        fixture.engine.add_document(document(&site, "tx_news", 1, 10, 0)).await;
        fixture.engine.add_document(document(&site, "tx_news", 2, 10, 0)).await;
        service
            .queue
            .upsert_item(&NewQueueItem::new(1, "tx_news", 1, "tx_news"))
            .await
            .unwrap();

        service
            .garbage
            .collect_garbage(&fixture.ctx(), "tx_news", 1)
            .await
            .unwrap();

        let documents = fixture.engine.documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].uid, 2);
        assert!(!service.queue.contains_item("tx_news", 1).await.unwrap());
        assert_eq!(fixture.engine.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_engine_keeps_queue_row() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10))
            .await;
        let service = fixture.service();
        service
            .queue
            .upsert_item(&NewQueueItem::new(1, "tx_news", 1, "tx_news"))
            .await
            .unwrap();
        fixture.engine.set_available(false);

        let err = service
            .garbage
            .collect_garbage(&fixture.ctx(), "tx_news", 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SearchEngine(SearchEngineError::Unavailable(_))
        ));
        assert!(service.queue.contains_item("tx_news", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_removal_without_documents_is_noop() {
        let fixture = Fixture::new().await;
        let service = fixture.service();
        service
            .garbage
            .collect_garbage(&fixture.ctx(), "tx_news", 42)
            .await
            .unwrap();
        service
            .garbage
            .collect_garbage(&fixture.ctx(), "pages", 11)
            .await
            .unwrap();
        assert_eq!(
            fixture.engine.delete_log().await,
            vec![
                format!(
                    "type:pages AND uid:11 AND siteHash:{}",
                    service.resolver.resolve_site(1).await.unwrap().site_hash
                ),
                format!(
                    "type:tt_content AND pid:11 AND siteHash:{}",
                    service.resolver.resolve_site(1).await.unwrap().site_hash
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_page_removal_includes_content_elements() {
        let fixture = Fixture::new().await;
        let service = fixture.service();
        let site = service.resolver.resolve_site(1).await.unwrap();
        fixture.engine.add_document(document(&site, "pages", 11, 10, 0)).await;
        fixture.engine.add_document(document(&site, "tt_content", 5, 11, 0)).await;
        fixture.engine.add_document(document(&site, "tt_content", 6, 10, 0)).await;
        service.index_queue.update_item(&fixture.ctx(), "pages", 11).await.unwrap();

        service
            .garbage
            .collect_garbage(&fixture.ctx(), "pages", 11)
            .await
            .unwrap();

        let remaining: Vec<i64> = fixture.engine.documents().await.iter().map(|d| d.uid).collect();
        assert_eq!(remaining, vec![6]);
        assert!(!service.queue.contains_item("pages", 11).await.unwrap());
    }

    #[tokio::test]
    async fn test_translated_page_removes_only_its_language() {
        let mut configuration = Fixture::site_configuration();
        configuration.languages.available = vec![1];
        let fixture = Fixture::with_sites(vec![configuration]).await;
        fixture
            .store
            .insert_record(
                page(110, 10)
                    .with("sys_language_uid", 1)
                    .with("l10n_parent", 11),
            )
            .await;
        let service = fixture.service();
        let site = service.resolver.resolve_site(1).await.unwrap();
        fixture.engine.add_document(document(&site, "pages", 11, 10, 0)).await;
        fixture.engine.add_document(document(&site, "pages", 11, 10, 1)).await;
        service.index_queue.update_item(&fixture.ctx(), "pages", 11).await.unwrap();

        service
            .garbage
            .collect_garbage(&fixture.ctx(), "pages", 110)
            .await
            .unwrap();

        let languages: Vec<i64> = fixture
            .engine
            .documents()
            .await
            .iter()
            .map(|d| d.language)
            .collect();
        assert_eq!(languages, vec![0]);
        assert!(service.queue.contains_item("pages", 11).await.unwrap());
    }

    #[tokio::test]
    async fn test_content_element_garbage_requeues_page() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tt_content", 5).with("pid", 11).with("hidden", 1))
            .await;
        let service = fixture.service();

        service
            .garbage
            .collect_garbage(&fixture.ctx(), "tt_content", 5)
            .await
            .unwrap();
        assert!(service.queue.contains_item("pages", 11).await.unwrap());
        assert!(fixture.engine.delete_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_default() {
        let fixture = Fixture::new().await;
        let service = fixture.service();
        let registry = service.garbage.removers();
        assert!(registry.has_strategy("pages"));
        assert!(registry.has_strategy("tt_content"));
        assert!(!registry.has_strategy("tx_news"));
    }
}
