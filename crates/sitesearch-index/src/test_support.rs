//! Shared fixtures for unit tests.

use crate::eligibility::EligibilityEvaluator;
use crate::queue::QueueStore;
use crate::service::{IndexQueueConfig, IndexQueueService};
use crate::site::SiteResolver;
use sitesearch_core::{
    IndexingConfiguration, Record, RequestContext, SiteConfiguration, TableCatalog, PAGES_TABLE,
};
use sitesearch_store::{
    MemoryConnectionManager, MemoryDatastore, MemorySearchEngine, StaticSiteConfigurations,
};
use std::sync::Arc;

pub(crate) const NOW: i64 = 1_700_000_000;

/// Standard page below `pid`.
pub(crate) fn page(uid: i64, pid: i64) -> Record {
    Record::new(PAGES_TABLE, uid)
        .with("pid", pid)
        .with("doktype", 1)
}

/// Site 1 with pages 1 (root), 10 and 11 below it.
pub(crate) struct Fixture {
    pub store: Arc<MemoryDatastore>,
    pub sites: Arc<StaticSiteConfigurations>,
    pub engine: Arc<MemorySearchEngine>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_sites(vec![Self::site_configuration()]).await
    }

    pub async fn with_sites(sites: Vec<SiteConfiguration>) -> Self {
        Self::with_store(MemoryDatastore::new(), sites).await
    }

    pub async fn with_store(store: MemoryDatastore, sites: Vec<SiteConfiguration>) -> Self {
        store
            .insert_record(page(1, 0).with("is_siteroot", 1))
            .await;
        store.insert_record(page(10, 1)).await;
        store.insert_record(page(11, 10)).await;
        Self {
            store: Arc::new(store),
            sites: Arc::new(StaticSiteConfigurations::new(sites)),
            engine: Arc::new(MemorySearchEngine::new("memory")),
        }
    }

    pub fn site_configuration() -> SiteConfiguration {
        SiteConfiguration::new(1, "example.org")
            .with_configuration(IndexingConfiguration::for_table(PAGES_TABLE))
            .with_configuration(IndexingConfiguration::for_table("tx_news"))
    }

    pub fn second_site() -> SiteConfiguration {
        SiteConfiguration::new(100, "other.example.org")
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::at(NOW)
    }

    pub fn resolver(&self) -> SiteResolver {
        SiteResolver::new(self.store.clone(), self.sites.clone())
    }

    pub fn eligibility(&self) -> EligibilityEvaluator {
        EligibilityEvaluator::new(Arc::new(TableCatalog::new()))
    }

    pub fn queue(&self) -> QueueStore {
        QueueStore::new(self.store.clone())
    }

    pub fn service(&self) -> IndexQueueService {
        self.service_with(IndexQueueConfig::default())
    }

    pub fn service_with(&self, config: IndexQueueConfig) -> IndexQueueService {
        let connections = Arc::new(MemoryConnectionManager::new(self.engine.clone()));
        match IndexQueueService::new(self.store.clone(), self.sites.clone(), connections, config) {
            Ok(service) => service,
            Err(e) => panic!("invalid test configuration: {e}"),
        }
    }
}
