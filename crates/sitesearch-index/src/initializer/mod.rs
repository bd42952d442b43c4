//! Queue initialization: bulk (re)population of a site's queue.
//!
//! Each indexing configuration names an [`Initializer`]. The
//! [`QueueInitializationService`] clears the configuration's rows and runs the
//! matching initializer, one configuration at a time.

mod page;
mod record;

pub use page::PageInitializer;
pub use record::RecordInitializer;

use crate::queue::QueueStore;
use crate::site::SiteResolver;
use async_trait::async_trait;
use sitesearch_core::{
    Error, IndexingConfiguration, InitializationStatus, RequestContext, Result, Site,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Populates the queue for one indexing configuration of a site.
#[async_trait]
pub trait Initializer: Send + Sync {
    /// Name configurations refer to.
    fn name(&self) -> &str;

    /// Queue every eligible record of the configuration.
    ///
    /// Per-table failures are reported in the returned status. `Err` is
    /// reserved for failures that make the whole store unusable.
    async fn initialize(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<InitializationStatus>;
}

/// Initializers by name.
pub struct InitializerRegistry {
    initializers: HashMap<String, Arc<dyn Initializer>>,
}

impl InitializerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initializers: HashMap::new(),
        }
    }

    /// Register an initializer under its name.
    pub fn register(&mut self, initializer: Arc<dyn Initializer>) {
        self.initializers
            .insert(initializer.name().to_string(), initializer);
    }

    /// Initializer by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Initializer>> {
        self.initializers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownInitializer(name.to_string()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.initializers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for InitializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs initializers for sites and configurations.
pub struct QueueInitializationService {
    resolver: Arc<SiteResolver>,
    queue: Arc<QueueStore>,
    registry: Arc<InitializerRegistry>,
}

impl QueueInitializationService {
    pub fn new(
        resolver: Arc<SiteResolver>,
        queue: Arc<QueueStore>,
        registry: Arc<InitializerRegistry>,
    ) -> Self {
        Self {
            resolver,
            queue,
            registry,
        }
    }

    pub fn registry(&self) -> &InitializerRegistry {
        &self.registry
    }

    /// Initialize one configuration of the site, or all enabled ones.
    ///
    /// A failing configuration is reported in its status and the run goes
    /// on; only a lost store connection aborts it.
    pub async fn initialize_site(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration_name: Option<&str>,
    ) -> Result<Vec<InitializationStatus>> {
        let configurations: Vec<&IndexingConfiguration> = match configuration_name {
            Some(name) => {
                let configuration = site.configuration.indexing_configuration(name).ok_or_else(
                    || {
                        Error::InvalidConfiguration(format!(
                            "site {} has no enabled indexing configuration '{}'",
                            site.root_page_id, name
                        ))
                    },
                )?;
                vec![configuration]
            }
            None => site.configuration.enabled_configurations().collect(),
        };

        let mut statuses = Vec::with_capacity(configurations.len());
        for configuration in configurations {
            let status = match self.initialize_configuration(ctx, site, configuration).await {
                Ok(status) => status,
                Err(e) if e.is_store_wide() => return Err(e),
                Err(e) => {
                    warn!(
                        "Initializing '{}' of site {} failed: {}",
                        configuration.name, site.root_page_id, e
                    );
                    failed_status(configuration, &e)
                }
            };
            statuses.push(status);
        }

        info!(
            "Initialized {} configuration(s) of site {}",
            statuses.len(),
            site.root_page_id
        );
        Ok(statuses)
    }

    /// Initialize the given site, or every configured site.
    pub async fn initialize_sites(
        &self,
        ctx: &RequestContext,
        root: Option<i64>,
        configuration_name: Option<&str>,
    ) -> Result<Vec<InitializationStatus>> {
        let sites = match root {
            Some(root) => vec![self.resolver.resolve_site(root).await?],
            None => self.resolver.all_sites().await?,
        };
        let mut statuses = Vec::new();
        for site in sites {
            statuses.extend(self.initialize_site(ctx, &site, configuration_name).await?);
        }
        Ok(statuses)
    }

    async fn initialize_configuration(
        &self,
        ctx: &RequestContext,
        site: &Site,
        configuration: &IndexingConfiguration,
    ) -> Result<InitializationStatus> {
        let initializer = self.registry.get(configuration.initializer_name())?;
        let removed = self
            .queue
            .delete_items_by_site(site.root_page_id, Some(&configuration.name))
            .await?;
        if removed > 0 {
            info!(
                "Cleared {} rows of '{}' for site {}",
                removed, configuration.name, site.root_page_id
            );
        }
        initializer.initialize(ctx, site, configuration).await
    }
}

fn failed_status(configuration: &IndexingConfiguration, error: &Error) -> InitializationStatus {
    InitializationStatus {
        initialized: false,
        table: configuration.table().to_string(),
        configuration_name: configuration.name.clone(),
        rows_affected: 0,
        error: Some(error.to_string()),
        messages: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture};
    use sitesearch_core::{Record, SiteConfiguration};

    #[test]
    fn test_unknown_initializer() {
        let registry = InitializerRegistry::default();
        assert!(registry.names().is_empty());
        assert!(matches!(
            registry.get("custom"),
            Err(Error::UnknownInitializer(name)) if name == "custom"
        ));
    }

    #[tokio::test]
    async fn test_initialize_site_queues_pages_and_records() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10))
            .await;
        let service = fixture.service();

        let statuses = service
            .initialization
            .initialize_sites(&fixture.ctx(), Some(1), None)
            .await
            .unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.initialized));
        assert_eq!(statuses[0].rows_affected, 3);
        assert_eq!(statuses[1].rows_affected, 1);
        assert_eq!(service.initialization.registry().names(), vec!["page", "record"]);
    }

    #[tokio::test]
    async fn test_reinitialize_replaces_rows() {
        let fixture = Fixture::new().await;
        let service = fixture.service();
        let ctx = fixture.ctx();

        service.initialize(&ctx, 1, Some("pages")).await.unwrap();
        fixture.store.remove_record("pages", 11).await;
        let statuses = service.initialize(&ctx, 1, Some("pages")).await.unwrap();

        assert_eq!(statuses[0].rows_affected, 2);
        assert!(!service.queue.contains_item("pages", 11).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_configuration_does_not_stop_run() {
        let fixture = Fixture::new().await;
        fixture.store.insert_record(page(12, 1)).await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 10))
            .await;
        fixture.store.reject_item("pages", 12).await;
        let service = fixture.service();

        let statuses = service.initialize(&fixture.ctx(), 1, None).await.unwrap();
        assert!(!statuses[0].initialized);
        assert!(statuses[0].error.as_deref().unwrap().contains("rejected"));
        assert!(statuses[1].initialized);
        assert!(service.queue.contains_item("tx_news", 1).await.unwrap());
        assert!(!service.queue.contains_item("pages", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_connection_aborts_run() {
        let fixture = Fixture::new().await;
        let service = fixture.service();
        let site = service.resolver.resolve_site(1).await.unwrap();
        fixture.store.set_disconnected(true);

        let err = service
            .initialization
            .initialize_site(&fixture.ctx(), &site, None)
            .await
            .unwrap_err();
        assert!(err.is_store_wide());
    }

    #[tokio::test]
    async fn test_unknown_initializer_is_reported_per_configuration() {
        let mut custom = sitesearch_core::IndexingConfiguration::for_table("tx_news");
        custom.initializer = Some("custom".to_string());
        let site = SiteConfiguration::new(1, "example.org").with_configuration(custom);
        let fixture = Fixture::with_sites(vec![site]).await;

        let statuses = fixture
            .service()
            .initialize(&fixture.ctx(), 1, None)
            .await
            .unwrap();
        assert_eq!(statuses[0].error.as_deref(), Some("unknown initializer: custom"));
    }

    #[tokio::test]
    async fn test_unknown_configuration_name() {
        let fixture = Fixture::new().await;
        let err = fixture
            .service()
            .initialize(&fixture.ctx(), 1, Some("tx_blog"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(fixture
            .store
            .queue_tables()
            .await
            .values()
            .all(Vec::is_empty));
    }
}
