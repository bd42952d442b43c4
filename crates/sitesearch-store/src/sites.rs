//! Fixed set of site configurations.

use async_trait::async_trait;
use sitesearch_core::{SiteConfiguration, SiteConfigurationProvider};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Site configurations known up front, e.g. loaded from a config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteConfigurations {
    sites: BTreeMap<i64, Arc<SiteConfiguration>>,
}

impl StaticSiteConfigurations {
    #[must_use]
    pub fn new(sites: impl IntoIterator<Item = SiteConfiguration>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|site| (site.root_page_id, Arc::new(site)))
                .collect(),
        }
    }
}

#[async_trait]
impl SiteConfigurationProvider for StaticSiteConfigurations {
    async fn site_configuration(&self, root_page_id: i64) -> Option<Arc<SiteConfiguration>> {
        self.sites.get(&root_page_id).cloned()
    }

    async fn root_page_ids(&self) -> Vec<i64> {
        self.sites.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_root_page() {
        let provider = StaticSiteConfigurations::new([
            SiteConfiguration::new(100, "b.example.org"),
            SiteConfiguration::new(1, "a.example.org"),
        ]);

        assert_eq!(provider.root_page_ids().await, vec![1, 100]);
        assert_eq!(
            provider.site_configuration(100).await.unwrap().domain,
            "b.example.org"
        );
        assert!(provider.site_configuration(5).await.is_none());
    }
}
