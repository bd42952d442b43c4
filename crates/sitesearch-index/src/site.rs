//! Site resolution: which root site owns a record.

use sitesearch_core::{
    Datastore, Error, Record, RecordFilter, Result, Site, SiteConfigurationProvider, PAGES_TABLE,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Resolves records to their root sites.
///
/// Results are cached per resolver instance; the caches are an optimization
/// only and can be dropped with [`clear_cache`](Self::clear_cache).
pub struct SiteResolver {
    datastore: Arc<dyn Datastore>,
    sites: Arc<dyn SiteConfigurationProvider>,
    /// Also index records stored on other sites' additional pages
    track_records_outside_siteroot: bool,
    roots: RwLock<HashMap<(String, i64), i64>>,
    resolved_sites: RwLock<HashMap<i64, Arc<Site>>>,
}

impl SiteResolver {
    /// Create a new resolver.
    pub fn new(datastore: Arc<dyn Datastore>, sites: Arc<dyn SiteConfigurationProvider>) -> Self {
        Self {
            datastore,
            sites,
            track_records_outside_siteroot: true,
            roots: RwLock::new(HashMap::new()),
            resolved_sites: RwLock::new(HashMap::new()),
        }
    }

    /// Builder: enable or disable alternative root sites.
    #[must_use]
    pub fn with_outside_siteroot_tracking(mut self, enabled: bool) -> Self {
        self.track_records_outside_siteroot = enabled;
        self
    }

    /// Drop all cached resolutions.
    pub async fn clear_cache(&self) {
        self.roots.write().await.clear();
        self.resolved_sites.write().await.clear();
    }

    /// Whether the page is flagged as site root.
    pub async fn is_root_page(&self, page_id: i64) -> Result<bool> {
        Ok(self
            .datastore
            .fetch_record(PAGES_TABLE, page_id)
            .await?
            .is_some_and(|page| page.flag("is_siteroot")))
    }

    /// Root page id of the site owning the record.
    pub async fn resolve_root_site_id(&self, table: &str, uid: i64) -> Result<i64> {
        let key = (table.to_string(), uid);
        if let Some(root) = self.roots.read().await.get(&key) {
            return Ok(*root);
        }

        let root = if table == PAGES_TABLE {
            self.root_of_page(uid).await?
        } else {
            let record = self
                .datastore
                .fetch_record(table, uid)
                .await?
                .ok_or_else(|| Error::RecordNotFound {
                    table: table.to_string(),
                    uid,
                })?;
            self.root_of_page(record.pid())
                .await
                .map_err(|e| match e {
                    Error::RootPageRecordNotFound { .. } => Error::root_not_found(table, uid),
                    other => other,
                })?
        };

        self.roots.write().await.insert(key, root);
        Ok(root)
    }

    async fn root_of_page(&self, page_id: i64) -> Result<i64> {
        let mut visited = HashSet::new();
        let mut current = page_id;
        loop {
            if current <= 0 || !visited.insert(current) {
                debug!("Rootline of page {} is broken at {}", page_id, current);
                return Err(Error::root_not_found(PAGES_TABLE, page_id));
            }
            let Some(page) = self.datastore.fetch_record(PAGES_TABLE, current).await? else {
                return Err(Error::root_not_found(PAGES_TABLE, page_id));
            };
            let translation_parent = page.int("l10n_parent");
            if page.int("sys_language_uid") > 0 && translation_parent > 0 {
                current = translation_parent;
            } else if page.flag("is_siteroot") {
                return Ok(page.uid);
            } else {
                current = page.pid();
            }
        }
    }

    /// Site rooted at the page.
    pub async fn resolve_site(&self, root_page_id: i64) -> Result<Arc<Site>> {
        if let Some(site) = self.resolved_sites.read().await.get(&root_page_id) {
            return Ok(Arc::clone(site));
        }
        let configuration = self
            .sites
            .site_configuration(root_page_id)
            .await
            .ok_or(Error::SiteNotFound(root_page_id))?;
        let site = Arc::new(Site::new(configuration));
        self.resolved_sites
            .write()
            .await
            .insert(root_page_id, Arc::clone(&site));
        Ok(site)
    }

    /// Site owning the page.
    pub async fn site_by_page_id(&self, page_id: i64) -> Result<Arc<Site>> {
        let root = self.resolve_root_site_id(PAGES_TABLE, page_id).await?;
        self.resolve_site(root).await
    }

    /// All configured sites.
    pub async fn all_sites(&self) -> Result<Vec<Arc<Site>>> {
        let mut sites = Vec::new();
        for root in self.sites.root_page_ids().await {
            sites.push(self.resolve_site(root).await?);
        }
        Ok(sites)
    }

    /// Other sites indexing records of `table` stored on `page_id`.
    pub async fn alternative_root_site_ids(
        &self,
        table: &str,
        uid: i64,
        page_id: i64,
    ) -> Result<Vec<i64>> {
        if !self.track_records_outside_siteroot {
            return Ok(Vec::new());
        }
        let mut roots = Vec::new();
        for root in self.sites.root_page_ids().await {
            if let Some(configuration) = self.sites.site_configuration(root).await {
                if configuration.observes_page(table, page_id) {
                    roots.push(root);
                }
            }
        }
        if !roots.is_empty() {
            debug!("{}:{} is also indexed by sites {:?}", table, uid, roots);
        }
        Ok(roots)
    }

    /// Own root site plus alternative root sites, own site first.
    pub async fn responsible_root_site_ids(&self, table: &str, uid: i64) -> Result<Vec<i64>> {
        let own = match self.resolve_root_site_id(table, uid).await {
            Ok(root) => Some(root),
            Err(e) if e.is_not_found() && self.track_records_outside_siteroot => None,
            Err(e) => return Err(e),
        };

        let page_id = if table == PAGES_TABLE {
            uid
        } else {
            match self.datastore.fetch_record(table, uid).await? {
                Some(record) => record.pid(),
                None => {
                    return Err(Error::RecordNotFound {
                        table: table.to_string(),
                        uid,
                    })
                }
            }
        };
        let alternatives: BTreeSet<i64> = self
            .alternative_root_site_ids(table, uid, page_id)
            .await?
            .into_iter()
            .filter(|root| Some(*root) != own)
            .collect();

        let roots: Vec<i64> = own.into_iter().chain(alternatives).collect();
        if roots.is_empty() {
            return Err(Error::root_not_found(table, uid));
        }
        Ok(roots)
    }

    /// The page and its ancestors, nearest first.
    ///
    /// Stops at the tree top, at a missing page, or when a cycle is detected.
    pub async fn root_line(&self, page_id: i64) -> Result<Vec<Record>> {
        let mut line = Vec::new();
        let mut visited = HashSet::new();
        let mut current = page_id;
        while current > 0 && visited.insert(current) {
            let Some(page) = self.datastore.fetch_record(PAGES_TABLE, current).await? else {
                break;
            };
            current = page.pid();
            line.push(page);
        }
        Ok(line)
    }

    /// Whether an ancestor hides the page through `extendToSubpages`.
    pub async fn is_hidden_by_ancestor(&self, page_id: i64) -> Result<bool> {
        let line = self.root_line(page_id).await?;
        Ok(line
            .iter()
            .skip(1)
            .any(|page| page.flag("hidden") && page.flag("extendToSubpages")))
    }

    /// Whether an ancestor excludes its subtree from search.
    pub async fn is_in_excluded_subtree(&self, page_id: i64) -> Result<bool> {
        let line = self.root_line(page_id).await?;
        Ok(line
            .iter()
            .skip(1)
            .any(|page| page.flag("no_search_sub_entries")))
    }

    /// Pages of the tree below `start`, `start` first, breadth first.
    ///
    /// Only pages matching `filter` are listed. Pages flagged
    /// `no_search_sub_entries`, or hidden with `extendToSubpages`, are
    /// listed but not descended into.
    pub async fn page_tree(&self, start: i64, filter: &RecordFilter) -> Result<Vec<i64>> {
        let mut tree = vec![start];
        let mut visited = HashSet::from([start]);
        let mut frontier = match self.datastore.fetch_record(PAGES_TABLE, start).await? {
            Some(page) if !closes_subtree(&page) => vec![start],
            _ => Vec::new(),
        };

        while !frontier.is_empty() {
            let children = self
                .datastore
                .find_records(
                    PAGES_TABLE,
                    &RecordFilter::in_list("pid", &frontier).and(filter.clone()),
                )
                .await?;
            frontier = Vec::new();
            for child in children {
                if !visited.insert(child.uid) {
                    continue;
                }
                tree.push(child.uid);
                if !closes_subtree(&child) {
                    frontier.push(child.uid);
                }
            }
        }
        Ok(tree)
    }
}

fn closes_subtree(page: &Record) -> bool {
    page.flag("no_search_sub_entries") || (page.flag("hidden") && page.flag("extendToSubpages"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page, Fixture};
    use sitesearch_core::IndexingConfiguration;

    #[tokio::test]
    async fn test_resolves_page_through_rootline() {
        let fixture = Fixture::new().await;
        let resolver = fixture.resolver();
        assert_eq!(resolver.resolve_root_site_id("pages", 11).await.unwrap(), 1);
        assert_eq!(resolver.resolve_root_site_id("pages", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolves_record_through_pid() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 3).with("pid", 11))
            .await;
        let resolver = fixture.resolver();
        assert_eq!(resolver.resolve_root_site_id("tx_news", 3).await.unwrap(), 1);

        let err = resolver.resolve_root_site_id("tx_news", 4).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cycle_is_root_page_record_not_found() {
        let fixture = Fixture::new().await;
        fixture.store.insert_record(page(50, 51)).await;
        fixture.store.insert_record(page(51, 50)).await;

        let err = fixture
            .resolver()
            .resolve_root_site_id("pages", 50)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RootPageRecordNotFound { uid: 50, .. }));
    }

    #[tokio::test]
    async fn test_orphaned_record() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 3).with("pid", 999))
            .await;
        let err = fixture
            .resolver()
            .resolve_root_site_id("tx_news", 3)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "root page record not found for tx_news:3");
    }

    #[tokio::test]
    async fn test_translated_page_resolves_through_parent() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(
                page(110, 0)
                    .with("sys_language_uid", 1)
                    .with("l10n_parent", 11),
            )
            .await;
        let root = fixture
            .resolver()
            .resolve_root_site_id("pages", 110)
            .await
            .unwrap();
        assert_eq!(root, 1);
    }

    #[tokio::test]
    async fn test_resolve_site_unknown_root() {
        let fixture = Fixture::new().await;
        let resolver = fixture.resolver();
        assert_eq!(resolver.resolve_site(1).await.unwrap().domain, "example.org");
        assert!(matches!(
            resolver.resolve_site(10).await,
            Err(Error::SiteNotFound(10))
        ));
    }

    #[tokio::test]
    async fn test_responsible_roots_include_alternative_sites() {
        let mut news = IndexingConfiguration::for_table("tx_news");
        news.additional_page_ids = vec![900];
        let fixture = Fixture::with_sites(vec![
            Fixture::site_configuration(),
            Fixture::second_site().with_configuration(news),
        ])
        .await;
        fixture.store.insert_record(page(900, 0)).await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 1).with("pid", 900))
            .await;
        fixture
            .store
            .insert_record(Record::new("tx_news", 2).with("pid", 11))
            .await;

        let resolver = fixture.resolver();
        assert_eq!(
            resolver.responsible_root_site_ids("tx_news", 1).await.unwrap(),
            vec![100]
        );
        assert_eq!(
            resolver.responsible_root_site_ids("tx_news", 2).await.unwrap(),
            vec![1]
        );

        let strict = fixture.resolver().with_outside_siteroot_tracking(false);
        assert!(strict.responsible_root_site_ids("tx_news", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_root_line_and_cache() {
        let fixture = Fixture::new().await;
        let resolver = fixture.resolver();
        let line: Vec<i64> = resolver
            .root_line(11)
            .await
            .unwrap()
            .iter()
            .map(|p| p.uid)
            .collect();
        assert_eq!(line, vec![11, 10, 1]);

        assert_eq!(resolver.resolve_root_site_id("pages", 11).await.unwrap(), 1);
        fixture.store.remove_record("pages", 11).await;
        assert_eq!(resolver.resolve_root_site_id("pages", 11).await.unwrap(), 1);
        resolver.clear_cache().await;
        assert!(resolver.resolve_root_site_id("pages", 11).await.is_err());
    }

    #[tokio::test]
    async fn test_page_tree_stops_at_excluded_subtrees() {
        let fixture = Fixture::new().await;
        fixture
            .store
            .insert_record(page(12, 1).with("no_search_sub_entries", 1))
            .await;
        fixture.store.insert_record(page(13, 12)).await;
        fixture
            .store
            .insert_record(page(14, 1).with("hidden", 1).with("extendToSubpages", 1))
            .await;
        fixture.store.insert_record(page(15, 14)).await;

        let tree = fixture
            .resolver()
            .page_tree(1, &RecordFilter::all())
            .await
            .unwrap();
        assert_eq!(tree, vec![1, 10, 12, 14, 11]);

        let resolver = fixture.resolver();
        assert!(resolver.is_in_excluded_subtree(13).await.unwrap());
        assert!(resolver.is_hidden_by_ancestor(15).await.unwrap());
        assert!(!resolver.is_hidden_by_ancestor(14).await.unwrap());
    }
}
