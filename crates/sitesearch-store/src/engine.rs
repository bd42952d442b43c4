//! In-memory search engine.

use async_trait::async_trait;
use sitesearch_core::{
    ConnectionManager, DeleteQuery, EngineMetadata, SearchDocument, SearchEngineConnection,
    SearchEngineError, Site,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Search engine core holding documents in memory.
///
/// Can be switched unavailable to exercise failure handling.
#[derive(Debug)]
pub struct MemorySearchEngine {
    name: String,
    documents: RwLock<Vec<SearchDocument>>,
    delete_log: RwLock<Vec<String>>,
    available: AtomicBool,
    commits: AtomicUsize,
}

impl MemorySearchEngine {
    /// Create an empty, available engine.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(Vec::new()),
            delete_log: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            commits: AtomicUsize::new(0),
        }
    }

    /// Add a document to the index.
    pub async fn add_document(&self, document: SearchDocument) {
        self.documents.write().await.push(document);
    }

    /// Documents currently indexed.
    pub async fn documents(&self) -> Vec<SearchDocument> {
        self.documents.read().await.clone()
    }

    /// Delete queries received so far, in order.
    pub async fn delete_log(&self) -> Vec<String> {
        self.delete_log.read().await.clone()
    }

    /// Number of commits received.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Switch the engine on or off.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SearchEngineError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SearchEngineError::Unavailable(format!(
                "{} is not reachable",
                self.name
            )))
        }
    }
}

impl Default for MemorySearchEngine {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl SearchEngineConnection for MemorySearchEngine {
    async fn delete_by_query(&self, query: &DeleteQuery) -> Result<(), SearchEngineError> {
        self.check_available()?;
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|document| !query.matches(document));
        debug!(
            "Deleted {} documents from {} by '{}'",
            before - documents.len(),
            self.name,
            query
        );
        self.delete_log.write().await.push(query.to_string());
        Ok(())
    }

    async fn commit(&self) -> Result<(), SearchEngineError> {
        self.check_available()?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn metadata(&self) -> Result<EngineMetadata, SearchEngineError> {
        self.check_available()?;
        Ok(EngineMetadata {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Connection manager serving one shared engine for every site language,
/// with optional per-language overrides.
#[derive(Clone)]
pub struct MemoryConnectionManager {
    default: Arc<dyn SearchEngineConnection>,
    languages: HashMap<i64, Arc<dyn SearchEngineConnection>>,
}

impl MemoryConnectionManager {
    #[must_use]
    pub fn new(default: Arc<dyn SearchEngineConnection>) -> Self {
        Self {
            default,
            languages: HashMap::new(),
        }
    }

    /// Builder: serve one language from a dedicated engine.
    #[must_use]
    pub fn with_language(mut self, language: i64, engine: Arc<dyn SearchEngineConnection>) -> Self {
        self.languages.insert(language, engine);
        self
    }
}

impl ConnectionManager for MemoryConnectionManager {
    fn connections(&self, site: &Site) -> Vec<(i64, Arc<dyn SearchEngineConnection>)> {
        site.available_language_ids
            .iter()
            .map(|language| {
                let connection = self
                    .languages
                    .get(language)
                    .cloned()
                    .unwrap_or_else(|| Arc::clone(&self.default));
                (*language, connection)
            })
            .collect()
    }
}
