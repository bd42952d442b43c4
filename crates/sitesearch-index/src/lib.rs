//! Index queue maintenance for sitesearch.
//!
//! Keeps the index queue in step with the content tables:
//! content changes are turned into queue rows to (re)index, and records that
//! stop qualifying are removed from the search engine and the queue.
//!
//! # Components
//!
//! - [`IndexQueueService`]: wires everything together, entry point for signals
//! - [`RecordMonitor`]: routes mutation signals
//! - [`DataUpdateHandler`]: requeues records, pages and subtrees
//! - [`GarbageHandler`]: removes records that no longer qualify
//! - [`QueueInitializationService`]: rebuilds a site's queue in bulk
//! - [`QueueStore`]: queue rows, with [`QueueUpdate`] events
//!
//! # Example
//!
//! ```rust,ignore
//! use sitesearch_index::{IndexQueueConfig, IndexQueueService};
//!
//! let service = IndexQueueService::new(datastore, sites, connections, IndexQueueConfig::default())?;
//!
//! // Subscribe to queue changes
//! let mut updates = service.subscribe();
//!
//! // Fill the queue of site 1, then feed changes
//! service.initialize(&RequestContext::now(), 1, None).await?;
//! service.handle(&RequestContext::now(), &MutationSignal::updated("pages", 10)).await?;
//! ```

pub mod eligibility;
pub mod garbage;
pub mod index_queue;
pub mod initializer;
pub mod monitor;
pub mod mount;
pub mod queue;
pub mod service;
pub mod site;
pub mod triggers;
pub mod update;

#[cfg(test)]
mod test_support;

pub use eligibility::EligibilityEvaluator;
pub use garbage::{
    GarbageHandler, GarbageRemoverRegistry, GarbageRemoverStrategy, IndexCleaner,
    PageGarbageRemover, RecordGarbageRemover,
};
pub use index_queue::IndexQueue;
pub use initializer::{
    Initializer, InitializerRegistry, PageInitializer, QueueInitializationService,
    RecordInitializer,
};
pub use monitor::RecordMonitor;
pub use mount::MountPagesUpdater;
pub use queue::{QueueStore, QueueUpdate};
pub use service::{IndexQueueConfig, IndexQueueService};
pub use site::SiteResolver;
pub use triggers::RecursiveUpdateTriggers;
pub use update::DataUpdateHandler;
