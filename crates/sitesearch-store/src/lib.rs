//! In-memory collaborators for the sitesearch index queue.
//!
//! The queue engine only needs the [`Datastore`](sitesearch_core::Datastore),
//! [`SearchEngineConnection`](sitesearch_core::SearchEngineConnection) and
//! [`SiteConfigurationProvider`](sitesearch_core::SiteConfigurationProvider)
//! traits. This crate implements them in memory so the engine can run
//! end-to-end in tests and from the command line.
//!
//! # Features
//!
//! - **Content tables**: rows of any table, page tree listing
//! - **Queue tables**: atomic upserts, all-or-nothing batches, set-based inserts
//! - **Connections**: tables can be placed on separate connections
//! - **Failure injection**: lost connection, rejected rows, unavailable engine
//! - **Snapshots**: load content from JSON and capture the resulting state

pub mod engine;
pub mod memory;
pub mod schema;
pub mod sites;
pub mod snapshot;

pub use engine::{MemoryConnectionManager, MemorySearchEngine};
pub use memory::{MemoryDatastore, DEFAULT_CONNECTION};
pub use sites::StaticSiteConfigurations;
pub use snapshot::ContentSnapshot;
