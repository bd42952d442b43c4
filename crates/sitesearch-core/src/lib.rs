//! # sitesearch-core
//!
//! Core types and traits of the search index queue.
//!
//! The queue records which content records must be (re)submitted to the
//! search engine, per site, table and record. This crate holds the shared
//! vocabulary:
//!
//! - **Records and signals**: [`Record`], [`MutationSignal`], [`RequestContext`]
//! - **Queue rows**: [`QueueItem`], [`NewQueueItem`], [`QueueItemQuery`], [`MountPoint`]
//! - **Sites**: [`Site`], [`SiteConfiguration`], [`IndexingConfiguration`],
//!   [`RecursiveUpdateTrigger`]
//! - **Filters**: [`RecordFilter`], parsed once from configuration
//! - **Tables**: [`TableDefinition`], [`TableCatalog`]
//!
//! ## Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Datastore`] | Content rows and queue rows |
//! | [`SiteConfigurationProvider`] | Indexing setup per site |
//! | [`SearchEngineConnection`] | Delete-by-query, commit, ping |
//! | [`ConnectionManager`] | Connections of a site per language |
//!
//! ## Related Crates
//!
//! - `sitesearch-store`: in-memory datastore and search engine
//! - `sitesearch-index`: queue maintenance and update propagation

pub mod error;
pub mod filter;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{Error, Result, SearchEngineError, StoreError};
pub use filter::{Condition, Operator, RecordFilter};
pub use tables::*;
pub use traits::*;
pub use types::*;
