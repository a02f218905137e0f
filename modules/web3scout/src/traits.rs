// Trait seams for the aggregation pipeline.
//
// Collector: one external listing source.
// ProjectSink: tabular persistence (snapshot of known keys + append).
// EmailFinder: domain → email discovery service.
//
// Page fetching and web search live in `fetch` next to their HTTP impls.
// Test doubles for all of these are in `testing`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use web3scout_common::config::CollectorSettings;
use web3scout_common::{
    CollectionError, EnrichmentError, IdentityKey, ProjectRecord, RawItem, RetryPolicy, SinkError,
};

use crate::pacing::Pacer;

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// What a collector gets for one invocation.
pub struct CollectContext {
    pub settings: CollectorSettings,
    /// Same pacer the orchestrator awaited before invoking the collector.
    /// Await it again between pages.
    pub pacer: Arc<Pacer>,
    pub retry: RetryPolicy,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Identifier written into `ProjectRecord::source`.
    fn source(&self) -> &str;

    /// Retrieve raw listings. An empty listing is `Ok(vec![])`.
    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<RawItem>, CollectionError>;
}

// ---------------------------------------------------------------------------
// ProjectSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectSink: Send + Sync {
    fn name(&self) -> &str;

    /// Identity keys of every stored row.
    async fn existing_keys(&self) -> Result<HashSet<IdentityKey>, SinkError>;

    /// Append records as rows. Returns the number written.
    async fn append(&self, records: &[ProjectRecord]) -> Result<usize, SinkError>;

    /// Number of stored rows.
    async fn count(&self) -> Result<usize, SinkError>;
}

// ---------------------------------------------------------------------------
// EmailFinder
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EmailFinder: Send + Sync {
    fn name(&self) -> &str;

    /// First address the service knows for `domain`, `None` on a clean miss.
    async fn find_email(&self, domain: &str) -> Result<Option<String>, EnrichmentError>;
}
