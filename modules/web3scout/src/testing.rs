// Test doubles for the aggregation pipeline.
//
// One per trait boundary:
// - StaticCollector / FailingCollector / SlowCollector (Collector)
// - ConcurrencyGauge: peak number of calls in flight at once
// - MockFetcher (PageFetcher): HashMap-based URL→HTML
// - MockSearcher (WebSearcher): HashMap-based query→results
// - MockEmailFinder (EmailFinder): HashMap-based domain→email, counts calls
// - MemorySink (ProjectSink): in-memory rows with injectable failures
//
// The stateful mocks are Clone and share state, so a test can hand one copy
// to the pipeline and keep another to assert on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use web3scout_common::{
    CollectionError, EnrichmentError, FetchError, IdentityKey, ProjectRecord, RawItem, SinkError,
};

use crate::fetch::{PageFetcher, SearchResult, WebSearcher};
use crate::traits::{CollectContext, Collector, EmailFinder, ProjectSink};

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

/// Returns a fixed list of items.
pub struct StaticCollector {
    source: String,
    items: Vec<RawItem>,
}

impl StaticCollector {
    pub fn new(source: &str, items: Vec<RawItem>) -> Self {
        Self {
            source: source.to_string(),
            items,
        }
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<Vec<RawItem>, CollectionError> {
        Ok(self.items.clone())
    }
}

/// Always fails with the given error.
pub struct FailingCollector {
    source: String,
    error: CollectionError,
}

impl FailingCollector {
    pub fn new(source: &str, error: CollectionError) -> Self {
        Self {
            source: source.to_string(),
            error,
        }
    }
}

#[async_trait]
impl Collector for FailingCollector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<Vec<RawItem>, CollectionError> {
        Err(self.error.clone())
    }
}

/// Sleeps before returning its items.
pub struct SlowCollector {
    source: String,
    delay: Duration,
    items: Vec<RawItem>,
    gauge: Option<ConcurrencyGauge>,
}

impl SlowCollector {
    pub fn new(source: &str, delay: Duration, items: Vec<RawItem>) -> Self {
        Self {
            source: source.to_string(),
            delay,
            items,
            gauge: None,
        }
    }

    /// Report each in-flight `collect` to `gauge`.
    pub fn tracked(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

#[async_trait]
impl Collector for SlowCollector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<Vec<RawItem>, CollectionError> {
        let _in_flight = self.gauge.as_ref().map(ConcurrencyGauge::enter);
        tokio::time::sleep(self.delay).await;
        Ok(self.items.clone())
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyGauge
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call as in flight until the guard drops.
    pub fn enter(&self) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            current: self.current.clone(),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Serves registered pages. Unregistered URLs fail with 404 unless
/// `failing_with` sets a different error.
#[derive(Clone)]
pub struct MockFetcher {
    pages: Arc<HashMap<String, String>>,
    fallback: FetchError,
    calls: Arc<Mutex<u32>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(HashMap::new()),
            fallback: FetchError::Status {
                status: 404,
                url: String::new(),
            },
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn on_url(mut self, url: &str, html: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), html.to_string());
        self
    }

    pub fn failing_with(mut self, error: FetchError) -> Self {
        self.fallback = error;
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        *self.calls.lock().unwrap() += 1;
        match self.pages.get(url) {
            Some(html) => Ok(html.clone()),
            None => match &self.fallback {
                FetchError::Status { status, .. } => Err(FetchError::Status {
                    status: *status,
                    url: url.to_string(),
                }),
                other => Err(other.clone()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

/// Registered queries return their results, others return nothing.
#[derive(Clone, Default)]
pub struct MockSearcher {
    results: Arc<HashMap<String, Vec<SearchResult>>>,
    failure: Option<FetchError>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_query(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        Arc::make_mut(&mut self.results).insert(query.to_string(), results);
        self
    }

    pub fn failing_with(mut self, error: FetchError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(self
            .results
            .get(query)
            .map(|r| r.iter().take(max_results).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockEmailFinder
// ---------------------------------------------------------------------------

/// Domain → email. Unregistered domains are a clean miss.
#[derive(Clone, Default)]
pub struct MockEmailFinder {
    emails: Arc<HashMap<String, String>>,
    errors: Arc<HashMap<String, EnrichmentError>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockEmailFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_domain(mut self, domain: &str, email: &str) -> Self {
        Arc::make_mut(&mut self.emails).insert(domain.to_string(), email.to_string());
        self
    }

    /// Every lookup for `domain` fails with `error`.
    pub fn on_domain_error(mut self, domain: &str, error: EnrichmentError) -> Self {
        Arc::make_mut(&mut self.errors).insert(domain.to_string(), error);
        self
    }

    pub fn calls_for(&self, domain: &str) -> u32 {
        self.calls.lock().unwrap().get(domain).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl EmailFinder for MockEmailFinder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn find_email(&self, domain: &str) -> Result<Option<String>, EnrichmentError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(domain.to_string())
            .or_default() += 1;
        if let Some(e) = self.errors.get(domain) {
            return Err(e.clone());
        }
        Ok(self.emails.get(domain).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkState {
    rows: Vec<ProjectRecord>,
    preloaded: HashSet<IdentityKey>,
    snapshot_error: Option<SinkError>,
    append_error: Option<SinkError>,
    /// Accept only this many rows, then fail.
    accept_limit: Option<usize>,
    append_calls: u32,
}

/// In-memory sink. Appended rows become visible to the next snapshot.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these keys were stored by an earlier run.
    pub fn with_keys(self, keys: impl IntoIterator<Item = IdentityKey>) -> Self {
        self.state.lock().unwrap().preloaded.extend(keys);
        self
    }

    pub fn failing_snapshot(self, error: SinkError) -> Self {
        self.state.lock().unwrap().snapshot_error = Some(error);
        self
    }

    /// Every append fails with `error` and writes nothing.
    pub fn failing_append(self, error: SinkError) -> Self {
        self.state.lock().unwrap().append_error = Some(error);
        self
    }

    /// Appends write at most `n` rows and report the rest as failed.
    pub fn accepting_only(self, n: usize) -> Self {
        self.state.lock().unwrap().accept_limit = Some(n);
        self
    }

    pub fn records(&self) -> Vec<ProjectRecord> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn append_calls(&self) -> u32 {
        self.state.lock().unwrap().append_calls
    }
}

#[async_trait]
impl ProjectSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn existing_keys(&self) -> Result<HashSet<IdentityKey>, SinkError> {
        let state = self.state.lock().unwrap();
        if let Some(e) = &state.snapshot_error {
            return Err(e.clone());
        }
        let mut keys = state.preloaded.clone();
        keys.extend(state.rows.iter().map(ProjectRecord::identity_key));
        Ok(keys)
    }

    async fn append(&self, records: &[ProjectRecord]) -> Result<usize, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.append_calls += 1;
        if let Some(e) = &state.append_error {
            return Err(e.clone());
        }
        match state.accept_limit {
            Some(limit) if records.len() > limit => {
                state.rows.extend_from_slice(&records[..limit]);
                Err(SinkError::WriteFailure {
                    written: limit,
                    message: format!("quota exceeded after {limit} rows"),
                })
            }
            _ => {
                state.rows.extend_from_slice(records);
                Ok(records.len())
            }
        }
    }

    async fn count(&self) -> Result<usize, SinkError> {
        let state = self.state.lock().unwrap();
        Ok(state.preloaded.len() + state.rows.len())
    }
}
