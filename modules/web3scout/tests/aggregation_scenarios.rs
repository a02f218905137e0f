//! End-to-end runs of the aggregator against in-memory doubles.
//!
//! Every external boundary is mocked: collectors, page fetcher, email finder
//! and sink. Retries use millisecond backoff so failure paths stay fast.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use web3scout::enrichment::{CallPolicy, EnrichmentOptions, EnrichmentPipeline};
use web3scout::orchestrator::{Orchestrator, OrchestratorOptions};
use web3scout::testing::{
    FailingCollector, MemorySink, MockEmailFinder, MockFetcher, SlowCollector, StaticCollector,
};
use web3scout::traits::{Collector, EmailFinder, ProjectSink};
use web3scout::{Aggregator, CancelFlag, RunResult, RunStatus};
use web3scout_common::config::CollectorSettings;
use web3scout_common::{
    CollectionError, EnrichmentError, IdentityKey, RawItem, RetryPolicy, SinkError,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(2),
        jitter: Duration::ZERO,
    }
}

struct Scenario {
    collectors: Vec<Arc<dyn Collector>>,
    collector_timeout: Duration,
    finder: Option<Arc<dyn EmailFinder>>,
    fetcher: MockFetcher,
    sink: MemorySink,
    max_email_lookups: u64,
    cancel: CancelFlag,
}

impl Scenario {
    fn new() -> Self {
        Self {
            collectors: Vec::new(),
            collector_timeout: Duration::from_secs(120),
            finder: None,
            fetcher: MockFetcher::new(),
            sink: MemorySink::new(),
            max_email_lookups: 0,
            cancel: CancelFlag::new(),
        }
    }

    fn collector(mut self, collector: impl Collector + 'static) -> Self {
        self.collectors.push(Arc::new(collector));
        self
    }

    fn finder(mut self, finder: impl EmailFinder + 'static) -> Self {
        self.finder = Some(Arc::new(finder));
        self
    }

    fn fetcher(mut self, fetcher: MockFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    fn sink(mut self, sink: MemorySink) -> Self {
        self.sink = sink;
        self
    }

    fn build(&self) -> Aggregator {
        let mut orchestrator = Orchestrator::new(OrchestratorOptions {
            concurrency: 3,
            collector_timeout: self.collector_timeout,
            min_launch_delay: Duration::ZERO,
            max_launch_delay: Duration::ZERO,
            retry: fast_retry(),
        });
        for collector in &self.collectors {
            let settings = CollectorSettings::new(collector.source(), "https://listings.example");
            orchestrator.add(collector.clone(), settings);
        }

        let options = EnrichmentOptions {
            concurrency: 4,
            calls: CallPolicy {
                retry: fast_retry(),
                timeout: Duration::from_secs(5),
            },
            scan_website_for_email: false,
            linkedin_search: false,
            max_email_lookups: self.max_email_lookups,
        };
        let enrichment = EnrichmentPipeline::new(
            &options,
            self.finder.clone(),
            Arc::new(self.fetcher.clone()),
            None,
        );

        let sink: Arc<dyn ProjectSink> = Arc::new(self.sink.clone());
        Aggregator::new(orchestrator, enrichment, sink, fast_retry())
            .with_cancel_flag(self.cancel.clone())
    }

    async fn run(&self) -> RunResult {
        self.build().run().await
    }
}

fn site(name: &str, website: &str) -> RawItem {
    RawItem::new(name).with_website(website)
}

fn assert_accounting(result: &RunResult) {
    assert_eq!(
        result.unique_new + result.duplicates_suppressed,
        result.discovered,
        "unique + duplicates must equal discovered"
    );
}

// ---------------------------------------------------------------------------
// Dedup and identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_project_from_two_sources_is_stored_once() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new("icodrops", vec![site("Acme", "https://acme.io")]))
        .collector(StaticCollector::new(
            "cryptorank",
            vec![site("Acme Inc", "https://acme.io/")],
        ))
        .sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.discovered, 2);
    assert_eq!(result.unique_new, 1);
    assert_eq!(result.duplicates_suppressed, 1);
    assert_eq!(result.stored, 1);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].domain_key(), "acme.io");
    assert_accounting(&result);
}

#[tokio::test]
async fn second_run_over_same_listings_stores_nothing() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![
                site("Acme", "https://acme.io"),
                RawItem::new("Beta").with_twitter("@betaproto"),
            ],
        ))
        .sink(sink.clone());

    let first = scenario.run().await;
    assert_eq!(first.stored, 2);

    let second = scenario.run().await;
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.discovered, 2);
    assert_eq!(second.unique_new, 0);
    assert_eq!(second.duplicates_suppressed, 2);
    assert_eq!(second.stored, 0);
    assert_eq!(sink.records().len(), 2);
    assert_eq!(sink.append_calls(), 1, "empty batch must not reach the sink");
    assert_accounting(&second);
}

#[tokio::test]
async fn stored_domain_is_suppressed_before_enrichment() {
    let finder = MockEmailFinder::new().on_domain("acme.io", "jane@acme.io");
    let sink = MemorySink::new().with_keys([IdentityKey::Domain("acme.io".into())]);
    let scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![site("Acme", "https://acme.io"), site("Gamma", "https://gamma.xyz")],
        ))
        .finder(finder.clone())
        .sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.duplicates_suppressed, 1);
    assert_eq!(result.unique_new, 1);
    assert_eq!(finder.calls_for("acme.io"), 0);
    assert_eq!(finder.calls_for("gamma.xyz"), 1);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].name(), "Gamma");
}

#[tokio::test]
async fn malformed_items_are_counted_not_stored() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![
                RawItem::new("   "),
                RawItem::new("No Handle"),
                site("Acme", "https://acme.io"),
            ],
        ))
        .sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.malformed_dropped, 2);
    assert_eq!(result.discovered, 1);
    assert_eq!(result.stored, 1);
    assert_accounting(&result);
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finder_email_lands_in_stored_row() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![site("Acme", "https://acme.io"), site("Gamma", "https://gamma.xyz")],
        ))
        .finder(MockEmailFinder::new().on_domain("acme.io", "jane@acme.io"))
        .sink(sink.clone());

    let result = scenario.run().await;

    let rows = sink.records();
    let acme = rows.iter().find(|r| r.name() == "Acme").unwrap();
    let gamma = rows.iter().find(|r| r.name() == "Gamma").unwrap();
    assert_eq!(acme.email(), Some("jane@acme.io"));
    assert_eq!(gamma.email(), None);
    assert_eq!(result.email.found, 1);
    assert_eq!(result.email.not_found, 1);
    assert_eq!(result.records_enriched, 1);
}

#[tokio::test]
async fn email_failure_still_runs_linkedin_and_stores() {
    let finder = MockEmailFinder::new()
        .on_domain_error("acme.io", EnrichmentError::Transient("HTTP 500".into()));
    let fetcher = MockFetcher::new().on_url(
        "https://acme.io",
        r#"<footer><a href="https://linkedin.com/company/acme-labs/">LinkedIn</a></footer>"#,
    );
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new("icodrops", vec![site("Acme", "https://acme.io")]))
        .finder(finder.clone())
        .fetcher(fetcher)
        .sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.email.error, 1);
    assert_eq!(result.linkedin.found, 1);
    assert_eq!(finder.calls_for("acme.io"), 2, "transient failure retried once");

    let rows = sink.records();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email(), None);
    assert_eq!(
        rows[0].linkedin(),
        Some("https://www.linkedin.com/company/acme-labs")
    );
}

#[tokio::test]
async fn lookup_budget_caps_finder_calls() {
    let finder = MockEmailFinder::new()
        .on_domain("acme.io", "jane@acme.io")
        .on_domain("gamma.xyz", "hi@gamma.xyz")
        .on_domain("delta.fi", "team@delta.fi");
    let mut scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![
                site("Acme", "https://acme.io"),
                site("Gamma", "https://gamma.xyz"),
                site("Delta", "https://delta.fi"),
            ],
        ))
        .finder(finder.clone());
    scenario.max_email_lookups = 1;

    let result = scenario.run().await;

    assert_eq!(finder.total_calls(), 1);
    assert_eq!(result.email.found, 1);
    assert_eq!(result.email.skipped, 2);
    assert_eq!(result.stored, 3, "records past the budget are still stored");
}

#[tokio::test]
async fn twitter_only_project_skips_both_stages() {
    let finder = MockEmailFinder::new();
    let scenario = Scenario::new()
        .collector(StaticCollector::new(
            "icodrops",
            vec![RawItem::new("Beta").with_twitter("https://x.com/betaproto")],
        ))
        .finder(finder.clone());

    let result = scenario.run().await;

    assert_eq!(result.email.skipped, 1);
    assert_eq!(result.linkedin.skipped, 1);
    assert_eq!(finder.total_calls(), 0);
    assert_eq!(result.stored, 1);
}

// ---------------------------------------------------------------------------
// Collector isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_collector_does_not_stop_the_run() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(FailingCollector::new(
            "broken",
            CollectionError::Unreachable("connection refused".into()),
        ))
        .collector(StaticCollector::new("icodrops", vec![site("Acme", "https://acme.io")]))
        .sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.collectors_run, 2);
    assert_eq!(result.collectors_failed, 1);
    assert_eq!(result.collector_errors[0].source, "broken");
    assert_eq!(result.collector_errors[0].kind, "unreachable");
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_collector_times_out_and_others_are_stored() {
    let sink = MemorySink::new();
    let mut scenario = Scenario::new()
        .collector(SlowCollector::new(
            "hung",
            Duration::from_secs(600),
            vec![site("Never", "https://never.io")],
        ))
        .collector(StaticCollector::new("icodrops", vec![site("Acme", "https://acme.io")]))
        .sink(sink.clone());
    scenario.collector_timeout = Duration::from_secs(30);

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.collectors_failed, 1);
    assert_eq!(result.collector_errors[0].kind, "timeout");
    assert_eq!(result.stored, 1);
    assert_eq!(sink.records()[0].name(), "Acme");
}

// ---------------------------------------------------------------------------
// Sink failures
// ---------------------------------------------------------------------------

fn three_projects() -> StaticCollector {
    StaticCollector::new(
        "icodrops",
        vec![
            site("Acme", "https://acme.io"),
            site("Gamma", "https://gamma.xyz"),
            site("Delta", "https://delta.fi"),
        ],
    )
}

#[tokio::test]
async fn partial_write_is_reported_not_fatal() {
    let sink = MemorySink::new().accepting_only(2);
    let scenario = Scenario::new().collector(three_projects()).sink(sink.clone());

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.stored, 2);
    assert_eq!(result.sink_failed, 1);
    assert_eq!(sink.append_calls(), 1, "partial writes are not replayed");
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test]
async fn whole_batch_failure_fails_the_run() {
    let sink = MemorySink::new().failing_append(SinkError::write("backend unavailable"));
    let scenario = Scenario::new().collector(three_projects()).sink(sink.clone());

    let result = scenario.run().await;

    assert!(result.is_failed());
    assert_eq!(result.stored, 0);
    assert_eq!(result.sink_failed, 3);
    assert_eq!(sink.append_calls(), 2, "nothing written, so the append is retried");
}

#[tokio::test]
async fn snapshot_failure_aborts_before_collection() {
    let finder = MockEmailFinder::new();
    let sink = MemorySink::new().failing_snapshot(SinkError::AuthFailure("token revoked".into()));
    let scenario = Scenario::new()
        .collector(three_projects())
        .finder(finder.clone())
        .sink(sink.clone());

    let result = scenario.run().await;

    assert!(result.is_failed());
    assert_eq!(result.collectors_run, 0);
    assert_eq!(finder.total_calls(), 0);
    assert_eq!(sink.append_calls(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Finder that never answers within the test.
struct StalledFinder;

#[async_trait]
impl EmailFinder for StalledFinder {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn find_email(&self, _domain: &str) -> Result<Option<String>, EnrichmentError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_during_enrichment_still_stores_collected_records() {
    let sink = MemorySink::new();
    let scenario = Scenario::new()
        .collector(three_projects())
        .finder(StalledFinder)
        .sink(sink.clone());

    let trigger = scenario.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.enrichment_cancelled, 3);
    assert_eq!(result.stored, 3);
    assert!(sink.records().iter().all(|r| r.email().is_none()));
}

#[tokio::test]
async fn cancel_before_start_reports_cancelled_collectors() {
    let scenario = Scenario::new().collector(three_projects());
    scenario.cancel.cancel();

    let result = scenario.run().await;

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.collectors_failed, 1);
    assert_eq!(result.collector_errors[0].kind, "cancelled");
    assert_eq!(result.stored, 0);
}
