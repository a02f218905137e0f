pub mod email;
pub mod linkedin;

pub use email::{EmailStage, LookupBudget};
pub use linkedin::LinkedInStage;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::info;

use web3scout_common::config::FileConfig;
use web3scout_common::{EnrichmentError, ProjectRecord, RetryPolicy};

use crate::cancel::CancelFlag;
use crate::fetch::{PageFetcher, WebSearcher};
use crate::traits::EmailFinder;

/// Result of one enrichment stage for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Found,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageResult {
    pub outcome: StageOutcome,
    pub latency: Duration,
}

/// Per-record enrichment trace. `None` for a stage means it was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentAttempt {
    pub email: Option<StageResult>,
    pub linkedin: Option<StageResult>,
    pub cancelled: bool,
}

impl EnrichmentAttempt {
    pub fn enriched(&self) -> bool {
        let found = |s: &Option<StageResult>| matches!(s, Some(r) if r.outcome == StageOutcome::Found);
        found(&self.email) || found(&self.linkedin)
    }
}

/// Retry policy plus a timeout around every individual attempt. A timed-out
/// attempt counts as transient.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl CallPolicy {
    pub async fn call<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, EnrichmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnrichmentError>>,
    {
        let timeout = self.timeout;
        self.retry
            .run(op_name, || {
                let fut = op();
                async move {
                    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
                        Err(EnrichmentError::Transient(format!(
                            "timed out after {}s",
                            timeout.as_secs()
                        )))
                    })
                }
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub concurrency: usize,
    pub calls: CallPolicy,
    pub scan_website_for_email: bool,
    pub linkedin_search: bool,
    pub max_email_lookups: u64,
}

impl EnrichmentOptions {
    pub fn from_config(file: &FileConfig) -> Self {
        Self {
            concurrency: file.concurrency.enrichment,
            calls: CallPolicy {
                retry: file.retry.to_policy(),
                timeout: Duration::from_secs(file.enrichment.call_timeout_secs),
            },
            scan_website_for_email: file.enrichment.scan_website_for_email,
            linkedin_search: file.enrichment.linkedin_search,
            max_email_lookups: file.enrichment.max_email_lookups,
        }
    }
}

#[derive(Debug, Default)]
pub struct EnrichmentReport {
    pub records: Vec<ProjectRecord>,
    pub attempts: Vec<EnrichmentAttempt>,
}

/// Email stage then LinkedIn stage for every record, records in parallel.
/// Stage failures never drop a record.
pub struct EnrichmentPipeline {
    email: EmailStage,
    linkedin: LinkedInStage,
    concurrency: usize,
}

impl EnrichmentPipeline {
    pub fn new(
        options: &EnrichmentOptions,
        finder: Option<Arc<dyn EmailFinder>>,
        fetcher: Arc<dyn PageFetcher>,
        searcher: Option<Arc<dyn WebSearcher>>,
    ) -> Self {
        let searcher = if options.linkedin_search { searcher } else { None };
        Self {
            email: EmailStage::new(
                finder,
                fetcher.clone(),
                options.scan_website_for_email,
                LookupBudget::new(options.max_email_lookups),
                options.calls.clone(),
            ),
            linkedin: LinkedInStage::new(fetcher, searcher, options.calls.clone()),
            concurrency: options.concurrency.max(1),
        }
    }

    pub async fn run(&self, records: Vec<ProjectRecord>, cancel: &CancelFlag) -> EnrichmentReport {
        let total = records.len();
        self.email.budget().reset();
        info!(records = total, concurrency = self.concurrency, "Starting enrichment");

        let results: Vec<(ProjectRecord, EnrichmentAttempt)> =
            stream::iter(records.into_iter().map(|record| self.enrich_one(record, cancel)))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut report = EnrichmentReport::default();
        for (record, attempt) in results {
            report.records.push(record);
            report.attempts.push(attempt);
        }

        info!(
            records = total,
            enriched = report.attempts.iter().filter(|a| a.enriched()).count(),
            cancelled = report.attempts.iter().filter(|a| a.cancelled).count(),
            lookups_used = self.email.budget().used(),
            "Enrichment complete"
        );
        report
    }

    async fn enrich_one(
        &self,
        mut record: ProjectRecord,
        cancel: &CancelFlag,
    ) -> (ProjectRecord, EnrichmentAttempt) {
        let mut attempt = EnrichmentAttempt::default();
        if cancel.is_cancelled() {
            attempt.cancelled = true;
            return (record, attempt);
        }

        let email = tokio::select! {
            result = timed(self.email.run(&mut record)) => Some(result),
            _ = cancel.cancelled() => None,
        };
        match email {
            Some(result) => attempt.email = result,
            None => {
                attempt.cancelled = true;
                return (record, attempt);
            }
        }

        let linkedin = tokio::select! {
            result = timed(self.linkedin.run(&mut record)) => Some(result),
            _ = cancel.cancelled() => None,
        };
        match linkedin {
            Some(result) => attempt.linkedin = result,
            None => attempt.cancelled = true,
        }

        (record, attempt)
    }
}

/// Attach latency to a stage that ran.
async fn timed<Fut>(stage: Fut) -> Option<StageResult>
where
    Fut: Future<Output = Option<StageOutcome>>,
{
    let started = Instant::now();
    stage.await.map(|outcome| StageResult {
        outcome,
        latency: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConcurrencyGauge, MockEmailFinder, MockFetcher, MockSearcher};
    use async_trait::async_trait;
    use chrono::Utc;

    struct SlowFinder {
        gauge: ConcurrencyGauge,
    }

    #[async_trait]
    impl EmailFinder for SlowFinder {
        fn name(&self) -> &str {
            "slow"
        }

        async fn find_email(&self, domain: &str) -> Result<Option<String>, EnrichmentError> {
            let _in_flight = self.gauge.enter();
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Some(format!("team@{domain}")))
        }
    }

    fn options() -> EnrichmentOptions {
        EnrichmentOptions {
            concurrency: 4,
            calls: CallPolicy {
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(1),
                    multiplier: 2.0,
                    max_delay: Duration::from_millis(2),
                    jitter: Duration::ZERO,
                },
                timeout: Duration::from_secs(5),
            },
            scan_website_for_email: false,
            linkedin_search: true,
            max_email_lookups: 0,
        }
    }

    fn acme() -> ProjectRecord {
        ProjectRecord::new("Acme", "test", Utc::now())
            .unwrap()
            .with_website("https://acme.io")
    }

    #[tokio::test]
    async fn email_failure_does_not_block_linkedin() {
        let finder = MockEmailFinder::new()
            .on_domain_error("acme.io", EnrichmentError::Transient("HTTP 500".into()));
        let fetcher = MockFetcher::new().on_url(
            "https://acme.io",
            r#"<a href="https://www.linkedin.com/company/acme">LinkedIn</a>"#,
        );
        let pipeline = EnrichmentPipeline::new(
            &options(),
            Some(Arc::new(finder.clone())),
            Arc::new(fetcher),
            None,
        );

        let report = pipeline.run(vec![acme()], &CancelFlag::new()).await;
        let record = &report.records[0];
        let attempt = &report.attempts[0];

        assert_eq!(record.email(), None);
        assert_eq!(attempt.email.map(|s| s.outcome), Some(StageOutcome::Error));
        assert_eq!(
            record.linkedin(),
            Some("https://www.linkedin.com/company/acme")
        );
        assert_eq!(attempt.linkedin.map(|s| s.outcome), Some(StageOutcome::Found));
        assert_eq!(finder.calls_for("acme.io"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_run_at_most_concurrency_at_once() {
        let gauge = ConcurrencyGauge::new();
        let pipeline = EnrichmentPipeline::new(
            &EnrichmentOptions {
                concurrency: 3,
                linkedin_search: false,
                ..options()
            },
            Some(Arc::new(SlowFinder { gauge: gauge.clone() })),
            Arc::new(MockFetcher::new()),
            None,
        );
        let records: Vec<ProjectRecord> = (0..8)
            .map(|i| {
                ProjectRecord::new(&format!("Project {i}"), "test", Utc::now())
                    .unwrap()
                    .with_website(&format!("https://p{i}.io"))
            })
            .collect();

        let report = pipeline.run(records, &CancelFlag::new()).await;
        assert_eq!(report.records.len(), 8);
        assert!(report.records.iter().all(|r| r.email().is_some()));
        assert_eq!(gauge.peak(), 3);
    }

    #[tokio::test]
    async fn no_finder_skips_email_stage() {
        let pipeline = EnrichmentPipeline::new(
            &options(),
            None,
            Arc::new(MockFetcher::new()),
            Some(Arc::new(MockSearcher::new())),
        );
        let report = pipeline.run(vec![acme()], &CancelFlag::new()).await;
        assert_eq!(report.attempts[0].email, None);
        assert_eq!(
            report.attempts[0].linkedin.map(|s| s.outcome),
            Some(StageOutcome::NotFound)
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_keeps_record() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let pipeline = EnrichmentPipeline::new(
            &options(),
            Some(Arc::new(MockEmailFinder::new().on_domain("acme.io", "jane@acme.io"))),
            Arc::new(MockFetcher::new()),
            None,
        );
        let report = pipeline.run(vec![acme()], &cancel).await;
        assert_eq!(report.records.len(), 1);
        assert!(report.attempts[0].cancelled);
        assert_eq!(report.records[0].email(), None);
    }

    #[tokio::test]
    async fn call_policy_times_out_as_transient() {
        let calls = CallPolicy {
            retry: RetryPolicy::no_retry(),
            timeout: Duration::from_millis(10),
        };
        let result: Result<(), EnrichmentError> = calls
            .call("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(EnrichmentError::Transient(_))));
    }
}
