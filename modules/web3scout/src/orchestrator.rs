use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{info, warn};

use web3scout_common::config::{CollectorSettings, FileConfig};
use web3scout_common::{
    CollectionError, CollectionErrorKind, ProjectRecord, RawItem, RetryPolicy,
};

use crate::cancel::CancelFlag;
use crate::pacing::Pacer;
use crate::traits::{CollectContext, Collector};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub concurrency: usize,
    pub collector_timeout: Duration,
    pub min_launch_delay: Duration,
    pub max_launch_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            collector_timeout: Duration::from_secs(120),
            min_launch_delay: Duration::ZERO,
            max_launch_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(file: &FileConfig) -> Self {
        Self {
            concurrency: file.concurrency.collectors,
            collector_timeout: Duration::from_secs(file.orchestrator.collector_timeout_secs),
            min_launch_delay: Duration::from_millis(file.orchestrator.min_launch_delay_ms),
            max_launch_delay: Duration::from_millis(file.orchestrator.max_launch_delay_ms),
            retry: file.retry.to_policy(),
        }
    }
}

/// One collector that failed this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorFailure {
    pub source: String,
    pub kind: CollectionErrorKind,
    pub message: String,
}

/// Per-collector accounting, successful or not.
#[derive(Debug, Clone)]
pub struct CollectorReport {
    pub source: String,
    pub items: usize,
    pub malformed: usize,
    pub elapsed: Duration,
    pub error: Option<CollectionErrorKind>,
}

#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// Normalized records in collector completion order.
    pub records: Vec<ProjectRecord>,
    pub malformed_dropped: usize,
    pub failures: Vec<CollectorFailure>,
    pub reports: Vec<CollectorReport>,
    pub collectors_run: usize,
}

struct Registered {
    collector: Arc<dyn Collector>,
    settings: CollectorSettings,
    pacer: Arc<Pacer>,
}

/// Fans out to every registered collector under a concurrency bound and
/// folds their output into normalized records.
pub struct Orchestrator {
    collectors: Vec<Registered>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            collectors: Vec::new(),
            options,
        }
    }

    /// Register a collector. Its pacer lives as long as the orchestrator, so
    /// spacing carries over between runs in interval mode.
    pub fn add(&mut self, collector: Arc<dyn Collector>, settings: CollectorSettings) {
        let pacer = Arc::new(Pacer::from_millis(settings.min_delay_ms, settings.max_delay_ms));
        self.collectors.push(Registered {
            collector,
            settings,
            pacer,
        });
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>, settings: CollectorSettings) -> Self {
        self.add(collector, settings);
        self
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    pub async fn run(&self, cancel: &CancelFlag) -> CollectionOutcome {
        let discovered_at = Utc::now();
        let launch = Pacer::new(self.options.min_launch_delay, self.options.max_launch_delay);
        let concurrency = self.options.concurrency.max(1);

        info!(
            collectors = self.collectors.len(),
            concurrency, "Starting collection"
        );

        let results: Vec<_> = stream::iter(self.collectors.iter().map(|entry| {
            let launch = &launch;
            async move {
                let started = Instant::now();
                let result = self.invoke(entry, launch, cancel).await;
                (entry.collector.source().to_string(), started.elapsed(), result)
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

        let mut outcome = CollectionOutcome {
            collectors_run: self.collectors.len(),
            ..Default::default()
        };

        for (source, elapsed, result) in results {
            match result {
                Ok(items) => {
                    let raw_count = items.len();
                    let mut malformed = 0;
                    for item in items {
                        match ProjectRecord::from_raw(item, &source, discovered_at) {
                            Ok(record) => outcome.records.push(record),
                            Err(e) => {
                                malformed += 1;
                                tracing::debug!(source, error = %e, "Dropping malformed item");
                            }
                        }
                    }
                    info!(
                        source,
                        items = raw_count,
                        malformed,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Collector finished"
                    );
                    outcome.malformed_dropped += malformed;
                    outcome.reports.push(CollectorReport {
                        source,
                        items: raw_count,
                        malformed,
                        elapsed,
                        error: None,
                    });
                }
                Err(e) => {
                    let kind = e.kind();
                    warn!(
                        source,
                        kind = %kind,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Collector failed, continuing"
                    );
                    outcome.failures.push(CollectorFailure {
                        source: source.clone(),
                        kind,
                        message: e.to_string(),
                    });
                    outcome.reports.push(CollectorReport {
                        source,
                        items: 0,
                        malformed: 0,
                        elapsed,
                        error: Some(kind),
                    });
                }
            }
        }

        info!(
            records = outcome.records.len(),
            malformed = outcome.malformed_dropped,
            failed = outcome.failures.len(),
            "Collection complete"
        );
        outcome
    }

    async fn invoke(
        &self,
        entry: &Registered,
        launch: &Pacer,
        cancel: &CancelFlag,
    ) -> Result<Vec<RawItem>, CollectionError> {
        if cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let timeout = entry
            .settings
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.options.collector_timeout);
        let ctx = CollectContext {
            settings: entry.settings.clone(),
            pacer: entry.pacer.clone(),
            retry: self.options.retry.clone(),
        };

        let work = async {
            launch.pace().await;
            ctx.pacer.pace().await;
            info!(source = entry.collector.source(), "Collector starting");
            match tokio::time::timeout(timeout, entry.collector.collect(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(CollectionError::Timeout(timeout.as_secs())),
            }
        };

        tokio::select! {
            result = work => result,
            _ = cancel.cancelled() => Err(CollectionError::Cancelled),
        }
    }
}
