use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use web3scout_common::{IdentityKey, ProjectRecord, RetryPolicy, SinkError, Web3ScoutError};

use crate::cancel::CancelFlag;
use crate::dedup::Deduplicator;
use crate::enrichment::EnrichmentPipeline;
use crate::orchestrator::Orchestrator;
use crate::stats::{RunResult, RunStatus};
use crate::traits::ProjectSink;

/// Output of a collect-only pass: what a full run would enrich and store.
#[derive(Debug)]
pub struct CollectPreview {
    pub records: Vec<ProjectRecord>,
    pub result: RunResult,
}

/// Drives collect → dedup → enrich → store and reports a [`RunResult`].
pub struct Aggregator {
    orchestrator: Orchestrator,
    enrichment: EnrichmentPipeline,
    sink: Arc<dyn ProjectSink>,
    retry: RetryPolicy,
    cancel: CancelFlag,
}

impl Aggregator {
    pub fn new(
        orchestrator: Orchestrator,
        enrichment: EnrichmentPipeline,
        sink: Arc<dyn ProjectSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            enrichment,
            sink,
            retry,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn sink(&self) -> &Arc<dyn ProjectSink> {
        &self.sink
    }

    /// One full run. Never returns early with an error: failures are
    /// reflected in the result's status and counters.
    pub async fn run(&self) -> RunResult {
        let mut result = RunResult::start();
        info!(run_id = %result.run_id, sink = self.sink.name(), "Aggregation run starting");

        let known = match self.snapshot().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Existing-key snapshot failed, aborting run");
                result.finish(RunStatus::Failed(format!("existing-key snapshot failed: {e}")));
                info!("{result}");
                return result;
            }
        };

        let collected = self.orchestrator.run(&self.cancel).await;
        result.record_collection(&collected);

        let mut dedup = Deduplicator::new(known);
        let deduped = dedup.dedup(collected.records);
        result.record_dedup(deduped.unique.len(), deduped.duplicates);

        let enriched = self.enrichment.run(deduped.unique, &self.cancel).await;
        for attempt in &enriched.attempts {
            result.record_enrichment(attempt);
        }

        let batch = enriched.records;
        let mut failure = None;
        match self.store(&batch).await {
            Ok(written) => result.record_write(batch.len(), written),
            Err(e) => {
                let written = e.written();
                result.record_write(batch.len(), written);
                if written == 0 {
                    error!(rows = batch.len(), error = %e, "Sink write failed for the whole batch");
                    failure = Some(format!("sink write failed: {e}"));
                } else {
                    warn!(
                        written,
                        failed = batch.len() - written,
                        error = %e,
                        "Sink write partially failed"
                    );
                }
            }
        }

        let status = match failure {
            Some(reason) => RunStatus::Failed(reason),
            None if self.cancel.is_cancelled() => RunStatus::Cancelled,
            None => RunStatus::Completed,
        };
        result.finish(status);
        info!("{result}");
        result
    }

    /// Collect and dedup without enrichment or writes.
    pub async fn collect_only(&self) -> Result<CollectPreview, Web3ScoutError> {
        let mut result = RunResult::start();
        let known = self.snapshot().await?;

        let collected = self.orchestrator.run(&self.cancel).await;
        result.record_collection(&collected);

        let mut dedup = Deduplicator::new(known);
        let deduped = dedup.dedup(collected.records);
        result.record_dedup(deduped.unique.len(), deduped.duplicates);

        result.finish(if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        });
        Ok(CollectPreview {
            records: deduped.unique,
            result,
        })
    }

    async fn snapshot(&self) -> Result<HashSet<IdentityKey>, SinkError> {
        let keys = self
            .retry
            .run("sink_snapshot", || self.sink.existing_keys())
            .await?;
        info!(known = keys.len(), "Loaded existing-key snapshot");
        Ok(keys)
    }

    /// Whole-batch append; retried only while nothing has been written.
    async fn store(&self, batch: &[ProjectRecord]) -> Result<usize, SinkError> {
        if batch.is_empty() {
            info!("Nothing new to store");
            return Ok(0);
        }
        self.retry
            .run("sink_append", || self.sink.append(batch))
            .await
    }
}
