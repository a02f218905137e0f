use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::enrichment::{EnrichmentAttempt, StageOutcome, StageResult};
use crate::orchestrator::{CollectionOutcome, CollectorFailure};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Found / not found / error / skipped tallies for one enrichment stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub found: u32,
    pub not_found: u32,
    pub error: u32,
    pub skipped: u32,
    #[serde(skip)]
    latency_total: Duration,
    #[serde(skip)]
    latency_max: Duration,
}

impl StageCounts {
    pub fn record(&mut self, result: Option<StageResult>) {
        let Some(result) = result else {
            self.skipped += 1;
            return;
        };
        match result.outcome {
            StageOutcome::Found => self.found += 1,
            StageOutcome::NotFound => self.not_found += 1,
            StageOutcome::Error => self.error += 1,
        }
        self.latency_total += result.latency;
        self.latency_max = self.latency_max.max(result.latency);
    }

    pub fn ran(&self) -> u32 {
        self.found + self.not_found + self.error
    }

    pub fn mean_latency(&self) -> Duration {
        match self.ran() {
            0 => Duration::ZERO,
            n => self.latency_total / n,
        }
    }

    pub fn max_latency(&self) -> Duration {
        self.latency_max
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorErrorEntry {
    pub source: String,
    pub kind: String,
    pub message: String,
}

impl From<&CollectorFailure> for CollectorErrorEntry {
    fn from(f: &CollectorFailure) -> Self {
        Self {
            source: f.source.clone(),
            kind: f.kind.to_string(),
            message: f.message.clone(),
        }
    }
}

/// Summary of one run. Built up stage by stage, logged at the end, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,

    pub collectors_run: u32,
    pub collectors_failed: u32,
    pub discovered: u32,
    pub malformed_dropped: u32,
    pub duplicates_suppressed: u32,
    pub unique_new: u32,

    pub email: StageCounts,
    pub linkedin: StageCounts,
    pub records_enriched: u32,
    pub enrichment_cancelled: u32,

    pub stored: u32,
    pub sink_failed: u32,

    pub collector_errors: Vec<CollectorErrorEntry>,
}

impl RunResult {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            collectors_run: 0,
            collectors_failed: 0,
            discovered: 0,
            malformed_dropped: 0,
            duplicates_suppressed: 0,
            unique_new: 0,
            email: StageCounts::default(),
            linkedin: StageCounts::default(),
            records_enriched: 0,
            enrichment_cancelled: 0,
            stored: 0,
            sink_failed: 0,
            collector_errors: Vec::new(),
        }
    }

    /// `discovered` counts records that survived normalization.
    pub fn record_collection(&mut self, outcome: &CollectionOutcome) {
        self.collectors_run += outcome.collectors_run as u32;
        self.collectors_failed += outcome.failures.len() as u32;
        self.discovered += outcome.records.len() as u32;
        self.malformed_dropped += outcome.malformed_dropped as u32;
        self.collector_errors
            .extend(outcome.failures.iter().map(CollectorErrorEntry::from));
    }

    pub fn record_dedup(&mut self, unique: usize, duplicates: usize) {
        self.unique_new += unique as u32;
        self.duplicates_suppressed += duplicates as u32;
    }

    pub fn record_enrichment(&mut self, attempt: &EnrichmentAttempt) {
        self.email.record(attempt.email);
        self.linkedin.record(attempt.linkedin);
        if attempt.enriched() {
            self.records_enriched += 1;
        }
        if attempt.cancelled {
            self.enrichment_cancelled += 1;
        }
    }

    pub fn record_write(&mut self, batch: usize, written: usize) {
        self.stored += written as u32;
        self.sink_failed += batch.saturating_sub(written) as u32;
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Aggregation Run Complete ===")?;
        writeln!(f, "Run:                 {}", self.run_id)?;
        writeln!(f, "Status:              {}", self.status)?;
        writeln!(f, "Elapsed:             {:.1}s", self.elapsed().as_secs_f64())?;
        writeln!(f, "Collectors run:      {}", self.collectors_run)?;
        writeln!(f, "Collectors failed:   {}", self.collectors_failed)?;
        writeln!(f, "Discovered:          {}", self.discovered)?;
        writeln!(f, "Malformed dropped:   {}", self.malformed_dropped)?;
        writeln!(f, "Duplicates:          {}", self.duplicates_suppressed)?;
        writeln!(f, "Unique new:          {}", self.unique_new)?;
        writeln!(f, "\nEnrichment:")?;
        for (label, counts) in [("Email", &self.email), ("LinkedIn", &self.linkedin)] {
            writeln!(
                f,
                "  {label:<9} found {} / not found {} / error {} / skipped {} (avg {}ms, max {}ms)",
                counts.found,
                counts.not_found,
                counts.error,
                counts.skipped,
                counts.mean_latency().as_millis(),
                counts.max_latency().as_millis(),
            )?;
        }
        writeln!(f, "  Enriched:  {}", self.records_enriched)?;
        if self.enrichment_cancelled > 0 {
            writeln!(f, "  Cancelled: {}", self.enrichment_cancelled)?;
        }
        writeln!(f, "\nStored:              {}", self.stored)?;
        writeln!(f, "Sink failed:         {}", self.sink_failed)?;
        if !self.collector_errors.is_empty() {
            writeln!(f, "\nCollector errors:")?;
            for e in &self.collector_errors {
                writeln!(f, "  {} [{}]: {}", e.source, e.kind, e.message)?;
            }
        }
        Ok(())
    }
}
