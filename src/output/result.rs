use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{Aggregated, Indexes, RawData};
use crate::collect::fetcher::EntityError;
use crate::collect::options::{CollectionOptions, EntityKind, TimeWindow};
use crate::collect::project::ResolvedTarget;
use crate::collect::{RepoReport, RepoStatus, RunStatus};
use crate::github::quota::QuotaUsage;
use crate::metrics::Metrics;

/// The serialized artifact. Its four top-level keys are the `jq` query contract.
#[derive(Debug, Serialize)]
pub struct CollectionResult {
    pub raw: RawData,
    pub indexes: Indexes,
    pub metrics: Metrics,
    pub metadata: RunMetadata,
}

#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub tool: &'static str,
    pub version: &'static str,
    pub command_line: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// Reference "now" for every time-relative metric.
    pub analysis_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub target: ResolvedTarget,
    pub window: TimeWindow,
    pub options: CollectionOptions,
    pub repositories_total: usize,
    /// Repositories whose data is in `raw`, including those with entity errors.
    pub repositories_processed: Vec<String>,
    pub repositories_excluded: Vec<RepoReport>,
    pub repositories_failed: Vec<RepoReport>,
    pub repositories_incomplete: Vec<RepoReport>,
    pub items_collected: BTreeMap<EntityKind, usize>,
    /// Failed entity kinds plus failed repositories.
    pub errors_encountered: usize,
    pub entity_errors: Vec<EntityError>,
    pub orphans_dropped: usize,
    pub api_quota: QuotaUsage,
    pub timed_out: bool,
}

/// Run facts known outside the collection itself.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command_line: Vec<String>,
    pub analysis_time: DateTime<Utc>,
    pub options: CollectionOptions,
}

impl CollectionResult {
    pub fn assemble(
        run: RunStatus,
        aggregated: Aggregated,
        metrics: Metrics,
        invocation: Invocation,
        elapsed: Duration,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut processed = Vec::new();
        let mut excluded = Vec::new();
        let mut failed = Vec::new();
        let mut incomplete = Vec::new();
        for report in run.reports {
            let bucket = match report.status {
                RepoStatus::Collected => {
                    processed.push(report.repository);
                    continue;
                }
                RepoStatus::Excluded { .. } => &mut excluded,
                RepoStatus::Failed { .. } => &mut failed,
                RepoStatus::Incomplete { .. } => &mut incomplete,
            };
            bucket.push(report);
        }

        let items_collected = EntityKind::ALL
            .into_iter()
            .filter(|k| invocation.options.wants(*k))
            .map(|k| (k, aggregated.raw.count(k)))
            .collect();

        let metadata = RunMetadata {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            command_line: invocation.command_line,
            generated_at,
            analysis_time: invocation.analysis_time,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            repositories_total: processed.len() + excluded.len() + failed.len() + incomplete.len(),
            errors_encountered: aggregated.errors.len() + failed.len(),
            target: run.target,
            window: invocation.options.window,
            options: invocation.options,
            repositories_processed: processed,
            repositories_excluded: excluded,
            repositories_failed: failed,
            repositories_incomplete: incomplete,
            items_collected,
            entity_errors: aggregated.errors,
            orphans_dropped: aggregated.orphans_dropped,
            api_quota: run.quota,
            timed_out: run.timed_out,
        };

        Self {
            raw: aggregated.raw,
            indexes: aggregated.indexes,
            metrics,
            metadata,
        }
    }
}
