//! One collection run from resolved arguments to a written result file.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregate;
use crate::collect::options::CollectionOptions;
use crate::collect::project::Target;
use crate::collect::{self, CollectError, RunConfig};
use crate::github::GitHubClient;
use crate::metrics;
use crate::output::{self, CollectionResult, Invocation, OutputError, RunSummary};

#[derive(Debug, Clone)]
pub struct Request {
    pub target: Target,
    pub options: CollectionOptions,
    pub config: RunConfig,
    pub output_dir: PathBuf,
    pub compress: bool,
    pub command_line: Vec<String>,
    /// "Now" for relative windows and time-based metrics.
    pub analysis_time: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

pub async fn execute(client: &GitHubClient, request: Request) -> Result<RunSummary, RunError> {
    let started = Instant::now();
    let run = collect::collect(client, &request.target, &request.options, request.config).await?;

    let aggregated = aggregate::aggregate(run.collections);
    let metrics = metrics::compute(
        &aggregated.raw,
        &aggregated.indexes,
        &request.options.window,
        request.analysis_time,
    );

    let label = run.status.target.label();
    let generated_at = Utc::now();
    let invocation = Invocation {
        command_line: request.command_line,
        analysis_time: request.analysis_time,
        options: request.options,
    };
    let result = CollectionResult::assemble(
        run.status,
        aggregated,
        metrics,
        invocation,
        started.elapsed(),
        generated_at,
    );

    let name = output::output_file_name(&label, &generated_at, request.compress);
    let path = output::write_json(&result, &request.output_dir, &name, request.compress)?;
    info!(
        path = %path.display(),
        repositories = result.metadata.repositories_processed.len(),
        errors = result.metadata.errors_encountered,
        timed_out = result.metadata.timed_out,
        "result written"
    );
    Ok(RunSummary::completed(&result, path, request.compress))
}
