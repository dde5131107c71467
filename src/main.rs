mod aggregate;
mod cli;
mod collect;
mod github;
mod metrics;
mod model;
mod output;
mod pipeline;

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use reqwest::Client;
use tracing::{error, info};

use github::GitHubClient;
use output::RunSummary;
use pipeline::Request;

pub const USER_AGENT: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Args(#[from] cli::ArgsError),

    #[error("Could not build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Run(#[from] pipeline::RunError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally=info".parse()?),
        )
        .init();

    let args = cli::Args::parse();
    let summary = match run(args).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            RunSummary::failed(&e)
        }
    };

    println!("{}", serde_json::to_string(&summary)?);
    if !summary.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: cli::Args) -> Result<RunSummary, MainError> {
    let analysis_time = Utc::now();
    let request = Request {
        target: args.target()?,
        options: args.options(analysis_time)?,
        config: args.run_config(),
        output_dir: args.output_dir.clone(),
        compress: !args.no_compress,
        command_line: std::env::args().collect(),
        analysis_time,
    };
    info!(scope = ?request.target, window = ?request.options.window, "starting collection");

    let http = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .build()?;
    let client = GitHubClient::from_env(http);
    Ok(pipeline::execute(&client, request).await?)
}
