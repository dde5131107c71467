use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;

use crate::collect::options::{
    Caps, CollectionOptions, EntityKind, OptionsError, TimeWindow, parse_since, parse_until,
};
use crate::collect::project::Target;
use crate::collect::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, RunConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Organization owning the project or repositories
    #[arg(long)]
    pub org: Option<String>,

    /// Projects (v2) board number within --org
    #[arg(long, requires = "org", conflicts_with = "repos")]
    pub project: Option<u64>,

    /// Repository to collect, as owner/name or URL; bare names take --org as owner (repeatable)
    #[arg(long = "repo", value_name = "OWNER/NAME")]
    pub repos: Vec<String>,

    /// Start of the time window: YYYY-MM-DD, RFC 3339, or a span back from now (7d, 2w, 3m, 1y)
    #[arg(long)]
    pub since: Option<String>,

    /// End of the time window: YYYY-MM-DD (inclusive) or RFC 3339
    #[arg(long)]
    pub until: Option<String>,

    /// Entity kinds to collect, comma separated [default: all]
    #[arg(long, value_enum, value_delimiter = ',')]
    pub kinds: Vec<EntityKind>,

    #[arg(long, default_value_t = 500)]
    pub max_issues: usize,

    #[arg(long, default_value_t = 500)]
    pub max_pull_requests: usize,

    #[arg(long, default_value_t = 1000)]
    pub max_commits: usize,

    #[arg(long, default_value_t = 1000)]
    pub max_comments: usize,

    /// Review cap per repository, across all its pull requests
    #[arg(long, default_value_t = 500)]
    pub max_reviews: usize,

    /// Fetch each pull request individually for additions/deletions/changed files
    #[arg(long)]
    pub include_pr_details: bool,

    #[arg(long)]
    pub exclude_forks: bool,

    #[arg(long)]
    pub exclude_archived: bool,

    /// Repositories fetched at the same time (1-8)
    #[arg(long, env = "TALLY_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Overall deadline for the collection, in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Directory receiving the result file
    #[arg(long, env = "TALLY_OUTPUT_DIR", default_value = "var")]
    pub output_dir: PathBuf,

    /// Write plain JSON instead of xz-compressed JSON
    #[arg(long)]
    pub no_compress: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("Nothing to collect: pass --org, --org with --project, or at least one --repo")]
    NoTarget,

    #[error(transparent)]
    Options(#[from] OptionsError),
}

impl Args {
    pub fn target(&self) -> Result<Target, ArgsError> {
        if let (Some(org), Some(number)) = (&self.org, self.project) {
            return Ok(Target::Project {
                org: org.clone(),
                number,
            });
        }
        if !self.repos.is_empty() {
            let repos = self
                .repos
                .iter()
                .map(|r| match &self.org {
                    Some(org) if !r.contains('/') => format!("{org}/{r}"),
                    _ => r.clone(),
                })
                .collect();
            return Ok(Target::Repositories { repos });
        }
        match &self.org {
            Some(org) => Ok(Target::Organization { org: org.clone() }),
            None => Err(ArgsError::NoTarget),
        }
    }

    /// Relative `--since` spans resolve against `now`, the run's analysis time.
    pub fn options(&self, now: DateTime<Utc>) -> Result<CollectionOptions, ArgsError> {
        let since = self.since.as_deref().map(|s| parse_since(s, now)).transpose()?;
        let until = self.until.as_deref().map(parse_until).transpose()?;
        let kinds = if self.kinds.is_empty() {
            EntityKind::ALL.into_iter().collect()
        } else {
            self.kinds.iter().copied().collect()
        };
        Ok(CollectionOptions {
            kinds,
            caps: Caps {
                issues: self.max_issues,
                pull_requests: self.max_pull_requests,
                commits: self.max_commits,
                comments: self.max_comments,
                reviews: self.max_reviews,
            },
            window: TimeWindow { since, until },
            include_pr_details: self.include_pr_details,
            exclude_forks: self.exclude_forks,
            exclude_archived: self.exclude_archived,
        })
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            concurrency: self.concurrency,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::ts;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tally").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn project_target_needs_org() {
        assert!(Args::try_parse_from(["tally", "--project", "3"]).is_err());
        let args = parse(&["--org", "acme", "--project", "3"]);
        assert_eq!(
            args.target().unwrap(),
            Target::Project {
                org: "acme".into(),
                number: 3
            }
        );
    }

    #[test]
    fn bare_repo_names_take_org_as_owner() {
        let args = parse(&["--org", "acme", "--repo", "widgets", "--repo", "other/gadgets"]);
        assert_eq!(
            args.target().unwrap(),
            Target::Repositories {
                repos: vec!["acme/widgets".into(), "other/gadgets".into()]
            }
        );
    }

    #[test]
    fn missing_target_is_an_error() {
        assert!(matches!(parse(&[]).target(), Err(ArgsError::NoTarget)));
    }

    #[test]
    fn options_follow_flags() {
        let args = parse(&[
            "--org",
            "acme",
            "--since",
            "7d",
            "--until",
            "2024-03-31",
            "--kinds",
            "issues,pull_requests",
            "--max-issues",
            "50",
        ]);
        let options = args.options(ts("2024-03-31T12:00:00Z")).unwrap();
        assert_eq!(options.window.since, Some(ts("2024-03-24T12:00:00Z")));
        assert_eq!(options.window.until, Some(ts("2024-03-31T23:59:59Z")));
        assert_eq!(options.caps.issues, 50);
        assert!(options.wants(EntityKind::PullRequests));
        assert!(!options.wants(EntityKind::Commits));
    }

    #[test]
    fn run_config_defaults() {
        let config = parse(&["--org", "acme"]).run_config();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn bad_since_is_rejected() {
        let args = parse(&["--org", "acme", "--since", "last tuesday"]);
        assert!(matches!(
            args.options(ts("2024-03-31")),
            Err(ArgsError::Options(OptionsError::InvalidTime(_)))
        ));
    }
}
