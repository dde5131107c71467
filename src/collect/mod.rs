pub mod fetcher;
pub mod options;
pub mod project;

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::github::quota::{QuotaTracker, QuotaUsage};
use crate::github::{self, GitHubClient, GitHubError};
use fetcher::{Fetcher, RepoCollection, RepoOutcome};
use options::{CollectionOptions, OptionsError};
use project::{ResolvedTarget, Target};

/// Default number of repositories fetched at the same time.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Upper bound on simultaneous repository fetches, to stay clear of secondary rate limits.
pub const MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Run-level failures. Anything listed here aborts the run before output is written.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("{0}")]
    Auth(GitHubError),

    #[error("GitHub API preflight failed: {0}")]
    Preflight(GitHubError),

    #[error("Timed out after {0}s waiting for the GitHub API preflight")]
    PreflightTimeout(u64),

    #[error("{0}")]
    InvalidTarget(GitHubError),

    #[error("Project {org}#{number} not found or not accessible with the current token")]
    ProjectNotFound { org: String, number: u64 },

    #[error("Could not enumerate repositories: {0}")]
    Enumerate(GitHubError),

    #[error("No repositories to collect for '{0}'")]
    NoRepositories(String),

    #[error("Timed out after {0}s while enumerating repositories")]
    EnumerationTimeout(u64),

    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// Concurrency and deadline for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What happened to one enumerated repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepoStatus {
    Collected,
    Excluded { reason: String },
    Failed { error: String },
    /// Still in flight (or never started) when the deadline passed.
    Incomplete { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoReport {
    pub repository: String,
    #[serde(flatten)]
    pub status: RepoStatus,
}

/// Output of the fetch phase: collected repositories in enumeration order
/// plus how the run went.
#[derive(Debug)]
pub struct CollectionRun {
    pub collections: Vec<RepoCollection>,
    pub status: RunStatus,
}

#[derive(Debug)]
pub struct RunStatus {
    pub target: ResolvedTarget,
    /// One entry per enumerated repository, in enumeration order.
    pub reports: Vec<RepoReport>,
    pub quota: QuotaUsage,
    pub timed_out: bool,
}

/// Resolve `target` and fetch every repository under one overall deadline.
///
/// Runs on the caller's (current-thread) runtime. Repository fetches are
/// polled concurrently, at most `config.concurrency` at a time, and buffered by
/// enumeration position so completion order never leaks into the result.
pub async fn collect(
    client: &GitHubClient,
    target: &Target,
    options: &CollectionOptions,
    config: RunConfig,
) -> Result<CollectionRun, CollectError> {
    options.validate()?;
    let deadline = Instant::now() + config.timeout;
    let quota = QuotaTracker::new();

    tokio::time::timeout_at(deadline, preflight(client, &quota))
        .await
        .map_err(|_| CollectError::PreflightTimeout(config.timeout.as_secs()))??;

    let resolved = tokio::time::timeout_at(deadline, project::resolve(client, target, options, &quota))
        .await
        .map_err(|_| CollectError::EnumerationTimeout(config.timeout.as_secs()))??;

    let fetcher = Fetcher::new(client, options, &quota);
    let concurrency = config.concurrency.clamp(1, MAX_CONCURRENCY);
    let mut slots: Vec<Option<RepoOutcome>> = resolved.repositories.iter().map(|_| None).collect();

    let mut pending = stream::iter(resolved.repositories.iter().enumerate())
        .map(|(position, full_name)| {
            let fetcher = &fetcher;
            async move {
                let outcome = match github::parse_repo(full_name) {
                    Ok((owner, name)) => fetcher.fetch_repository(owner, name).await,
                    Err(e) => RepoOutcome::Failed(e),
                };
                (position, outcome)
            }
        })
        .buffer_unordered(concurrency);

    let mut timed_out = false;
    loop {
        match tokio::time::timeout_at(deadline, pending.next()).await {
            Ok(Some((position, outcome))) => slots[position] = Some(outcome),
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                break;
            }
        }
    }
    // Abandons whatever is still in flight.
    drop(pending);

    let mut collections: Vec<RepoCollection> = Vec::new();
    let mut reports = Vec::with_capacity(slots.len());
    for (full_name, slot) in resolved.repositories.iter().zip(slots) {
        let status = match slot {
            Some(RepoOutcome::Collected(collection)) => {
                // Reported under the name GitHub returns so metadata joins with `raw`.
                let canonical = collection.repository.full_name.clone();
                if collections
                    .iter()
                    .any(|c| c.repository.full_name.eq_ignore_ascii_case(&canonical))
                {
                    reports.push(RepoReport {
                        repository: full_name.clone(),
                        status: RepoStatus::Excluded {
                            reason: format!("duplicate of {canonical}"),
                        },
                    });
                    continue;
                }
                collections.push(collection);
                reports.push(RepoReport {
                    repository: canonical,
                    status: RepoStatus::Collected,
                });
                continue;
            }
            Some(RepoOutcome::Excluded(reason)) => RepoStatus::Excluded {
                reason: reason.to_string(),
            },
            Some(RepoOutcome::Failed(e)) => RepoStatus::Failed { error: e.to_string() },
            None => RepoStatus::Incomplete {
                reason: "timeout".to_string(),
            },
        };
        reports.push(RepoReport {
            repository: full_name.clone(),
            status,
        });
    }

    if timed_out {
        warn!(
            timeout_secs = config.timeout.as_secs(),
            collected = collections.len(),
            total = reports.len(),
            "collection deadline reached; writing partial result"
        );
    }
    let quota = quota.snapshot();
    info!(
        collected = collections.len(),
        total = reports.len(),
        api_calls = quota.calls_made,
        remaining = ?quota.remaining,
        "collection finished"
    );

    Ok(CollectionRun {
        collections,
        status: RunStatus {
            target: resolved,
            reports,
            quota,
            timed_out,
        },
    })
}

/// The run's first call. An auth failure here is fatal because no later call can succeed.
async fn preflight(client: &GitHubClient, quota: &QuotaTracker) -> Result<(), CollectError> {
    match client.rate_limit(quota).await {
        Ok(window) => {
            let reset = chrono::DateTime::from_timestamp(window.reset, 0);
            quota.seed(window.remaining, window.limit, reset);
            if window.remaining == 0 {
                warn!(reset = ?reset, "API quota exhausted; requests will be rate limited");
            }
            Ok(())
        }
        Err(e) if e.is_auth() => Err(CollectError::Auth(e)),
        // Enterprise servers with rate limiting disabled answer 404.
        Err(GitHubError::NotFound(_)) => Ok(()),
        Err(e) => Err(CollectError::Preflight(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use options::EntityKind;
    use reqwest::Client;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_rate_limit(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": {"core": {"limit": 5000, "remaining": 4900, "reset": 1700000000}}
            })))
            .mount(server)
            .await;
    }

    async fn mount_repo(server: &MockServer, full_name: &str, delay: Duration) {
        let (owner, name) = full_name.split_once('/').unwrap();
        Mock::given(method("GET"))
            .and(path(format!("/repos/{full_name}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(delay)
                    .set_body_json(serde_json::json!({
                        "name": name,
                        "full_name": full_name,
                        "owner": {"login": owner},
                        "html_url": format!("https://github.com/{full_name}"),
                        "stargazers_count": 1,
                        "forks_count": 0,
                        "watchers_count": 1,
                        "open_issues_count": 0
                    })),
            )
            .mount(server)
            .await;
    }

    /// `requested` answers with the metadata of `canonical`, as GitHub does for
    /// other spellings and renamed repositories.
    async fn mount_alias(server: &MockServer, requested: &str, canonical: &str) {
        let (owner, name) = canonical.split_once('/').unwrap();
        Mock::given(method("GET"))
            .and(path(format!("/repos/{requested}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": name,
                "full_name": canonical,
                "owner": {"login": owner},
                "html_url": format!("https://github.com/{canonical}"),
                "stargazers_count": 10,
                "forks_count": 0,
                "watchers_count": 10,
                "open_issues_count": 1
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/{requested}/issues")))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body(canonical, 1)))
            .mount(server)
            .await;
    }

    fn issues_body(full_name: &str, count: u64) -> serde_json::Value {
        (1..=count)
            .map(|n| {
                serde_json::json!({
                    "number": n,
                    "title": format!("issue {n}"),
                    "state": "open",
                    "html_url": format!("https://github.com/{full_name}/issues/{n}"),
                    "user": {"login": "alice"},
                    "created_at": "2024-01-02T00:00:00Z",
                    "updated_at": "2024-01-02T00:00:00Z"
                })
            })
            .collect()
    }

    fn issues_only() -> CollectionOptions {
        CollectionOptions {
            kinds: [EntityKind::Issues].into_iter().collect(),
            ..CollectionOptions::default()
        }
    }

    fn repos(names: &[&str]) -> Target {
        Target::Repositories {
            repos: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn unauthorized_preflight_is_fatal_before_any_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Bad credentials"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/repos/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let err = collect(&client, &repos(&["acme/widgets"]), &issues_only(), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Auth(GitHubError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn preflight_counts_against_the_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let config = RunConfig {
            concurrency: 1,
            timeout: Duration::from_millis(200),
        };
        let err = collect(&client, &repos(&["acme/widgets"]), &issues_only(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::PreflightTimeout(_)));
    }

    #[tokio::test]
    async fn results_follow_enumeration_order_not_completion_order() {
        let server = MockServer::start().await;
        mount_rate_limit(&server).await;
        mount_repo(&server, "org/slow", Duration::from_millis(150)).await;
        mount_repo(&server, "org/fast", Duration::ZERO).await;
        for (name, count) in [("org/slow", 1), ("org/fast", 2)] {
            Mock::given(method("GET"))
                .and(path(format!("/repos/{name}/issues")))
                .respond_with(ResponseTemplate::new(200).set_body_json(issues_body(name, count)))
                .mount(&server)
                .await;
        }

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let run = collect(&client, &repos(&["org/slow", "org/fast"]), &issues_only(), RunConfig::default())
            .await
            .unwrap();

        let names: Vec<_> = run.collections.iter().map(|c| c.repository.full_name.as_str()).collect();
        assert_eq!(names, vec!["org/slow", "org/fast"]);
        assert!(!run.status.timed_out);
        assert!(run.status.reports.iter().all(|r| r.status == RepoStatus::Collected));
        assert_eq!(run.status.quota.limit, Some(5000));
    }

    #[tokio::test]
    async fn deadline_marks_unfinished_repositories_incomplete() {
        let server = MockServer::start().await;
        mount_rate_limit(&server).await;
        mount_repo(&server, "org/quick", Duration::ZERO).await;
        mount_repo(&server, "org/stuck", Duration::from_secs(5)).await;
        Mock::given(method("GET"))
            .and(path("/repos/org/quick/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("org/quick", 1)))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let config = RunConfig {
            concurrency: 2,
            timeout: Duration::from_millis(500),
        };
        let run = collect(&client, &repos(&["org/stuck", "org/quick"]), &issues_only(), config)
            .await
            .unwrap();

        assert!(run.status.timed_out);
        assert_eq!(run.collections.len(), 1);
        assert_eq!(run.collections[0].repository.full_name, "org/quick");
        assert_eq!(
            run.status.reports[0],
            RepoReport {
                repository: "org/stuck".into(),
                status: RepoStatus::Incomplete {
                    reason: "timeout".into()
                },
            }
        );
        assert_eq!(run.status.reports[1].status, RepoStatus::Collected);
    }

    #[tokio::test]
    async fn missing_repository_is_failed_not_fatal() {
        let server = MockServer::start().await;
        mount_rate_limit(&server).await;
        mount_repo(&server, "org/a", Duration::ZERO).await;
        Mock::given(method("GET"))
            .and(path("/repos/org/a/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("org/a", 1)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/org/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let run = collect(&client, &repos(&["org/gone", "org/a"]), &issues_only(), RunConfig::default())
            .await
            .unwrap();

        assert_eq!(run.collections.len(), 1);
        assert!(matches!(run.status.reports[0].status, RepoStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn repositories_are_reported_by_canonical_name_and_collected_once() {
        let server = MockServer::start().await;
        mount_rate_limit(&server).await;
        mount_alias(&server, "ORG/Widgets", "org/widgets").await;
        mount_alias(&server, "org/old-widgets", "org/widgets").await;

        let client = GitHubClient::with_base_url(Client::new(), &server.uri());
        let run = collect(
            &client,
            &repos(&["ORG/Widgets", "org/old-widgets"]),
            &issues_only(),
            RunConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(run.collections.len(), 1);
        assert_eq!(run.collections[0].issues.len(), 1);
        assert_eq!(
            run.status.reports,
            vec![
                RepoReport {
                    repository: "org/widgets".into(),
                    status: RepoStatus::Collected,
                },
                RepoReport {
                    repository: "org/old-widgets".into(),
                    status: RepoStatus::Excluded {
                        reason: "duplicate of org/widgets".into()
                    },
                },
            ]
        );
    }
}
