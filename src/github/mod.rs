mod helpers;
pub mod quota;
pub mod types;

pub use helpers::{format_timestamp, issue_number_from_url, parent_key, parse_repo, validate_org};
use helpers::extract_error_message;

use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use quota::QuotaTracker;
use types::*;

const API_BASE: &str = "https://api.github.com";
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Largest page size the REST API accepts.
pub const MAX_PER_PAGE: usize = 100;

const PROJECT_ITEMS_QUERY: &str = r"
query($org: String!, $number: Int!, $cursor: String) {
  organization(login: $org) {
    projectV2(number: $number) {
      title
      items(first: 100, after: $cursor) {
        nodes {
          content {
            ... on Issue { repository { nameWithOwner } }
            ... on PullRequest { repository { nameWithOwner } }
          }
        }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}";

/// Errors returned by GitHub API operations.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}. Set GITHUB_TOKEN or run `gh auth login`.")]
    Unauthorized(String),

    #[error(
        "GitHub API rate limit exceeded. Set GITHUB_TOKEN or run `gh auth login` for higher limits."
    )]
    RateLimited,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("GitHub API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid repository format: expected 'owner/repo', got '{0}'")]
    InvalidRepo(String),

    #[error("Invalid organization: '{0}'")]
    InvalidOrg(String),
}

impl GitHubError {
    /// The token is missing, invalid, or lacks access.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }

    fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Api { code: 500..=599, .. } => true,
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Retry policy for transient failures (5xx, rate limits, network).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
        }
    }
}

/// HTTP client for the GitHub REST API v3 and GraphQL API v4.
///
/// Auth resolution order: `GITHUB_TOKEN` env → `GH_TOKEN` env → `gh auth token` CLI → unauthenticated.
/// `GITHUB_API_URL` overrides the API base (GitHub Enterprise).
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    token: Option<String>,
    base_url: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Create a client using the configured API base and auto-detected auth.
    pub fn from_env(http: Client) -> Self {
        let token = resolve_token();
        if token.is_some() {
            debug!("GitHub token configured");
        } else {
            warn!("No GitHub token found. Rate limit: 60 req/hour. Set GITHUB_TOKEN or run `gh auth login`.");
        }
        let base_url = env::var("GITHUB_API_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| API_BASE.to_string());
        Self {
            http,
            token,
            base_url,
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            token: Some("test-token".to_string()),
            base_url: base_url.to_string(),
            retry: RetryPolicy {
                max_attempts: MAX_ATTEMPTS,
                initial_backoff: Duration::from_millis(2),
            },
        }
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, GitHubError> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", crate::USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match self.token {
            Some(ref token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        label: &str,
        quota: &QuotaTracker,
    ) -> Result<T, GitHubError> {
        let response = self.authorize(req).send().await?;
        quota.record(response.headers());
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {status}"));
        Err(classify_status(status, &headers, &body, label))
    }

    /// Send a request built by `build`, retrying transient failures with jittered backoff.
    async fn send<T, F>(&self, build: F, label: &str, quota: &QuotaTracker) -> Result<T, GitHubError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match self.send_once(build(), label, quota).await {
                Err(e) if e.is_retriable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = jittered_backoff(self.retry.initial_backoff, attempt);
                    debug!(
                        %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        quota: &QuotaTracker,
    ) -> Result<T, GitHubError> {
        let url = self.url(path, query)?;
        self.send(|| self.http.get(url.clone()), path, quota).await
    }

    /// Run a GraphQL query; a non-empty `errors` array is an error even on HTTP 200.
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
        quota: &QuotaTracker,
    ) -> Result<T, GitHubError> {
        let url = self.url("/graphql", &[])?;
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self
            .send(|| self.http.post(url.clone()).json(&body), "/graphql", quota)
            .await?;
        if !response.errors.is_empty() {
            let message = response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GitHubError::GraphQl(message));
        }
        response
            .data
            .ok_or_else(|| GitHubError::GraphQl("response carried no data".into()))
    }

    /// `GET /rate_limit`. Does not consume quota; used as the run's auth preflight.
    pub async fn rate_limit(&self, quota: &QuotaTracker) -> Result<RateLimitWindow, GitHubError> {
        let response: RateLimitResponse = self.get_json("/rate_limit", &[], quota).await?;
        Ok(response.resources.core)
    }

    pub async fn get_repo(
        &self,
        owner: &str,
        repo: &str,
        quota: &QuotaTracker,
    ) -> Result<RepoInfo, GitHubError> {
        self.get_json(&format!("/repos/{owner}/{repo}"), &[], quota)
            .await
    }

    /// One page of issues (and pull requests, which the endpoint also returns),
    /// most recently updated first.
    pub async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        since: Option<&DateTime<Utc>>,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<IssueInfo>, GitHubError> {
        let mut query = list_query(page, per_page);
        query.push(("state", "all".into()));
        query.push(("sort", "updated".into()));
        query.push(("direction", "desc".into()));
        if let Some(since) = since {
            query.push(("since", format_timestamp(since)));
        }
        self.get_json(&format!("/repos/{owner}/{repo}/issues"), &query, quota)
            .await
    }

    /// One page of pull requests, most recently updated first. The endpoint has no `since`.
    pub async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<PullInfo>, GitHubError> {
        let mut query = list_query(page, per_page);
        query.push(("state", "all".into()));
        query.push(("sort", "updated".into()));
        query.push(("direction", "desc".into()));
        self.get_json(&format!("/repos/{owner}/{repo}/pulls"), &query, quota)
            .await
    }

    pub async fn get_pull(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        quota: &QuotaTracker,
    ) -> Result<PullInfo, GitHubError> {
        self.get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"), &[], quota)
            .await
    }

    pub async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        since: Option<&DateTime<Utc>>,
        until: Option<&DateTime<Utc>>,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<CommitInfo>, GitHubError> {
        let mut query = list_query(page, per_page);
        if let Some(since) = since {
            query.push(("since", format_timestamp(since)));
        }
        if let Some(until) = until {
            query.push(("until", format_timestamp(until)));
        }
        self.get_json(&format!("/repos/{owner}/{repo}/commits"), &query, quota)
            .await
    }

    /// One page of issue and pull request comments across the repository.
    pub async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        since: Option<&DateTime<Utc>>,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<CommentInfo>, GitHubError> {
        let mut query = list_query(page, per_page);
        query.push(("sort", "created".into()));
        query.push(("direction", "desc".into()));
        if let Some(since) = since {
            query.push(("since", format_timestamp(since)));
        }
        self.get_json(
            &format!("/repos/{owner}/{repo}/issues/comments"),
            &query,
            quota,
        )
        .await
    }

    pub async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<ReviewInfo>, GitHubError> {
        self.get_json(
            &format!("/repos/{owner}/{repo}/pulls/{number}/reviews"),
            &list_query(page, per_page),
            quota,
        )
        .await
    }

    pub async fn list_org_repos(
        &self,
        org: &str,
        page: usize,
        per_page: usize,
        quota: &QuotaTracker,
    ) -> Result<Vec<OrgRepoEntry>, GitHubError> {
        let mut query = list_query(page, per_page);
        query.push(("type", "all".into()));
        query.push(("sort", "full_name".into()));
        self.get_json(&format!("/orgs/{org}/repos"), &query, quota)
            .await
    }

    /// One page of a Projects-v2 board's items.
    pub async fn project_items(
        &self,
        org: &str,
        number: u64,
        cursor: Option<&str>,
        quota: &QuotaTracker,
    ) -> Result<Option<ProjectV2>, GitHubError> {
        let data: ProjectQueryData = self
            .graphql(
                PROJECT_ITEMS_QUERY,
                serde_json::json!({ "org": org, "number": number, "cursor": cursor }),
                quota,
            )
            .await?;
        Ok(data.organization.and_then(|o| o.project_v2))
    }
}

fn list_query(page: usize, per_page: usize) -> Vec<(&'static str, String)> {
    vec![
        ("per_page", per_page.clamp(1, MAX_PER_PAGE).to_string()),
        ("page", page.max(1).to_string()),
    ]
}

fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str, path: &str) -> GitHubError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 => GitHubError::Unauthorized(message),
        404 => GitHubError::NotFound(path.to_string()),
        429 => GitHubError::RateLimited,
        403 => {
            let remaining = headers
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if remaining == Some(0)
                || headers.contains_key("retry-after")
                || message.to_ascii_lowercase().contains("secondary rate limit")
            {
                GitHubError::RateLimited
            } else {
                GitHubError::Forbidden(message)
            }
        }
        code => GitHubError::Api { code, message },
    }
}

/// Equal jitter backoff: base/2 + rand(0, base/2).
fn jittered_backoff(initial: Duration, attempt: u32) -> Duration {
    let base = initial.as_millis() as u64 * 2u64.pow(attempt);
    let half = base / 2;
    Duration::from_millis(half + fastrand::u64(..half.max(1)))
}

fn resolve_token() -> Option<String> {
    ["GITHUB_TOKEN", "GH_TOKEN"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
        .or_else(|| {
            std::process::Command::new("gh")
                .args(["auth", "token"])
                .output()
                .ok()
                .filter(|o| {
                    if !o.status.success() {
                        debug!(
                            stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                            "gh auth token failed"
                        );
                    }
                    o.status.success()
                })
                .and_then(|o| {
                    let token = String::from_utf8_lossy(&o.stdout).trim().to_string();
                    if token.is_empty() { None } else { Some(token) }
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        for attempt in 0..3 {
            let d = jittered_backoff(Duration::from_millis(1000), attempt).as_millis() as u64;
            let base = 1000 * 2u64.pow(attempt);
            assert!(d >= base / 2 && d < base, "attempt {attempt}: {d}ms");
        }
    }

    #[test]
    fn list_query_clamps_page_size() {
        let q = list_query(0, 500);
        assert_eq!(q[0], ("per_page", "100".to_string()));
        assert_eq!(q[1], ("page", "1".to_string()));
    }

    #[test]
    fn secondary_rate_limit_403_is_rate_limited() {
        let err = classify_status(
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            r#"{"message":"You have exceeded a secondary rate limit."}"#,
            "/x",
        );
        assert!(matches!(err, GitHubError::RateLimited));
    }

    #[test]
    fn auth_errors_are_not_retriable() {
        assert!(!GitHubError::Unauthorized("bad".into()).is_retriable());
        assert!(GitHubError::Unauthorized("bad".into()).is_auth());
        assert!(GitHubError::Api { code: 502, message: String::new() }.is_retriable());
        assert!(!GitHubError::NotFound("/x".into()).is_retriable());
    }
}
