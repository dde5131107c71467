use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Fields of an API object not modeled explicitly.
pub type Extra = Map<String, Value>;

/// Repository metadata from `GET /repos/{owner}/{repo}`.
#[derive(Deserialize, Debug, Clone)]
pub struct RepoInfo {
    pub name: String,
    pub full_name: String,
    pub owner: UserInfo,
    pub description: Option<String>,
    pub html_url: String,
    pub default_branch: Option<String>,
    pub language: Option<String>,
    pub visibility: Option<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    pub stargazers_count: u64,
    pub forks_count: u64,
    #[serde(default)]
    pub subscribers_count: Option<u64>,
    pub watchers_count: u64,
    pub open_issues_count: u64,
    pub topics: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<LabelInfo>,
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub assignees: Vec<UserInfo>,
    #[serde(default)]
    pub comments: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Present when the issues endpoint returns a pull request.
    pub pull_request: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LabelInfo {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PullInfo {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: String,
    pub draft: Option<bool>,
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub labels: Vec<LabelInfo>,
    #[serde(default)]
    pub assignees: Vec<UserInfo>,
    #[serde(default)]
    pub requested_reviewers: Vec<UserInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    /// Only returned by the single pull request endpoint.
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UserInfo {
    pub login: String,
}

/// An entry of `GET /repos/{owner}/{repo}/commits`.
#[derive(Deserialize, Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub commit: CommitDetail,
    /// The linked GitHub account; absent when the author email is unknown to GitHub.
    pub author: Option<UserInfo>,
    pub stats: Option<CommitStats>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CommitDetail {
    pub message: String,
    pub author: Option<GitActor>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GitActor {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CommitStats {
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

/// An entry of `GET /repos/{owner}/{repo}/issues/comments`.
#[derive(Deserialize, Debug, Clone)]
pub struct CommentInfo {
    pub id: u64,
    pub issue_url: String,
    pub user: Option<UserInfo>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// An entry of `GET /repos/{owner}/{repo}/pulls/{number}/reviews`.
#[derive(Deserialize, Debug, Clone)]
pub struct ReviewInfo {
    pub id: u64,
    pub user: Option<UserInfo>,
    pub state: String,
    /// Pending reviews have no submission time.
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Response from `GET /rate_limit`.
#[derive(Deserialize, Debug)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResources {
    pub core: RateLimitWindow,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitWindow {
    pub limit: u64,
    pub remaining: u64,
    /// Unix epoch seconds.
    pub reset: i64,
}

/// GraphQL envelope: `{"data": ..., "errors": [...]}`.
#[derive(Deserialize, Debug)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Deserialize, Debug)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct ProjectQueryData {
    pub organization: Option<ProjectOwner>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOwner {
    pub project_v2: Option<ProjectV2>,
}

#[derive(Deserialize, Debug)]
pub struct ProjectV2 {
    pub title: String,
    pub items: ProjectItems,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectItems {
    pub nodes: Vec<ProjectItem>,
    pub page_info: PageInfo,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Draft issues have no repository, so `content.repository` is optional.
#[derive(Deserialize, Debug)]
pub struct ProjectItem {
    pub content: Option<ProjectItemContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectItemContent {
    pub repository: Option<ProjectRepository>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRepository {
    pub name_with_owner: String,
}

/// An entry of `GET /orgs/{org}/repos`.
#[derive(Deserialize, Debug)]
pub struct OrgRepoEntry {
    pub full_name: String,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
}
