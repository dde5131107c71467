//! Normalized entity records stored in the result's `raw` section.
//!
//! Every field the metrics depend on is explicit. Remaining API fields travel
//! in `extra`, minus hypermedia links, so new GitHub fields need no schema change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::types::{
    CommentInfo, CommitInfo, Extra, IssueInfo, PullInfo, RepoInfo, ReviewInfo, UserInfo,
};
use crate::github::{issue_number_from_url, parent_key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub visibility: Option<String>,
    pub default_branch: Option<String>,
    pub html_url: String,
    pub fork: bool,
    pub archived: bool,
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub open_issues: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub author: Option<String>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    /// Comment count reported by the API, independent of collected comments.
    pub comments: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub html_url: String,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub state: PullRequestState,
    pub draft: bool,
    pub author: Option<String>,
    pub assignees: Vec<String>,
    pub requested_reviewers: Vec<String>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    pub html_url: String,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub repository: String,
    /// GitHub login when the commit is linked to an account, else the git author name.
    pub author: Option<String>,
    pub author_name: Option<String>,
    pub date: DateTime<Utc>,
    pub headline: String,
    pub message: String,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: u64,
    pub repository: String,
    /// `owner/name#number` of the issue or pull request commented on.
    pub parent: String,
    pub parent_number: u64,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body_length: usize,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: u64,
    pub repository: String,
    pub parent: String,
    pub parent_number: u64,
    pub author: Option<String>,
    pub state: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

fn login(user: Option<UserInfo>) -> Option<String> {
    user.map(|u| u.login)
}

fn logins(users: Vec<UserInfo>) -> Vec<String> {
    users.into_iter().map(|u| u.login).collect()
}

/// Drop hypermedia links (`*_url`, `url`, `node_id`) and nested link-only
/// objects; they are navigational and would dominate the output size.
fn slim(mut extra: Extra) -> Extra {
    extra.retain(|key, _| key != "url" && key != "node_id" && !key.ends_with("_url"));
    extra.remove("_links");
    extra
}

impl RepositoryRecord {
    pub fn from_api(info: RepoInfo) -> Self {
        Self {
            owner: info.owner.login,
            name: info.name,
            full_name: info.full_name,
            description: info.description,
            language: info.language,
            topics: info.topics.unwrap_or_default(),
            visibility: info.visibility,
            default_branch: info.default_branch,
            html_url: info.html_url,
            fork: info.fork,
            archived: info.archived,
            stars: info.stargazers_count,
            forks: info.forks_count,
            // `watchers_count` mirrors stars; subscribers are the actual watchers.
            watchers: info.subscribers_count.unwrap_or(info.watchers_count),
            open_issues: info.open_issues_count,
            created_at: info.created_at,
            updated_at: info.updated_at,
            pushed_at: info.pushed_at,
            extra: slim(info.extra),
        }
    }
}

impl IssueRecord {
    pub fn from_api(repository: &str, info: IssueInfo) -> Self {
        let state = if info.state == "closed" {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        Self {
            repository: repository.to_string(),
            number: info.number,
            title: info.title,
            state,
            author: login(info.user),
            assignees: logins(info.assignees),
            labels: info.labels.into_iter().map(|l| l.name).collect(),
            comments: info.comments,
            created_at: info.created_at,
            updated_at: info.updated_at,
            closed_at: info.closed_at,
            html_url: info.html_url,
            extra: slim(info.extra),
        }
    }

    pub fn key(&self) -> String {
        parent_key(&self.repository, self.number)
    }

    /// Days from creation to close, when the issue has been closed.
    pub fn resolution_days(&self) -> Option<f64> {
        self.closed_at.map(|closed| days_between(self.created_at, closed))
    }
}

impl PullRequestRecord {
    pub fn from_api(repository: &str, info: PullInfo) -> Self {
        let state = if info.merged_at.is_some() {
            PullRequestState::Merged
        } else if info.state == "closed" {
            PullRequestState::Closed
        } else {
            PullRequestState::Open
        };
        Self {
            repository: repository.to_string(),
            number: info.number,
            title: info.title,
            state,
            draft: info.draft.unwrap_or(false),
            author: login(info.user),
            assignees: logins(info.assignees),
            requested_reviewers: logins(info.requested_reviewers),
            labels: info.labels.into_iter().map(|l| l.name).collect(),
            created_at: info.created_at,
            updated_at: info.updated_at,
            closed_at: info.closed_at,
            merged_at: info.merged_at,
            additions: info.additions,
            deletions: info.deletions,
            changed_files: info.changed_files,
            html_url: info.html_url,
            extra: slim(info.extra),
        }
    }

    pub fn key(&self) -> String {
        parent_key(&self.repository, self.number)
    }

    pub fn merge_days(&self) -> Option<f64> {
        self.merged_at.map(|merged| days_between(self.created_at, merged))
    }
}

impl CommitRecord {
    /// `None` when the commit carries no author date.
    pub fn from_api(repository: &str, info: CommitInfo) -> Option<Self> {
        let git_author = info.commit.author;
        let date = git_author.as_ref().and_then(|a| a.date)?;
        let author_name = git_author.and_then(|a| a.name);
        let author = login(info.author).or_else(|| author_name.clone());
        let headline = info.commit.message.lines().next().unwrap_or_default().to_string();
        Some(Self {
            sha: info.sha,
            repository: repository.to_string(),
            author,
            author_name,
            date,
            headline,
            message: info.commit.message,
            additions: info.stats.as_ref().and_then(|s| s.additions),
            deletions: info.stats.as_ref().and_then(|s| s.deletions),
            extra: slim(info.extra),
        })
    }
}

impl CommentRecord {
    /// `None` when the parent issue cannot be derived from `issue_url`.
    pub fn from_api(repository: &str, info: CommentInfo) -> Option<Self> {
        let parent_number = issue_number_from_url(&info.issue_url)?;
        let mut extra = slim(info.extra);
        extra.remove("body");
        Some(Self {
            id: info.id,
            repository: repository.to_string(),
            parent: parent_key(repository, parent_number),
            parent_number,
            author: login(info.user),
            created_at: info.created_at,
            updated_at: info.updated_at,
            body_length: info.body.map_or(0, |b| b.chars().count()),
            extra,
        })
    }
}

impl ReviewRecord {
    /// `None` for pending reviews, which have not been submitted.
    pub fn from_api(repository: &str, parent_number: u64, info: ReviewInfo) -> Option<Self> {
        let submitted_at = info.submitted_at?;
        let mut extra = slim(info.extra);
        extra.remove("body");
        Some(Self {
            id: info.id,
            repository: repository.to_string(),
            parent: parent_key(repository, parent_number),
            parent_number,
            author: login(info.user),
            state: info.state,
            submitted_at,
            extra,
        })
    }
}

/// Fractional days between two instants.
pub fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 86_400.0
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{CommitDetail, GitActor};

    #[test]
    fn pull_with_merge_time_is_merged_even_if_state_closed() {
        let info: PullInfo = serde_json::from_value(serde_json::json!({
            "number": 3,
            "title": "Add feature",
            "state": "closed",
            "html_url": "https://github.com/acme/widgets/pull/3",
            "user": {"login": "alice"},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-03T00:00:00Z",
            "closed_at": "2024-01-03T00:00:00Z",
            "merged_at": "2024-01-03T00:00:00Z",
            "statuses_url": "https://api.github.com/x",
            "merge_commit_sha": "abc"
        }))
        .unwrap();

        let record = PullRequestRecord::from_api("acme/widgets", info);
        assert_eq!(record.state, PullRequestState::Merged);
        assert_eq!(record.merge_days(), Some(2.0));
        assert!(!record.extra.contains_key("statuses_url"));
        assert_eq!(record.extra["merge_commit_sha"], "abc");
    }

    #[test]
    fn commit_author_falls_back_to_git_name() {
        let info = CommitInfo {
            sha: "abc123".into(),
            commit: CommitDetail {
                message: "Fix parser\n\nLonger body".into(),
                author: Some(GitActor {
                    name: Some("Jane Doe".into()),
                    date: Some(fixtures::ts("2024-01-02")),
                }),
            },
            author: None,
            stats: None,
            extra: Extra::new(),
        };

        let record = CommitRecord::from_api("acme/widgets", info).unwrap();
        assert_eq!(record.author.as_deref(), Some("Jane Doe"));
        assert_eq!(record.headline, "Fix parser");
    }

    #[test]
    fn comment_parent_comes_from_issue_url() {
        let info: CommentInfo = serde_json::from_value(serde_json::json!({
            "id": 99,
            "issue_url": "https://api.github.com/repos/acme/widgets/issues/12",
            "user": {"login": "carol"},
            "body": "looks good",
            "created_at": "2024-01-02T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        }))
        .unwrap();

        let record = CommentRecord::from_api("acme/widgets", info).unwrap();
        assert_eq!(record.parent, "acme/widgets#12");
        assert_eq!(record.body_length, 10);
        assert!(record.extra.is_empty());
    }

    #[test]
    fn issue_resolution_days_requires_close() {
        let open = fixtures::issue("org/a", 1, "alice", "2024-01-01", None);
        let closed = fixtures::issue("org/a", 2, "alice", "2024-01-01", Some("2024-01-05"));
        assert_eq!(open.resolution_days(), None);
        assert_eq!(closed.resolution_days(), Some(4.0));
    }
}
