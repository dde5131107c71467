use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::options::{CollectionOptions, EntityKind};
use crate::github::quota::QuotaTracker;
use crate::github::{GitHubClient, GitHubError, MAX_PER_PAGE};
use crate::model::{
    CommentRecord, CommitRecord, IssueRecord, PullRequestRecord, RepositoryRecord, ReviewRecord,
};

/// A kind that failed for one repository after retries. The kind contributes
/// zero items; the other kinds of that repository are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityError {
    pub repository: String,
    pub kind: EntityKind,
    pub message: String,
}

/// Everything fetched for one repository.
#[derive(Debug, Clone)]
pub struct RepoCollection {
    pub repository: RepositoryRecord,
    pub issues: Vec<IssueRecord>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub commits: Vec<CommitRecord>,
    pub comments: Vec<CommentRecord>,
    pub reviews: Vec<ReviewRecord>,
    pub errors: Vec<EntityError>,
}

impl RepoCollection {
    pub fn new(repository: RepositoryRecord) -> Self {
        Self {
            repository,
            issues: Vec::new(),
            pull_requests: Vec::new(),
            commits: Vec::new(),
            comments: Vec::new(),
            reviews: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum RepoOutcome {
    Collected(RepoCollection),
    /// Filtered out by the fork/archive options after reading metadata.
    Excluded(&'static str),
    /// Repository metadata could not be read; nothing else was fetched.
    Failed(GitHubError),
}

enum Step<R> {
    Keep(R),
    Skip,
    /// Everything after this item is outside the window.
    Stop,
}

/// Fetch pages until a partial page, the cap, or a `Stop` from `step`.
///
/// The page size is fixed for the whole walk so page numbers stay aligned;
/// it never exceeds the cap, so no page beyond the cap is requested.
async fn paginate<T, R, F, Fut>(
    cap: usize,
    mut fetch: F,
    mut step: impl FnMut(T) -> Step<R>,
) -> Result<Vec<R>, GitHubError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, GitHubError>>,
{
    let mut kept = Vec::new();
    if cap == 0 {
        return Ok(kept);
    }
    let per_page = cap.min(MAX_PER_PAGE);
    let mut page = 1;
    loop {
        let items = fetch(page, per_page).await?;
        let full = items.len() == per_page;
        for item in items {
            match step(item) {
                Step::Keep(r) => {
                    kept.push(r);
                    if kept.len() >= cap {
                        return Ok(kept);
                    }
                }
                Step::Skip => {}
                Step::Stop => return Ok(kept),
            }
        }
        if !full {
            return Ok(kept);
        }
        page += 1;
    }
}

/// Retrieves the enabled entity kinds of one repository.
pub struct Fetcher<'a> {
    client: &'a GitHubClient,
    options: &'a CollectionOptions,
    quota: &'a QuotaTracker,
}

impl<'a> Fetcher<'a> {
    pub fn new(client: &'a GitHubClient, options: &'a CollectionOptions, quota: &'a QuotaTracker) -> Self {
        Self {
            client,
            options,
            quota,
        }
    }

    pub async fn fetch_repository(&self, owner: &str, name: &str) -> RepoOutcome {
        let info = match self.client.get_repo(owner, name, self.quota).await {
            Ok(info) => info,
            Err(e) => {
                warn!(repo = %format!("{owner}/{name}"), %e, "failed to fetch repository metadata");
                return RepoOutcome::Failed(e);
            }
        };
        if self.options.exclude_forks && info.fork {
            return RepoOutcome::Excluded("fork");
        }
        if self.options.exclude_archived && info.archived {
            return RepoOutcome::Excluded("archived");
        }

        let mut collection = RepoCollection::new(RepositoryRecord::from_api(info));
        let full_name = collection.repository.full_name.clone();

        let (issues, pulls_and_reviews, commits, comments) = tokio::join!(
            self.optional(EntityKind::Issues, self.fetch_issues(owner, name, &full_name)),
            self.fetch_pulls_and_reviews(owner, name, &full_name),
            self.optional(EntityKind::Commits, self.fetch_commits(owner, name, &full_name)),
            self.optional(EntityKind::Comments, self.fetch_comments(owner, name, &full_name)),
        );
        let (pulls, reviews, detail_error) = pulls_and_reviews;

        collection.issues = self.settle(EntityKind::Issues, &full_name, issues, &mut collection.errors);
        collection.pull_requests =
            self.settle(EntityKind::PullRequests, &full_name, pulls, &mut collection.errors);
        collection.commits = self.settle(EntityKind::Commits, &full_name, commits, &mut collection.errors);
        collection.comments = self.settle(EntityKind::Comments, &full_name, comments, &mut collection.errors);
        collection.reviews = self.settle(EntityKind::Reviews, &full_name, reviews, &mut collection.errors);
        if let Some(e) = detail_error {
            collection.errors.push(EntityError {
                repository: full_name.clone(),
                kind: EntityKind::PullRequests,
                message: format!("pull request details: {e}"),
            });
        }

        info!(
            repo = %full_name,
            issues = collection.issues.len(),
            pull_requests = collection.pull_requests.len(),
            commits = collection.commits.len(),
            comments = collection.comments.len(),
            reviews = collection.reviews.len(),
            errors = collection.errors.len(),
            "repository collected"
        );
        RepoOutcome::Collected(collection)
    }

    /// Run `fut` only when `kind` is enabled.
    async fn optional<R>(
        &self,
        kind: EntityKind,
        fut: impl Future<Output = Result<Vec<R>, GitHubError>>,
    ) -> Result<Vec<R>, GitHubError> {
        if self.options.wants(kind) {
            fut.await
        } else {
            Ok(Vec::new())
        }
    }

    fn settle<R>(
        &self,
        kind: EntityKind,
        repository: &str,
        result: Result<Vec<R>, GitHubError>,
        errors: &mut Vec<EntityError>,
    ) -> Vec<R> {
        match result {
            Ok(items) => items,
            Err(e) => {
                warn!(repo = %repository, %kind, %e, "failed to fetch entity kind");
                errors.push(EntityError {
                    repository: repository.to_string(),
                    kind,
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    async fn fetch_issues(&self, owner: &str, name: &str, full_name: &str) -> Result<Vec<IssueRecord>, GitHubError> {
        let window = self.options.window;
        paginate(
            self.options.cap(EntityKind::Issues),
            |page, per_page| {
                self.client
                    .list_issues(owner, name, window.since.as_ref(), page, per_page, self.quota)
            },
            |info| {
                if info.pull_request.is_some() {
                    Step::Skip
                } else if window.is_before(&info.updated_at) {
                    Step::Stop
                } else if window.contains(&info.updated_at) {
                    Step::Keep(IssueRecord::from_api(full_name, info))
                } else {
                    Step::Skip
                }
            },
        )
        .await
    }

    async fn fetch_pulls(&self, owner: &str, name: &str, full_name: &str) -> Result<Vec<PullRequestRecord>, GitHubError> {
        let window = self.options.window;
        paginate(
            self.options.cap(EntityKind::PullRequests),
            |page, per_page| self.client.list_pulls(owner, name, page, per_page, self.quota),
            |info| {
                if window.is_before(&info.updated_at) {
                    Step::Stop
                } else if window.contains(&info.updated_at) {
                    Step::Keep(PullRequestRecord::from_api(full_name, info))
                } else {
                    Step::Skip
                }
            },
        )
        .await
    }

    /// Pull requests, then reviews of the collected pull requests, then optional
    /// size details. Returns `(pulls, reviews, detail error)`.
    async fn fetch_pulls_and_reviews(
        &self,
        owner: &str,
        name: &str,
        full_name: &str,
    ) -> (
        Result<Vec<PullRequestRecord>, GitHubError>,
        Result<Vec<ReviewRecord>, GitHubError>,
        Option<GitHubError>,
    ) {
        let wants_pulls = self.options.wants(EntityKind::PullRequests);
        let wants_reviews = self.options.wants(EntityKind::Reviews);
        if !wants_pulls {
            return (Ok(Vec::new()), Ok(Vec::new()), None);
        }
        let mut pulls = match self.fetch_pulls(owner, name, full_name).await {
            Ok(pulls) => pulls,
            Err(e) => return (Err(e), Ok(Vec::new()), None),
        };

        let detail_error = if self.options.include_pr_details {
            self.fill_pull_details(owner, name, &mut pulls).await.err()
        } else {
            None
        };

        let reviews = if wants_reviews {
            self.fetch_reviews(owner, name, full_name, &pulls).await
        } else {
            Ok(Vec::new())
        };
        (Ok(pulls), reviews, detail_error)
    }

    async fn fill_pull_details(
        &self,
        owner: &str,
        name: &str,
        pulls: &mut [PullRequestRecord],
    ) -> Result<(), GitHubError> {
        for pull in pulls.iter_mut() {
            let detail = self.client.get_pull(owner, name, pull.number, self.quota).await?;
            pull.additions = detail.additions;
            pull.deletions = detail.deletions;
            pull.changed_files = detail.changed_files;
        }
        debug!(owner, name, count = pulls.len(), "pull request details filled");
        Ok(())
    }

    /// Reviews share one cap across all pull requests of the repository.
    async fn fetch_reviews(
        &self,
        owner: &str,
        name: &str,
        full_name: &str,
        pulls: &[PullRequestRecord],
    ) -> Result<Vec<ReviewRecord>, GitHubError> {
        let window = self.options.window;
        let cap = self.options.cap(EntityKind::Reviews);
        let mut reviews = Vec::new();
        for pull in pulls {
            let remaining = cap.saturating_sub(reviews.len());
            if remaining == 0 {
                break;
            }
            let number = pull.number;
            let batch = paginate(
                remaining,
                |page, per_page| {
                    self.client
                        .list_reviews(owner, name, number, page, per_page, self.quota)
                },
                |info| match ReviewRecord::from_api(full_name, number, info) {
                    Some(review) if window.contains(&review.submitted_at) => Step::Keep(review),
                    _ => Step::Skip,
                },
            )
            .await?;
            reviews.extend(batch);
        }
        Ok(reviews)
    }

    async fn fetch_commits(&self, owner: &str, name: &str, full_name: &str) -> Result<Vec<CommitRecord>, GitHubError> {
        let window = self.options.window;
        paginate(
            self.options.cap(EntityKind::Commits),
            |page, per_page| {
                self.client.list_commits(
                    owner,
                    name,
                    window.since.as_ref(),
                    window.until.as_ref(),
                    page,
                    per_page,
                    self.quota,
                )
            },
            |info| match CommitRecord::from_api(full_name, info) {
                Some(commit) if window.contains(&commit.date) => Step::Keep(commit),
                _ => Step::Skip,
            },
        )
        .await
    }

    async fn fetch_comments(&self, owner: &str, name: &str, full_name: &str) -> Result<Vec<CommentRecord>, GitHubError> {
        let window = self.options.window;
        paginate(
            self.options.cap(EntityKind::Comments),
            |page, per_page| {
                self.client
                    .list_issue_comments(owner, name, window.since.as_ref(), page, per_page, self.quota)
            },
            |info| {
                if window.is_before(&info.created_at) {
                    return Step::Stop;
                }
                match CommentRecord::from_api(full_name, info) {
                    Some(comment) if window.contains(&comment.created_at) => Step::Keep(comment),
                    _ => Step::Skip,
                }
            },
        )
        .await
    }
}
