use std::collections::BTreeMap;

use serde::Serialize;

use super::Signals;
use super::repository::RepositoryMetrics;
use super::stats::{mean, median, ratio, round2};
use crate::aggregate::RawData;
use crate::model::PullRequestState;

/// How many repositories `most_active_repositories` lists.
pub const MOST_ACTIVE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRepository {
    pub repository: String,
    pub activity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummaryMetrics {
    pub total_repositories: usize,
    pub total_stars: u64,
    pub total_forks: u64,
    pub total_contributors: usize,
    pub total_issues: usize,
    pub total_pull_requests: usize,
    pub total_commits: usize,
    pub total_comments: usize,
    pub total_reviews: usize,
    /// Mean of `closed_at - created_at` over closed issues; open issues are excluded.
    pub avg_issue_resolution_days: Option<f64>,
    pub median_issue_resolution_days: Option<f64>,
    pub avg_pr_merge_days: Option<f64>,
    pub median_pr_merge_days: Option<f64>,
    pub issue_response_rate: Option<f64>,
    /// Share of pull requests with at least one collected review.
    pub pr_review_coverage: Option<f64>,
    pub pr_merge_rate: Option<f64>,
    pub most_active_repositories: Vec<ActiveRepository>,
}

pub(super) fn compute(
    raw: &RawData,
    contributors: usize,
    repositories: &BTreeMap<String, RepositoryMetrics>,
    signals: &Signals,
) -> ProjectSummaryMetrics {
    let resolution: Vec<f64> = raw.issues.iter().filter_map(|i| i.resolution_days()).collect();
    let merge: Vec<f64> = raw.pull_requests.iter().filter_map(|p| p.merge_days()).collect();
    let responded = raw.issues.iter().filter(|i| signals.responded(i)).count();
    let reviewed = raw.pull_requests.iter().filter(|p| signals.reviewed(p)).count();
    let merged = raw
        .pull_requests
        .iter()
        .filter(|p| p.state == PullRequestState::Merged)
        .count();

    let mut most_active: Vec<ActiveRepository> = repositories
        .iter()
        .map(|(name, m)| ActiveRepository {
            repository: name.clone(),
            activity_score: m.activity_score,
        })
        .collect();
    most_active.sort_by(|a, b| {
        b.activity_score
            .total_cmp(&a.activity_score)
            .then_with(|| a.repository.cmp(&b.repository))
    });
    most_active.truncate(MOST_ACTIVE_LIMIT);

    ProjectSummaryMetrics {
        total_repositories: raw.repositories.len(),
        total_stars: raw.repositories.iter().map(|r| r.stars).sum(),
        total_forks: raw.repositories.iter().map(|r| r.forks).sum(),
        total_contributors: contributors,
        total_issues: raw.issues.len(),
        total_pull_requests: raw.pull_requests.len(),
        total_commits: raw.commits.len(),
        total_comments: raw.comments.len(),
        total_reviews: raw.reviews.len(),
        avg_issue_resolution_days: mean(&resolution).map(round2),
        median_issue_resolution_days: median(&resolution).map(round2),
        avg_pr_merge_days: mean(&merge).map(round2),
        median_pr_merge_days: median(&merge).map(round2),
        issue_response_rate: ratio(responded, raw.issues.len()).map(round2),
        pr_review_coverage: ratio(reviewed, raw.pull_requests.len()).map(round2),
        pr_merge_rate: ratio(merged, raw.pull_requests.len()).map(round2),
        most_active_repositories: most_active,
    }
}
