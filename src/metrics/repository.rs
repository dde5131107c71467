use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Signals;
use super::stats::{DurationStats, ratio, round2};
use crate::aggregate::{Positions, RawData};
use crate::model::{IssueState, PullRequestState, RepositoryRecord, days_between};

/// Activity score weights.
pub const COMMIT_WEIGHT: f64 = 1.0;
pub const ISSUE_WEIGHT: f64 = 2.0;
pub const PULL_REQUEST_WEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueCounts {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PullRequestCounts {
    pub total: usize,
    pub open: usize,
    pub merged: usize,
    pub closed_unmerged: usize,
    pub draft: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryMetrics {
    pub stars: u64,
    pub forks: u64,
    pub issues: IssueCounts,
    pub pull_requests: PullRequestCounts,
    pub commits: usize,
    pub comments: usize,
    pub reviews: usize,
    /// Distinct authors across every collected kind.
    pub contributors: usize,
    pub activity_score: f64,
    /// Share of issues with at least one comment.
    pub issue_response_rate: Option<f64>,
    /// Share of pull requests that were merged.
    pub pr_merge_rate: Option<f64>,
    /// 0..=100, equal parts response rate and merge rate. `None` when either part is.
    pub health_score: Option<u8>,
    pub issue_resolution: DurationStats,
    pub pr_merge: DurationStats,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub days_since_last_activity: Option<f64>,
}

pub fn activity_score(commits: usize, issues: usize, pull_requests: usize) -> f64 {
    COMMIT_WEIGHT * commits as f64 + ISSUE_WEIGHT * issues as f64 + PULL_REQUEST_WEIGHT * pull_requests as f64
}

pub fn health_score(issue_response_rate: Option<f64>, pr_merge_rate: Option<f64>) -> Option<u8> {
    let score = 100.0 * (0.5 * issue_response_rate? + 0.5 * pr_merge_rate?);
    Some(score.round().clamp(0.0, 100.0) as u8)
}

pub(super) fn compute(
    repo: &RepositoryRecord,
    positions: &Positions,
    raw: &RawData,
    signals: &Signals,
    reference_time: DateTime<Utc>,
) -> RepositoryMetrics {
    let issues: Vec<_> = positions.issues.iter().map(|&i| &raw.issues[i]).collect();
    let pulls: Vec<_> = positions.pull_requests.iter().map(|&i| &raw.pull_requests[i]).collect();
    let commits: Vec<_> = positions.commits.iter().map(|&i| &raw.commits[i]).collect();
    let comments: Vec<_> = positions.comments.iter().map(|&i| &raw.comments[i]).collect();
    let reviews: Vec<_> = positions.reviews.iter().map(|&i| &raw.reviews[i]).collect();

    let closed = issues.iter().filter(|i| i.state == IssueState::Closed).count();
    let issue_counts = IssueCounts {
        total: issues.len(),
        open: issues.len() - closed,
        closed,
    };
    let pr_counts = PullRequestCounts {
        total: pulls.len(),
        open: pulls.iter().filter(|p| p.state == PullRequestState::Open).count(),
        merged: pulls.iter().filter(|p| p.state == PullRequestState::Merged).count(),
        closed_unmerged: pulls.iter().filter(|p| p.state == PullRequestState::Closed).count(),
        draft: pulls.iter().filter(|p| p.draft).count(),
    };

    let authors: BTreeSet<&str> = issues
        .iter()
        .filter_map(|i| i.author.as_deref())
        .chain(pulls.iter().filter_map(|p| p.author.as_deref()))
        .chain(commits.iter().filter_map(|c| c.author.as_deref()))
        .chain(comments.iter().filter_map(|c| c.author.as_deref()))
        .chain(reviews.iter().filter_map(|r| r.author.as_deref()))
        .collect();

    let responded = issues.iter().filter(|i| signals.responded(i)).count();
    let issue_response_rate = ratio(responded, issues.len());
    let pr_merge_rate = ratio(pr_counts.merged, pulls.len());

    let resolution: Vec<f64> = issues.iter().filter_map(|i| i.resolution_days()).collect();
    let merge: Vec<f64> = pulls.iter().filter_map(|p| p.merge_days()).collect();

    let last_activity_at = issues
        .iter()
        .map(|i| i.updated_at)
        .chain(pulls.iter().map(|p| p.updated_at))
        .chain(commits.iter().map(|c| c.date))
        .chain(comments.iter().map(|c| c.created_at))
        .chain(reviews.iter().map(|r| r.submitted_at))
        .chain(repo.pushed_at)
        .max();

    RepositoryMetrics {
        stars: repo.stars,
        forks: repo.forks,
        commits: commits.len(),
        comments: comments.len(),
        reviews: reviews.len(),
        contributors: authors.len(),
        activity_score: activity_score(commits.len(), issues.len(), pulls.len()),
        issue_response_rate: issue_response_rate.map(round2),
        pr_merge_rate: pr_merge_rate.map(round2),
        health_score: health_score(issue_response_rate, pr_merge_rate),
        issue_resolution: DurationStats::from_days(&resolution),
        pr_merge: DurationStats::from_days(&merge),
        last_activity_at,
        days_since_last_activity: last_activity_at.map(|t| round2(days_between(t, reference_time))),
        issues: issue_counts,
        pull_requests: pr_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_score_uses_fixed_weights() {
        assert_eq!(activity_score(0, 0, 0), 0.0);
        assert_eq!(activity_score(10, 2, 1), 10.0 + 4.0 + 3.0);
    }

    #[test]
    fn health_score_is_bounded_and_needs_both_parts() {
        assert_eq!(health_score(Some(1.0), Some(1.0)), Some(100));
        assert_eq!(health_score(Some(0.0), Some(0.0)), Some(0));
        assert_eq!(health_score(Some(0.5), Some(0.25)), Some(38));
        assert_eq!(health_score(None, Some(1.0)), None);
        assert_eq!(health_score(Some(1.0), None), None);
    }
}
