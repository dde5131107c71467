//! Deterministic statistics over aggregated data.
//!
//! Nothing here reads the clock: "now" is the `reference_time` argument, which
//! the run records in its metadata. Every ratio or average with an empty
//! denominator is `None` (`null` in JSON).

mod contributor;
mod repository;
mod stats;
mod summary;
mod timeline;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use contributor::ContributorMetrics;
pub use repository::RepositoryMetrics;
pub use summary::ProjectSummaryMetrics;
pub use timeline::TimelineMetrics;

use crate::aggregate::{Indexes, Positions, RawData};
use crate::collect::options::TimeWindow;
use crate::model::{IssueRecord, PullRequestRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    /// Keyed by repository full name.
    pub repositories: BTreeMap<String, RepositoryMetrics>,
    /// Most active first.
    pub contributors: Vec<ContributorMetrics>,
    pub summary: ProjectSummaryMetrics,
    pub timeline: TimelineMetrics,
}

/// Which issues got a comment and which pull requests got a review.
pub(crate) struct Signals {
    commented: HashSet<String>,
    reviewed: HashSet<String>,
}

impl Signals {
    fn new(raw: &RawData) -> Self {
        Self {
            commented: raw.comments.iter().map(|c| c.parent.clone()).collect(),
            reviewed: raw.reviews.iter().map(|r| r.parent.clone()).collect(),
        }
    }

    /// A collected comment, or a positive comment count from the API.
    fn responded(&self, issue: &IssueRecord) -> bool {
        issue.comments > 0 || self.commented.contains(&issue.key())
    }

    fn reviewed(&self, pull: &PullRequestRecord) -> bool {
        self.reviewed.contains(&pull.key())
    }
}

pub fn compute(raw: &RawData, indexes: &Indexes, window: &TimeWindow, reference_time: DateTime<Utc>) -> Metrics {
    let signals = Signals::new(raw);
    let empty = Positions::default();

    let repositories: BTreeMap<String, RepositoryMetrics> = raw
        .repositories
        .iter()
        .map(|repo| {
            let positions = indexes.by_repository.get(&repo.full_name).unwrap_or(&empty);
            let metrics = repository::compute(repo, positions, raw, &signals, reference_time);
            (repo.full_name.clone(), metrics)
        })
        .collect();

    let contributors = contributor::compute(&indexes.by_author, raw);
    let summary = summary::compute(raw, contributors.len(), &repositories, &signals);
    let timeline = timeline::compute(raw, window, reference_time);

    Metrics {
        repositories,
        contributors,
        summary,
        timeline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::collect::fetcher::RepoCollection;
    use crate::model::fixtures::{comment, commit, issue, pull, repo, review, ts};

    fn two_repositories() -> RawData {
        let mut a = RepoCollection::new(repo("org/a"));
        a.issues = vec![
            issue("org/a", 1, "alice", "2024-01-01", Some("2024-01-05")),
            issue("org/a", 2, "bob", "2024-01-02", None),
            issue("org/a", 3, "carol", "2024-01-03", None),
        ];
        let b = RepoCollection::new(repo("org/b"));
        aggregate(vec![a, b]).raw
    }

    fn window() -> TimeWindow {
        TimeWindow {
            since: Some(ts("2024-01-01")),
            until: None,
        }
    }

    #[test]
    fn two_repository_scenario() {
        let raw = two_repositories();
        let metrics = compute(&raw, &Indexes::build(&raw), &window(), ts("2024-01-31"));

        assert_eq!(metrics.summary.total_issues, 3);
        assert_eq!(metrics.summary.avg_issue_resolution_days, Some(4.0));
        assert_eq!(metrics.summary.total_repositories, 2);
        let b = &metrics.repositories["org/b"];
        assert_eq!(b.health_score, None);
        assert_eq!(b.issue_response_rate, None);
        assert_eq!(b.issue_resolution.avg_days, None);
        assert_eq!(metrics.repositories["org/a"].issues.closed, 1);
    }

    #[test]
    fn empty_repository_serializes_without_nan() {
        let raw = two_repositories();
        let metrics = compute(&raw, &Indexes::build(&raw), &window(), ts("2024-01-31"));
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(!json.contains("NaN") && !json.contains("inf"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["repositories"]["org/b"]["health_score"].is_null());
        assert!(value["summary"]["pr_merge_rate"].is_null());
    }

    #[test]
    fn recomputation_is_identical() {
        let mut a = RepoCollection::new(repo("org/a"));
        a.issues = vec![issue("org/a", 1, "alice", "2024-01-01", Some("2024-01-03"))];
        a.pull_requests = vec![
            pull("org/a", 2, "bob", "2024-01-02", Some("2024-01-04")),
            pull("org/a", 3, "alice", "2024-01-05", None),
        ];
        a.commits = vec![commit("org/a", "c1", "bob", "2024-01-06")];
        a.comments = vec![comment("org/a", 4, 1, "carol", "2024-01-02")];
        a.reviews = vec![review("org/a", 5, 2, "carol", "2024-01-03")];
        let agg = aggregate(vec![a, RepoCollection::new(repo("org/b"))]);

        let first = compute(&agg.raw, &agg.indexes, &window(), ts("2024-02-01"));
        let second = compute(&agg.raw, &agg.indexes, &window(), ts("2024-02-01"));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let a = &first.repositories["org/a"];
        assert_eq!(a.contributors, 3);
        assert_eq!(a.activity_score, 1.0 + 2.0 + 6.0);
        assert_eq!(a.issue_response_rate, Some(1.0));
        assert_eq!(a.pr_merge_rate, Some(0.5));
        assert_eq!(a.health_score, Some(75));
        assert_eq!(first.summary.pr_review_coverage, Some(0.5));
        assert_eq!(first.summary.most_active_repositories[0].repository, "org/a");
        assert_eq!(first.contributors.len(), 3);
    }
}
