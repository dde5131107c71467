use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::timeline::month_key;
use crate::aggregate::{Positions, RawData};
use crate::model::PullRequestState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorMetrics {
    pub login: String,
    pub total: usize,
    pub issues: usize,
    pub pull_requests: usize,
    pub merged_pull_requests: usize,
    pub commits: usize,
    pub comments: usize,
    pub reviews: usize,
    pub repositories: BTreeSet<String>,
    pub first_contribution: Option<DateTime<Utc>>,
    pub last_contribution: Option<DateTime<Utc>>,
    /// `YYYY-MM` to number of contributions that month.
    pub monthly: BTreeMap<String, usize>,
}

/// One entry per author in `by_author`, most active first, ties broken by login.
pub(super) fn compute(by_author: &BTreeMap<String, Positions>, raw: &RawData) -> Vec<ContributorMetrics> {
    let mut contributors: Vec<_> = by_author
        .iter()
        .map(|(login, positions)| contributor(login, positions, raw))
        .collect();
    contributors.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.login.cmp(&b.login)));
    contributors
}

fn contributor(login: &str, positions: &Positions, raw: &RawData) -> ContributorMetrics {
    let mut repositories = BTreeSet::new();
    let mut stamps: Vec<DateTime<Utc>> = Vec::new();
    let mut merged = 0;

    for &i in &positions.issues {
        let issue = &raw.issues[i];
        repositories.insert(issue.repository.clone());
        stamps.push(issue.created_at);
    }
    for &i in &positions.pull_requests {
        let pull = &raw.pull_requests[i];
        repositories.insert(pull.repository.clone());
        stamps.push(pull.created_at);
        if pull.state == PullRequestState::Merged {
            merged += 1;
        }
    }
    for &i in &positions.commits {
        let commit = &raw.commits[i];
        repositories.insert(commit.repository.clone());
        stamps.push(commit.date);
    }
    for &i in &positions.comments {
        let comment = &raw.comments[i];
        repositories.insert(comment.repository.clone());
        stamps.push(comment.created_at);
    }
    for &i in &positions.reviews {
        let review = &raw.reviews[i];
        repositories.insert(review.repository.clone());
        stamps.push(review.submitted_at);
    }

    let mut monthly = BTreeMap::new();
    for ts in &stamps {
        *monthly.entry(month_key(ts)).or_insert(0) += 1;
    }

    ContributorMetrics {
        login: login.to_string(),
        total: stamps.len(),
        issues: positions.issues.len(),
        pull_requests: positions.pull_requests.len(),
        merged_pull_requests: merged,
        commits: positions.commits.len(),
        comments: positions.comments.len(),
        reviews: positions.reviews.len(),
        repositories,
        first_contribution: stamps.iter().min().copied(),
        last_contribution: stamps.iter().max().copied(),
        monthly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Indexes;
    use crate::model::fixtures::{comment, commit, issue, pull, ts};

    #[test]
    fn contributions_are_counted_per_kind_and_month() {
        let raw = RawData {
            issues: vec![issue("org/a", 1, "alice", "2024-01-10", None)],
            pull_requests: vec![pull("org/b", 2, "alice", "2024-02-01", Some("2024-02-03"))],
            commits: vec![
                commit("org/a", "c1", "alice", "2024-02-05"),
                commit("org/a", "c2", "bob", "2024-02-06"),
            ],
            comments: vec![comment("org/a", 9, 1, "bob", "2024-01-11")],
            ..RawData::default()
        };
        let idx = Indexes::build(&raw);
        let contributors = compute(&idx.by_author, &raw);

        let alice = &contributors[0];
        assert_eq!(alice.login, "alice");
        assert_eq!(alice.total, 3);
        assert_eq!(alice.merged_pull_requests, 1);
        assert_eq!(alice.repositories.iter().collect::<Vec<_>>(), vec!["org/a", "org/b"]);
        assert_eq!(alice.first_contribution, Some(ts("2024-01-10")));
        assert_eq!(alice.last_contribution, Some(ts("2024-02-05")));
        assert_eq!(alice.monthly.get("2024-01"), Some(&1));
        assert_eq!(alice.monthly.get("2024-02"), Some(&2));
    }

    #[test]
    fn ties_are_ordered_by_login() {
        let raw = RawData {
            commits: vec![
                commit("org/a", "c1", "zed", "2024-01-01"),
                commit("org/a", "c2", "amy", "2024-01-02"),
            ],
            ..RawData::default()
        };
        let idx = Indexes::build(&raw);
        let logins: Vec<_> = compute(&idx.by_author, &raw).into_iter().map(|c| c.login).collect();
        assert_eq!(logins, vec!["amy", "zed"]);
    }
}
