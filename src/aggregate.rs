//! Project-wide flat arrays and the cross-reference indexes over them.
//!
//! Pure and synchronous. Arrays keep repository enumeration order, then the
//! order the fetcher returned; nothing is re-sorted here.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collect::fetcher::{EntityError, RepoCollection};
use crate::collect::options::EntityKind;
use crate::model::{
    CommentRecord, CommitRecord, IssueRecord, PullRequestRecord, RepositoryRecord, ReviewRecord,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub repositories: Vec<RepositoryRecord>,
    pub issues: Vec<IssueRecord>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub commits: Vec<CommitRecord>,
    pub comments: Vec<CommentRecord>,
    pub reviews: Vec<ReviewRecord>,
}

impl RawData {
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Issues => self.issues.len(),
            EntityKind::PullRequests => self.pull_requests.len(),
            EntityKind::Commits => self.commits.len(),
            EntityKind::Comments => self.comments.len(),
            EntityKind::Reviews => self.reviews.len(),
        }
    }
}

/// Positions into the flat arrays of [`RawData`], grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Positions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_requests: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<usize>,
}

impl Positions {
    fn list(&self, kind: EntityKind) -> &[usize] {
        match kind {
            EntityKind::Issues => &self.issues,
            EntityKind::PullRequests => &self.pull_requests,
            EntityKind::Commits => &self.commits,
            EntityKind::Comments => &self.comments,
            EntityKind::Reviews => &self.reviews,
        }
    }

    fn list_mut(&mut self, kind: EntityKind) -> &mut Vec<usize> {
        match kind {
            EntityKind::Issues => &mut self.issues,
            EntityKind::PullRequests => &mut self.pull_requests,
            EntityKind::Commits => &mut self.commits,
            EntityKind::Comments => &mut self.comments,
            EntityKind::Reviews => &mut self.reviews,
        }
    }
}

/// Derived lookups; [`Indexes::build`] is the only way to construct them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexes {
    /// Repository full name to every entity of that repository.
    pub by_repository: BTreeMap<String, Positions>,
    /// Author login to everything they authored.
    pub by_author: BTreeMap<String, Positions>,
    /// Label name to labeled issues and pull requests.
    pub by_label: BTreeMap<String, Positions>,
    /// Parent key (`owner/name#number`) to its comments and reviews.
    pub by_parent: BTreeMap<String, Positions>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("{index}[{key}] points at {kind} #{position}, past the end of the array")]
    OutOfBounds {
        index: &'static str,
        key: String,
        kind: EntityKind,
        position: usize,
    },

    #[error("{index}[{key}] points at {kind} #{position}, which does not carry that key")]
    WrongKey {
        index: &'static str,
        key: String,
        kind: EntityKind,
        position: usize,
    },

    #[error("indexes differ from a rebuild over the same arrays")]
    Stale,
}

fn push(map: &mut BTreeMap<String, Positions>, key: &str, kind: EntityKind, position: usize) {
    map.entry(key.to_string()).or_default().list_mut(kind).push(position);
}

impl Indexes {
    pub fn build(raw: &RawData) -> Self {
        let mut idx = Self::default();
        for repo in &raw.repositories {
            idx.by_repository.entry(repo.full_name.clone()).or_default();
        }

        for (i, issue) in raw.issues.iter().enumerate() {
            push(&mut idx.by_repository, &issue.repository, EntityKind::Issues, i);
            if let Some(author) = &issue.author {
                push(&mut idx.by_author, author, EntityKind::Issues, i);
            }
            for label in &issue.labels {
                push(&mut idx.by_label, label, EntityKind::Issues, i);
            }
        }
        for (i, pull) in raw.pull_requests.iter().enumerate() {
            push(&mut idx.by_repository, &pull.repository, EntityKind::PullRequests, i);
            if let Some(author) = &pull.author {
                push(&mut idx.by_author, author, EntityKind::PullRequests, i);
            }
            for label in &pull.labels {
                push(&mut idx.by_label, label, EntityKind::PullRequests, i);
            }
        }
        for (i, commit) in raw.commits.iter().enumerate() {
            push(&mut idx.by_repository, &commit.repository, EntityKind::Commits, i);
            if let Some(author) = &commit.author {
                push(&mut idx.by_author, author, EntityKind::Commits, i);
            }
        }
        for (i, comment) in raw.comments.iter().enumerate() {
            push(&mut idx.by_repository, &comment.repository, EntityKind::Comments, i);
            if let Some(author) = &comment.author {
                push(&mut idx.by_author, author, EntityKind::Comments, i);
            }
            push(&mut idx.by_parent, &comment.parent, EntityKind::Comments, i);
        }
        for (i, review) in raw.reviews.iter().enumerate() {
            push(&mut idx.by_repository, &review.repository, EntityKind::Reviews, i);
            if let Some(author) = &review.author {
                push(&mut idx.by_author, author, EntityKind::Reviews, i);
            }
            push(&mut idx.by_parent, &review.parent, EntityKind::Reviews, i);
        }
        idx
    }

    /// Check every entry against the arrays, then against a fresh rebuild.
    pub fn verify(&self, raw: &RawData) -> Result<(), IndexError> {
        let indexes: [(&'static str, &BTreeMap<String, Positions>, Matcher); 4] = [
            ("by_repository", &self.by_repository, repository_of),
            ("by_author", &self.by_author, has_author),
            ("by_label", &self.by_label, has_label),
            ("by_parent", &self.by_parent, parent_of),
        ];
        for (index, map, carries_key) in indexes {
            for (key, positions) in map {
                for kind in EntityKind::ALL {
                    for &position in positions.list(kind) {
                        if position >= raw.count(kind) {
                            return Err(IndexError::OutOfBounds {
                                index,
                                key: key.clone(),
                                kind,
                                position,
                            });
                        }
                        if !carries_key(raw, kind, position, key) {
                            return Err(IndexError::WrongKey {
                                index,
                                key: key.clone(),
                                kind,
                                position,
                            });
                        }
                    }
                }
            }
        }
        if *self != Self::build(raw) {
            return Err(IndexError::Stale);
        }
        Ok(())
    }
}

type Matcher = fn(&RawData, EntityKind, usize, &str) -> bool;

fn repository_of(raw: &RawData, kind: EntityKind, i: usize, key: &str) -> bool {
    let repo = match kind {
        EntityKind::Issues => &raw.issues[i].repository,
        EntityKind::PullRequests => &raw.pull_requests[i].repository,
        EntityKind::Commits => &raw.commits[i].repository,
        EntityKind::Comments => &raw.comments[i].repository,
        EntityKind::Reviews => &raw.reviews[i].repository,
    };
    repo == key
}

fn has_author(raw: &RawData, kind: EntityKind, i: usize, key: &str) -> bool {
    let author = match kind {
        EntityKind::Issues => &raw.issues[i].author,
        EntityKind::PullRequests => &raw.pull_requests[i].author,
        EntityKind::Commits => &raw.commits[i].author,
        EntityKind::Comments => &raw.comments[i].author,
        EntityKind::Reviews => &raw.reviews[i].author,
    };
    author.as_deref() == Some(key)
}

fn has_label(raw: &RawData, kind: EntityKind, i: usize, key: &str) -> bool {
    match kind {
        EntityKind::Issues => raw.issues[i].labels.iter().any(|l| l == key),
        EntityKind::PullRequests => raw.pull_requests[i].labels.iter().any(|l| l == key),
        _ => false,
    }
}

fn parent_of(raw: &RawData, kind: EntityKind, i: usize, key: &str) -> bool {
    match kind {
        EntityKind::Comments => raw.comments[i].parent == key,
        EntityKind::Reviews => raw.reviews[i].parent == key,
        _ => false,
    }
}

/// Aggregator output.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub raw: RawData,
    pub indexes: Indexes,
    /// Entity-kind failures from every repository, in repository order.
    pub errors: Vec<EntityError>,
    /// Comments and reviews whose parent issue or pull request is not in the result.
    pub orphans_dropped: usize,
}

/// Flatten per-repository collections (already in enumeration order).
pub fn aggregate(collections: Vec<RepoCollection>) -> Aggregated {
    let mut raw = RawData::default();
    let mut errors = Vec::new();
    for c in collections {
        raw.repositories.push(c.repository);
        raw.issues.extend(c.issues);
        raw.pull_requests.extend(c.pull_requests);
        raw.commits.extend(c.commits);
        raw.comments.extend(c.comments);
        raw.reviews.extend(c.reviews);
        errors.extend(c.errors);
    }

    let parents: HashSet<String> = raw
        .issues
        .iter()
        .map(IssueRecord::key)
        .chain(raw.pull_requests.iter().map(PullRequestRecord::key))
        .collect();
    let before = raw.comments.len() + raw.reviews.len();
    raw.comments.retain(|c| parents.contains(&c.parent));
    // Reviews only ever belong to pull requests.
    let pulls: HashSet<String> = raw.pull_requests.iter().map(PullRequestRecord::key).collect();
    raw.reviews.retain(|r| pulls.contains(&r.parent));
    let orphans_dropped = before - raw.comments.len() - raw.reviews.len();

    let indexes = Indexes::build(&raw);
    debug_assert_eq!(indexes.verify(&raw), Ok(()));
    debug!(
        repositories = raw.repositories.len(),
        issues = raw.issues.len(),
        pull_requests = raw.pull_requests.len(),
        commits = raw.commits.len(),
        comments = raw.comments.len(),
        reviews = raw.reviews.len(),
        orphans_dropped,
        "aggregated"
    );

    Aggregated {
        raw,
        indexes,
        errors,
        orphans_dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{comment, commit, issue, pull, repo, review};

    fn collection(full_name: &str) -> RepoCollection {
        RepoCollection::new(repo(full_name))
    }

    fn sample() -> Vec<RepoCollection> {
        let mut a = collection("org/a");
        let mut labeled = issue("org/a", 1, "alice", "2024-01-01", Some("2024-01-05"));
        labeled.labels = vec!["bug".into(), "ui".into()];
        a.issues = vec![labeled, issue("org/a", 2, "bob", "2024-01-02", None)];
        a.pull_requests = vec![pull("org/a", 3, "alice", "2024-01-03", Some("2024-01-04"))];
        a.commits = vec![commit("org/a", "c1", "alice", "2024-01-03")];
        a.comments = vec![
            comment("org/a", 10, 1, "bob", "2024-01-02"),
            comment("org/a", 11, 3, "carol", "2024-01-03"),
        ];
        a.reviews = vec![review("org/a", 20, 3, "bob", "2024-01-04")];

        let mut b = collection("org/b");
        b.issues = vec![issue("org/b", 1, "carol", "2024-01-06", None)];
        b.commits = vec![commit("org/b", "c2", "dave", "2024-01-07")];
        vec![a, b]
    }

    #[test]
    fn arrays_follow_repository_then_fetch_order() {
        let agg = aggregate(sample());
        let issues: Vec<_> = agg.raw.issues.iter().map(IssueRecord::key).collect();
        assert_eq!(issues, vec!["org/a#1", "org/a#2", "org/b#1"]);
        let repos: Vec<_> = agg.raw.repositories.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(repos, vec!["org/a", "org/b"]);
        assert_eq!(agg.orphans_dropped, 0);
    }

    #[test]
    fn indexes_point_at_matching_entities() {
        let agg = aggregate(sample());
        let idx = &agg.indexes;

        assert_eq!(idx.by_repository["org/b"].issues, vec![2]);
        assert_eq!(idx.by_repository["org/b"].commits, vec![1]);
        assert_eq!(idx.by_author["alice"].issues, vec![0]);
        assert_eq!(idx.by_author["alice"].pull_requests, vec![0]);
        assert_eq!(idx.by_author["alice"].commits, vec![0]);
        assert_eq!(idx.by_label["bug"].issues, vec![0]);
        assert_eq!(idx.by_parent["org/a#3"].comments, vec![1]);
        assert_eq!(idx.by_parent["org/a#3"].reviews, vec![0]);
        assert_eq!(idx.verify(&agg.raw), Ok(()));
    }

    #[test]
    fn rebuild_reproduces_serialized_indexes() {
        let agg = aggregate(sample());
        let json = serde_json::to_value(&agg.indexes).unwrap();
        let parsed: Indexes = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, Indexes::build(&agg.raw));
    }

    #[test]
    fn verify_catches_tampered_entries() {
        let agg = aggregate(sample());

        let mut past_end = agg.indexes.clone();
        past_end.by_author.get_mut("alice").unwrap().issues.push(99);
        assert!(matches!(past_end.verify(&agg.raw), Err(IndexError::OutOfBounds { .. })));

        let mut wrong = agg.indexes.clone();
        wrong.by_author.get_mut("dave").unwrap().commits = vec![0];
        assert!(matches!(wrong.verify(&agg.raw), Err(IndexError::WrongKey { .. })));

        let mut missing = agg.indexes.clone();
        missing.by_label.remove("ui");
        assert_eq!(missing.verify(&agg.raw), Err(IndexError::Stale));
    }

    #[test]
    fn children_without_a_present_parent_are_dropped() {
        let mut colls = sample();
        colls[1].comments = vec![comment("org/b", 30, 77, "erin", "2024-01-08")];
        // Reviews can only attach to pull requests, not issues.
        colls[1].reviews = vec![review("org/b", 31, 1, "erin", "2024-01-08")];

        let agg = aggregate(colls);
        assert_eq!(agg.orphans_dropped, 2);
        let parents: HashSet<_> = agg
            .raw
            .issues
            .iter()
            .map(IssueRecord::key)
            .chain(agg.raw.pull_requests.iter().map(PullRequestRecord::key))
            .collect();
        assert!(agg.raw.comments.iter().all(|c| parents.contains(&c.parent)));
        assert!(agg.raw.reviews.iter().all(|r| parents.contains(&r.parent)));
        assert!(!agg.indexes.by_author.contains_key("erin"));
    }

    #[test]
    fn entity_errors_are_carried_through() {
        let mut colls = sample();
        colls[0].errors.push(EntityError {
            repository: "org/a".into(),
            kind: EntityKind::Commits,
            message: "boom".into(),
        });
        let agg = aggregate(colls);
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.raw.count(EntityKind::Commits), 2);
    }
}
