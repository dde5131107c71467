use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

/// Entity kinds fetched per repository. Repository metadata is always fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum EntityKind {
    Issues,
    PullRequests,
    Commits,
    Comments,
    Reviews,
}

impl EntityKind {
    pub const ALL: [Self; 5] = [
        Self::Issues,
        Self::PullRequests,
        Self::Commits,
        Self::Comments,
        Self::Reviews,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::PullRequests => "pull_requests",
            Self::Commits => "commits",
            Self::Comments => "comments",
            Self::Reviews => "reviews",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind maximum number of items fetched per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Caps {
    pub issues: usize,
    pub pull_requests: usize,
    pub commits: usize,
    pub comments: usize,
    pub reviews: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            issues: 500,
            pull_requests: 500,
            commits: 1000,
            comments: 1000,
            reviews: 500,
        }
    }
}

impl Caps {
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Issues => self.issues,
            EntityKind::PullRequests => self.pull_requests,
            EntityKind::Commits => self.commits,
            EntityKind::Comments => self.comments,
            EntityKind::Reviews => self.reviews,
        }
    }
}

/// Inclusive `[since, until]` time filter. A missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.since.is_none_or(|s| *ts >= s) && self.until.is_none_or(|u| *ts <= u)
    }

    /// True when `ts` lies before the window; recency-sorted pagination can stop there.
    pub fn is_before(&self, ts: &DateTime<Utc>) -> bool {
        self.since.is_some_and(|s| *ts < s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Invalid time '{0}': use YYYY-MM-DD, RFC 3339, or a relative span like 7d, 2w, 3m, 1y")]
    InvalidTime(String),

    #[error("Empty time window: since ({since}) is after until ({until})")]
    EmptyWindow {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },

    #[error("No entity kinds selected")]
    NoKinds,

    #[error("Reviews are fetched per pull request; enable pull_requests to collect reviews")]
    ReviewsWithoutPullRequests,
}

/// What a collection run fetches. Built once per invocation, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionOptions {
    pub kinds: BTreeSet<EntityKind>,
    pub caps: Caps,
    pub window: TimeWindow,
    /// Refresh each pull request from the single-PR endpoint for size metrics.
    pub include_pr_details: bool,
    pub exclude_forks: bool,
    pub exclude_archived: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL.into_iter().collect(),
            caps: Caps::default(),
            window: TimeWindow::default(),
            include_pr_details: false,
            exclude_forks: false,
            exclude_archived: false,
        }
    }
}

impl CollectionOptions {
    pub fn wants(&self, kind: EntityKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn cap(&self, kind: EntityKind) -> usize {
        self.caps.get(kind)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.kinds.is_empty() {
            return Err(OptionsError::NoKinds);
        }
        if self.wants(EntityKind::Reviews) && !self.wants(EntityKind::PullRequests) {
            return Err(OptionsError::ReviewsWithoutPullRequests);
        }
        if let (Some(since), Some(until)) = (self.window.since, self.window.until)
            && since > until
        {
            return Err(OptionsError::EmptyWindow { since, until });
        }
        Ok(())
    }
}

/// Parse a lower time bound. Relative spans (`7d`, `2w`, `3m`, `1y`) count back from `now`;
/// a bare date means the start of that day (UTC).
pub fn parse_since(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, OptionsError> {
    let input = input.trim();
    if let Some(ts) = parse_relative(input, now) {
        return Ok(ts);
    }
    parse_absolute(input, NaiveTime::MIN)
}

/// Parse an upper time bound. A bare date means the end of that day (UTC).
pub fn parse_until(input: &str) -> Result<DateTime<Utc>, OptionsError> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    parse_absolute(input.trim(), end_of_day)
}

fn parse_absolute(input: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>, OptionsError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(|d| d.and_time(time_of_day).and_utc())
        .map_err(|_| OptionsError::InvalidTime(input.to_string()))
}

fn parse_relative(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let unit = input.chars().last()?;
    let amount: u32 = input[..input.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'd' => now.checked_sub_days(Days::new(amount.into())),
        'w' => now.checked_sub_days(Days::new(u64::from(amount) * 7)),
        'm' => now.checked_sub_months(Months::new(amount)),
        'y' => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
        _ => None,
    }
}
