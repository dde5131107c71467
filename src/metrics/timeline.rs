//! Weekly and monthly activity buckets with a trend over the last two of each.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::RawData;
use crate::collect::options::TimeWindow;

/// Relative change between the last two buckets above which a series counts as moving.
pub const TREND_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Things created during one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub commits: usize,
    pub issues: usize,
    pub pull_requests: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub trend: Trend,
    pub buckets: BTreeMap<String, Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineMetrics {
    pub weekly: Series,
    pub monthly: Series,
}

/// ISO week key, `YYYY-Www`, using the ISO week-numbering year.
pub fn week_key(ts: &DateTime<Utc>) -> String {
    let week = ts.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn month_key(ts: &DateTime<Utc>) -> String {
    format!("{}-{:02}", ts.year(), ts.month())
}

/// Compare the last bucket with the one before it.
pub fn trend(previous: usize, last: usize) -> Trend {
    if previous == 0 {
        return if last > 0 { Trend::Increasing } else { Trend::Stable };
    }
    let change = (last as f64 - previous as f64) / previous as f64;
    if change > TREND_THRESHOLD {
        Trend::Increasing
    } else if change < -TREND_THRESHOLD {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Commit,
    Issue,
    PullRequest,
}

/// Buckets run contiguously from the window start (or the earliest creation
/// when the window is open) up to the window end, or `reference_time` when that
/// comes first. Creations outside that range are not counted.
pub(super) fn compute(raw: &RawData, window: &TimeWindow, reference_time: DateTime<Utc>) -> TimelineMetrics {
    let until = window.until.map_or(reference_time, |u| u.min(reference_time));
    let events: Vec<(DateTime<Utc>, Kind)> = raw
        .commits
        .iter()
        .map(|c| (c.date, Kind::Commit))
        .chain(raw.issues.iter().map(|i| (i.created_at, Kind::Issue)))
        .chain(raw.pull_requests.iter().map(|p| (p.created_at, Kind::PullRequest)))
        .filter(|(ts, _)| window.since.is_none_or(|s| *ts >= s) && *ts <= until)
        .collect();

    let start = window
        .since
        .or_else(|| events.iter().map(|(ts, _)| *ts).min())
        .map(|ts| ts.date_naive());
    let end = until.date_naive();

    TimelineMetrics {
        weekly: series(&events, start, end, Period::Week),
        monthly: series(&events, start, end, Period::Month),
    }
}

#[derive(Clone, Copy)]
enum Period {
    Week,
    Month,
}

impl Period {
    fn key(self, day: NaiveDate) -> String {
        let ts = day.and_time(chrono::NaiveTime::MIN).and_utc();
        match self {
            Self::Week => week_key(&ts),
            Self::Month => month_key(&ts),
        }
    }

    fn next(self, day: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Week => day.checked_add_days(Days::new(7)),
            Self::Month => day.with_day(1)?.checked_add_months(Months::new(1)),
        }
    }
}

fn series(events: &[(DateTime<Utc>, Kind)], start: Option<NaiveDate>, end: NaiveDate, period: Period) -> Series {
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
    let mut cursor = start;
    while let Some(day) = cursor.filter(|d| *d <= end) {
        buckets.entry(period.key(day)).or_default();
        cursor = period.next(day);
    }
    // The end day may sit in a period the stepping skipped past.
    if start.is_some() {
        buckets.entry(period.key(end)).or_default();
    }

    for (ts, kind) in events {
        let bucket = buckets.entry(period.key(ts.date_naive())).or_default();
        match kind {
            Kind::Commit => bucket.commits += 1,
            Kind::Issue => bucket.issues += 1,
            Kind::PullRequest => bucket.pull_requests += 1,
        }
        bucket.total += 1;
    }

    let mut totals = buckets.values().rev().map(|b| b.total);
    let trend = match (totals.next(), totals.next()) {
        (Some(last), Some(previous)) => trend(previous, last),
        _ => Trend::Stable,
    };
    Series { trend, buckets }
}
