use std::cell::{Cell, RefCell};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;

/// Snapshot of API quota consumption for one collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub calls_made: u64,
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Accumulates API calls and the latest rate-limit headers across every
/// repository fetch of a run.
///
/// Shared by reference between concurrently polled fetch futures. The run
/// executes on a current-thread runtime and every method reads and writes
/// the counters without an `.await` in between, so updates cannot interleave.
/// That non-preemption assumption is what makes `Cell`/`RefCell` sufficient;
/// do not hold a borrow across an await point.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    calls: Cell<u64>,
    latest: RefCell<QuotaUsage>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one HTTP call and absorb its `x-ratelimit-*` headers.
    pub fn record(&self, headers: &HeaderMap) {
        self.calls.set(self.calls.get() + 1);
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let limit = header_u64(headers, "x-ratelimit-limit");
        let reset = header_u64(headers, "x-ratelimit-reset")
            .and_then(|s| i64::try_from(s).ok())
            .and_then(|s| DateTime::from_timestamp(s, 0));
        self.absorb(remaining, limit, reset);
    }

    /// Seed from the `/rate_limit` endpoint, which is not itself counted
    /// against the quota.
    pub fn seed(&self, remaining: u64, limit: u64, reset: Option<DateTime<Utc>>) {
        self.absorb(Some(remaining), Some(limit), reset);
    }

    fn absorb(&self, remaining: Option<u64>, limit: Option<u64>, reset: Option<DateTime<Utc>>) {
        let mut latest = self.latest.borrow_mut();
        // Responses of concurrent requests arrive out of order; within one
        // reset window the lowest remaining count is the freshest.
        if let Some(remaining) = remaining {
            let same_window = latest.reset_at.is_none() || reset.is_none() || latest.reset_at == reset;
            latest.remaining = Some(match latest.remaining {
                Some(prev) if same_window => prev.min(remaining),
                _ => remaining,
            });
        }
        if limit.is_some() {
            latest.limit = limit;
        }
        if reset.is_some() {
            latest.reset_at = reset;
        }
    }

    pub fn snapshot(&self) -> QuotaUsage {
        QuotaUsage {
            calls_made: self.calls.get(),
            ..self.latest.borrow().clone()
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
