//! Downtime interval bookkeeping.
//!
//! The tracker is fed one outcome per completed probe, in completion order,
//! and keeps a log where every run of failures is exactly one interval.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// A span during which the target's latest known state was a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DowntimeInterval {
    pub name: String,
    /// URL at the time the interval opened.
    pub url: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: Option<DateTime<Utc>>,
}

impl DowntimeInterval {
    pub fn is_open(&self) -> bool {
        self.end_utc.is_none()
    }

    /// Length of the interval, measured up to `now` while still open.
    pub fn duration(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.end_utc.unwrap_or(now) - self.start_utc
    }
}

/// Serializable view of an interval, with its duration resolved.
#[derive(Debug, Clone, Serialize)]
pub struct DowntimeRecord {
    #[serde(flatten)]
    pub interval: DowntimeInterval,
    pub open: bool,
    pub duration_seconds: i64,
}

impl DowntimeRecord {
    pub fn new(interval: DowntimeInterval, now: DateTime<Utc>) -> Self {
        Self {
            open: interval.is_open(),
            duration_seconds: interval.duration(now).num_seconds(),
            interval,
        }
    }
}

/// A change between two consecutive known outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: bool,
    pub current: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DowntimeTracker {
    last_success: Option<bool>,
    intervals: Vec<DowntimeInterval>,
    /// Index into `intervals` of the open interval, if any.
    open: Option<usize>,
}

impl DowntimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe outcome. Returns the transition when the outcome
    /// differs from the previous known one.
    pub fn observe(
        &mut self,
        success: bool,
        at: DateTime<Utc>,
        name: &str,
        url: &str,
    ) -> Option<Transition> {
        let transition = match self.last_success {
            None => {
                if !success {
                    self.open_interval_at(at, name, url);
                }
                None
            }
            Some(previous) if previous != success => {
                if success {
                    self.close_interval_at(at);
                } else {
                    self.open_interval_at(at, name, url);
                }
                Some(Transition {
                    previous,
                    current: success,
                })
            }
            Some(_) => None,
        };

        self.last_success = Some(success);
        transition
    }

    fn open_interval_at(&mut self, at: DateTime<Utc>, name: &str, url: &str) {
        // A stray open interval would break the one-open invariant.
        self.close_interval_at(at);

        self.intervals.push(DowntimeInterval {
            name: name.to_string(),
            url: url.to_string(),
            start_utc: at,
            end_utc: None,
        });
        self.open = Some(self.intervals.len() - 1);
    }

    fn close_interval_at(&mut self, at: DateTime<Utc>) {
        if let Some(idx) = self.open.take() {
            if let Some(interval) = self.intervals.get_mut(idx) {
                if interval.end_utc.is_none() {
                    interval.end_utc = Some(at);
                }
            }
        }
    }

    pub fn last_success(&self) -> Option<bool> {
        self.last_success
    }

    pub fn intervals(&self) -> &[DowntimeInterval] {
        &self.intervals
    }

    pub fn open_interval(&self) -> Option<&DowntimeInterval> {
        self.open.and_then(|idx| self.intervals.get(idx))
    }
}
