//! Bounded history of recent probe outcomes.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Number of outcomes kept per monitor.
pub const HISTORY_CAPACITY: usize = 60;

/// Result of one completed probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Short display label, e.g. "14:03:27 • OK".
    pub label: String,
}

impl ProbeOutcome {
    pub fn new(success: bool, timestamp: DateTime<Utc>) -> Self {
        let local = timestamp.with_timezone(&Local);
        let label = format!(
            "{} • {}",
            local.format("%H:%M:%S"),
            if success { "OK" } else { "KO" }
        );

        Self {
            success,
            timestamp,
            label,
        }
    }
}

/// Fixed-capacity FIFO of outcomes, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<ProbeOutcome>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, outcome: ProbeOutcome) {
        self.entries.push_back(outcome);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ProbeOutcome> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ProbeOutcome> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
