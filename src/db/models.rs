//! Target definition types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECONDS: i64 = 10;
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 5;

/// A monitored endpoint. The URL is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub name: String,
    pub url: String,
    /// Display ordering only.
    pub order: i64,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub group: String,
    pub tags: Vec<String>,
    /// Whether the target starts probing as soon as it is loaded.
    pub enabled: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            order: 0,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            group: String::new(),
            tags: Vec::new(),
            enabled: true,
        }
    }
}

impl Target {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Trim name and URL, clamp interval and timeout to at least one second
    /// and collapse the tag list into a case-insensitive set, keeping the
    /// first spelling.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.url = self.url.trim().to_string();
        self.interval_seconds = self.interval_seconds.max(1);
        self.timeout_seconds = self.timeout_seconds.max(1);

        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let lowered = tag.to_lowercase();
            if !tags.iter().any(|t| t.to_lowercase() == lowered) {
                tags.push(tag.to_string());
            }
        }
        self.tags = tags;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1) as u64)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1) as u64)
    }

    /// Case-insensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase() == tag)
    }

    /// Split a "a, b; c" style tag list.
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split([',', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}
