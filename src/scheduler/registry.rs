//! Registry owning every target monitor, keyed by URL.

use super::{DowntimeRecord, MonitorEvent, MonitorSnapshot, TargetMonitor, EVENT_CAPACITY};
use crate::db::{DbError, Target, TargetStore};
use crate::probe::ProbeClient;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Registry error types.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid target: {0}")]
    Validation(String),
    #[error("a target with url {0} already exists")]
    Duplicate(String),
    #[error("no target with url {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Filter applied to monitor listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorFilter {
    pub errors_only: bool,
    pub running_only: bool,
    /// Case-insensitive substring of the name or URL.
    pub q: Option<String>,
    pub group: Option<String>,
    /// Case-insensitive tag.
    pub tag: Option<String>,
}

impl MonitorFilter {
    pub fn matches(&self, snapshot: &MonitorSnapshot) -> bool {
        if self.errors_only && !snapshot.has_error {
            return false;
        }
        if self.running_only && !snapshot.running {
            return false;
        }
        if let Some(q) = non_blank(&self.q) {
            let q = q.to_lowercase();
            let target = &snapshot.target;
            if !target.name.to_lowercase().contains(&q) && !target.url.to_lowercase().contains(&q) {
                return false;
            }
        }
        if let Some(group) = non_blank(&self.group) {
            if snapshot.target.group != group {
                return false;
            }
        }
        if let Some(tag) = non_blank(&self.tag) {
            if !snapshot.target.has_tag(tag) {
                return false;
            }
        }
        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Aggregate counts across all monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub running: usize,
    pub errors: usize,
    pub text: String,
}

impl Summary {
    pub fn new(total: usize, running: usize, errors: usize) -> Self {
        Self {
            total,
            running,
            errors,
            text: format!("{} URL(s) • {} running • errors: {}", total, running, errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub value: String,
    pub count: usize,
}

/// Group and tag choices with the number of monitors behind each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub total: usize,
    pub groups: Vec<FacetCount>,
    pub tags: Vec<FacetCount>,
}

/// Owns the ordered collection of monitors.
///
/// Every mutation is published as a [`MonitorEvent`], together with the
/// status changes of the monitors themselves, on one broadcast channel.
pub struct MonitorRegistry {
    monitors: RwLock<Vec<TargetMonitor>>,
    client: ProbeClient,
    events: broadcast::Sender<MonitorEvent>,
    store: Option<Arc<dyn TargetStore>>,
}

impl MonitorRegistry {
    /// Create an empty registry without persistence.
    pub fn new(client: ProbeClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            monitors: RwLock::new(Vec::new()),
            client,
            events,
            store: None,
        }
    }

    /// Create an empty registry that saves every change to `store`.
    pub fn with_store(client: ProbeClient, store: Arc<dyn TargetStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(client)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    /// Build a monitor for `target`, starting it when enabled.
    fn spawn_monitor(&self, target: Target) -> TargetMonitor {
        let enabled = target.enabled;
        let monitor = TargetMonitor::with_events(target, self.client.clone(), self.events.clone());
        self.publish(MonitorEvent::Added { url: monitor.url() });
        if enabled {
            monitor.start();
        }
        monitor
    }

    fn retire(&self, monitor: &TargetMonitor) {
        monitor.stop();
        self.publish(MonitorEvent::Removed { url: monitor.url() });
    }

    /// Replace the managed set with `targets`.
    ///
    /// Monitors whose URL is still present are reconfigured in place and keep
    /// their history and running state. New URLs get fresh monitors, started
    /// when enabled. Monitors absent from `targets` are stopped and dropped.
    pub async fn load_all(&self, targets: Vec<Target>) {
        let mut monitors = self.monitors.write().await;
        let mut previous = std::mem::take(&mut *monitors);
        let mut next: Vec<TargetMonitor> = Vec::with_capacity(targets.len());

        for target in targets {
            let target = target.normalized();
            if next.iter().any(|m| m.url() == target.url) {
                tracing::warn!("Registry: Skipping duplicate target {}", target.url);
                continue;
            }

            match previous.iter().position(|m| m.url() == target.url) {
                Some(pos) => {
                    let monitor = previous.remove(pos);
                    monitor.reconfigure(target);
                    next.push(monitor);
                }
                None => next.push(self.spawn_monitor(target)),
            }
        }

        for stale in &previous {
            self.retire(stale);
        }

        tracing::info!(
            "Registry: Loaded {} targets ({} removed)",
            next.len(),
            previous.len()
        );
        *monitors = next;
    }

    /// Re-read every target from the store and apply it with [`Self::load_all`].
    pub async fn reload(&self) -> Result<usize, RegistryError> {
        let targets = match &self.store {
            Some(store) => store.get_targets()?,
            None => return Ok(self.len().await),
        };
        let count = targets.len();
        self.load_all(targets).await;
        Ok(count)
    }

    /// Add a new target. Rejects a URL that is already monitored.
    pub async fn add(&self, target: Target) -> Result<TargetMonitor, RegistryError> {
        let target = validate(target)?;

        let mut monitors = self.monitors.write().await;
        if monitors.iter().any(|m| m.url() == target.url) {
            return Err(RegistryError::Duplicate(target.url));
        }

        if let Some(store) = &self.store {
            store.add_target(&target)?;
        }

        tracing::info!("Registry: Adding target {}", target.name);
        let monitor = self.spawn_monitor(target);
        monitors.push(monitor.clone());
        Ok(monitor)
    }

    /// Update the target currently monitored under `original_url`.
    ///
    /// Keeping the URL reconfigures the monitor in place. A new URL is an
    /// atomic rename: the record is rewritten under its old key and the old
    /// monitor is replaced, at the same position, by a fresh one. Either way
    /// the running state afterwards follows `enabled`.
    pub async fn update(
        &self,
        original_url: &str,
        target: Target,
    ) -> Result<TargetMonitor, RegistryError> {
        let target = validate(target)?;

        let mut monitors = self.monitors.write().await;
        let pos = monitors
            .iter()
            .position(|m| m.url() == original_url)
            .ok_or_else(|| RegistryError::NotFound(original_url.to_string()))?;

        let renamed = target.url != original_url;
        if renamed && monitors.iter().any(|m| m.url() == target.url) {
            return Err(RegistryError::Duplicate(target.url));
        }

        if let Some(store) = &self.store {
            store.update_target(original_url, &target)?;
        }

        if !renamed {
            let monitor = monitors[pos].clone();
            let enabled = target.enabled;
            monitor.reconfigure(target);
            if enabled {
                monitor.start();
            } else {
                monitor.stop();
            }
            return Ok(monitor);
        }

        tracing::info!("Registry: Renaming {} to {}", original_url, target.url);
        self.retire(&monitors[pos]);
        let monitor = self.spawn_monitor(target);
        monitors[pos] = monitor.clone();
        Ok(monitor)
    }

    /// Stop and forget the monitor for `url`, deleting it from the store.
    pub async fn remove(&self, url: &str) -> Result<(), RegistryError> {
        let mut monitors = self.monitors.write().await;
        let pos = monitors
            .iter()
            .position(|m| m.url() == url)
            .ok_or_else(|| RegistryError::NotFound(url.to_string()))?;

        if let Some(store) = &self.store {
            store.delete_target(url)?;
        }

        let monitor = monitors.remove(pos);
        self.retire(&monitor);
        tracing::info!("Registry: Removed target {}", url);
        Ok(())
    }

    pub async fn get(&self, url: &str) -> Option<TargetMonitor> {
        self.monitors.read().await.iter().find(|m| m.url() == url).cloned()
    }

    async fn require(&self, url: &str) -> Result<TargetMonitor, RegistryError> {
        self.get(url)
            .await
            .ok_or_else(|| RegistryError::NotFound(url.to_string()))
    }

    pub async fn start(&self, url: &str) -> Result<(), RegistryError> {
        self.require(url).await?.start();
        Ok(())
    }

    pub async fn stop(&self, url: &str) -> Result<(), RegistryError> {
        self.require(url).await?.stop();
        Ok(())
    }

    /// Probe `url` once, outside its schedule.
    pub async fn ping(&self, url: &str) -> Result<MonitorSnapshot, RegistryError> {
        let monitor = self.require(url).await?;
        monitor.ping_once().await;
        Ok(monitor.snapshot(Utc::now()))
    }

    pub async fn monitors(&self) -> Vec<TargetMonitor> {
        self.monitors.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.monitors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshots matching `filter`, failing monitors first, then by order.
    pub async fn snapshots(&self, filter: &MonitorFilter) -> Vec<MonitorSnapshot> {
        let now = Utc::now();
        let mut snapshots: Vec<MonitorSnapshot> = self
            .monitors
            .read()
            .await
            .iter()
            .map(|m| m.snapshot(now))
            .filter(|s| filter.matches(s))
            .collect();

        snapshots.sort_by(|a, b| {
            b.has_error
                .cmp(&a.has_error)
                .then(a.target.order.cmp(&b.target.order))
        });
        snapshots
    }

    pub async fn summary(&self) -> Summary {
        let monitors = self.monitors.read().await;
        Summary::new(
            monitors.len(),
            monitors.iter().filter(|m| m.is_running()).count(),
            monitors.iter().filter(|m| m.has_error()).count(),
        )
    }

    /// Recompute every monitor's uptime text and return the fresh summary.
    pub async fn tick(&self, now: DateTime<Utc>) -> Summary {
        {
            let monitors = self.monitors.read().await;
            for monitor in monitors.iter() {
                monitor.tick_uptime(now);
            }
        }
        self.summary().await
    }

    pub async fn facets(&self) -> Facets {
        let targets: Vec<Target> = self
            .monitors
            .read()
            .await
            .iter()
            .map(|m| m.target())
            .collect();

        let mut groups: BTreeMap<String, usize> = BTreeMap::new();
        for target in targets.iter().filter(|t| !t.group.trim().is_empty()) {
            *groups.entry(target.group.clone()).or_default() += 1;
        }

        // Keyed by lowercase tag, keeping the first spelling seen.
        let mut tags: BTreeMap<String, FacetCount> = BTreeMap::new();
        for tag in targets.iter().flat_map(|t| t.tags.iter()) {
            tags.entry(tag.to_lowercase())
                .or_insert_with(|| FacetCount {
                    value: tag.clone(),
                    count: 0,
                })
                .count += 1;
        }

        Facets {
            total: targets.len(),
            groups: groups
                .into_iter()
                .map(|(value, count)| FacetCount { value, count })
                .collect(),
            tags: tags.into_values().collect(),
        }
    }

    /// Every recorded downtime interval, monitor by monitor.
    pub async fn downtimes(&self) -> Vec<DowntimeRecord> {
        let now = Utc::now();
        self.monitors
            .read()
            .await
            .iter()
            .flat_map(|m| m.downtimes())
            .map(|d| DowntimeRecord::new(d, now))
            .collect()
    }

    /// Stop every monitor.
    pub async fn shutdown(&self) {
        let monitors = self.monitors.read().await;
        for monitor in monitors.iter() {
            monitor.stop();
        }
        tracing::info!("Registry: Stopped {} monitors", monitors.len());
    }
}

fn validate(target: Target) -> Result<Target, RegistryError> {
    let target = target.normalized();

    if target.name.is_empty() {
        return Err(RegistryError::Validation("name is required".to_string()));
    }
    if target.url.is_empty() {
        return Err(RegistryError::Validation("url is required".to_string()));
    }
    Ok(target)
}
