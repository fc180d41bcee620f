//! Scheduler module: per-target probe loops and the registry that owns them.

mod downtime;
mod history;
mod registry;
mod ticker;

pub use downtime::*;
pub use history::*;
pub use registry::*;
pub use ticker::*;

use crate::db::Target;
use crate::probe::ProbeClient;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

/// Uptime text shown before the first tick.
pub const UPTIME_PLACEHOLDER: &str = "--:--:--";

const EVENT_CAPACITY: usize = 256;

/// A detected success/failure transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub name: String,
    pub url: String,
    pub previous: bool,
    pub current: bool,
    pub at: DateTime<Utc>,
}

/// Notifications published by monitors and the registry.
///
/// Sent on a broadcast channel, so they can be consumed from any task or
/// thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Added { url: String },
    Removed { url: String },
    Updated { url: String },
    Started { url: String },
    Stopped { url: String },
    StatusChanged(StatusChange),
}

/// Read model of a monitor, as consumed by the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    #[serde(flatten)]
    pub target: Target,
    pub running: bool,
    pub has_error: bool,
    pub status: &'static str,
    pub uptime: String,
    pub started_at: DateTime<Utc>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<ProbeOutcome>,
    pub history: Vec<ProbeOutcome>,
    pub downtimes: Vec<DowntimeRecord>,
}

struct MonitorState {
    target: Target,
    has_error: bool,
    started_at: DateTime<Utc>,
    last_error_at: Option<DateTime<Utc>>,
    history: HistoryBuffer,
    downtime: DowntimeTracker,
    uptime_text: String,
}

struct Shared {
    /// Result processing for one target happens under this lock.
    state: Mutex<MonitorState>,
    /// Stop signal of the current run; `Some` while running.
    run: Mutex<Option<broadcast::Sender<()>>>,
    client: ProbeClient,
    events: broadcast::Sender<MonitorEvent>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<broadcast::Sender<()>>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: MonitorEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn probe_params(&self) -> (String, Duration) {
        let state = self.lock_state();
        (state.target.url.clone(), state.target.timeout())
    }

    fn interval(&self) -> Duration {
        self.lock_state().target.interval()
    }

    /// Apply one probe outcome: history, error flag, downtime log, and the
    /// transition notification.
    fn record(&self, success: bool) {
        let mut state = self.lock_state();
        let now = Utc::now();

        state.history.push(ProbeOutcome::new(success, now));
        state.has_error = !success;
        if !success {
            state.last_error_at = Some(now);
        }

        let MonitorState { target, downtime, .. } = &mut *state;
        let Some(transition) = downtime.observe(success, now, &target.name, &target.url) else {
            return;
        };

        if transition.current {
            tracing::info!("Monitor: {} ({}) is back up", target.name, target.url);
        } else {
            tracing::warn!("Monitor: {} ({}) is down", target.name, target.url);
        }

        self.publish(MonitorEvent::StatusChanged(StatusChange {
            name: target.name.clone(),
            url: target.url.clone(),
            previous: transition.previous,
            current: transition.current,
            at: now,
        }));
    }
}

/// Monitors a single target: owns its probe loop, history and downtime log.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct TargetMonitor {
    shared: Arc<Shared>,
}

impl TargetMonitor {
    /// Create a stopped monitor with its own event channel.
    pub fn new(target: Target, client: ProbeClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(target, client, events)
    }

    /// Create a stopped monitor publishing on an existing event channel.
    pub fn with_events(
        target: Target,
        client: ProbeClient,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        let target = target.normalized();
        if let Err(e) = crate::probe::parse_probe_url(&target.url) {
            tracing::warn!("Monitor: {} will always fail: {}", target.name, e);
        }

        let state = MonitorState {
            target,
            has_error: false,
            started_at: Utc::now(),
            last_error_at: None,
            history: HistoryBuffer::new(),
            downtime: DowntimeTracker::new(),
            uptime_text: UPTIME_PLACEHOLDER.to_string(),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                run: Mutex::new(None),
                client,
                events,
            }),
        }
    }

    /// Begin probing in the background. No-op when already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let stop_rx = {
            let mut run = self.shared.lock_run();
            if run.is_some() {
                return;
            }
            let (stop_tx, stop_rx) = broadcast::channel(1);
            *run = Some(stop_tx);
            stop_rx
        };

        let url = {
            let mut state = self.shared.lock_state();
            state.started_at = Utc::now();
            state.target.url.clone()
        };

        tracing::info!("Monitor: Starting {}", url);
        tokio::spawn(run_probe_loop(Arc::downgrade(&self.shared), stop_rx));
        self.shared.publish(MonitorEvent::Started { url });
    }

    /// Stop probing. No-op when already stopped.
    ///
    /// A probe already in flight is not aborted, but its result is dropped.
    pub fn stop(&self) {
        {
            let mut run = self.shared.lock_run();
            let Some(stop_tx) = run.take() else {
                return;
            };
            let _ = stop_tx.send(());
        }

        let url = self.url();
        tracing::info!("Monitor: Stopped {}", url);
        self.shared.publish(MonitorEvent::Stopped { url });
    }

    /// Probe once right now, outside the loop's schedule, and process the
    /// result like a scheduled probe. Returns whether the target was up.
    pub async fn ping_once(&self) -> bool {
        let (url, timeout) = self.shared.probe_params();
        let success = self.shared.client.probe(&url, timeout).await;
        self.shared.record(success);
        success
    }

    /// Replace the target configuration in place. History, downtime log and
    /// running state are kept; a running loop picks the new values up on its
    /// next probe.
    pub fn reconfigure(&self, target: Target) {
        let url = {
            let mut state = self.shared.lock_state();
            state.target = target.normalized();
            state.target.url.clone()
        };
        self.shared.publish(MonitorEvent::Updated { url });
    }

    /// Recompute the uptime text: time since the later of the start and
    /// the last failure.
    pub fn tick_uptime(&self, now: DateTime<Utc>) {
        let mut state = self.shared.lock_state();
        let since = match state.last_error_at {
            Some(err) if err > state.started_at => err,
            _ => state.started_at,
        };
        state.uptime_text = format_uptime(now - since);
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_run().is_some()
    }

    /// Whether the most recent probe failed.
    pub fn has_error(&self) -> bool {
        self.shared.lock_state().has_error
    }

    pub fn status_text(&self) -> &'static str {
        if self.is_running() {
            "Running"
        } else {
            "Stopped"
        }
    }

    pub fn uptime_text(&self) -> String {
        self.shared.lock_state().uptime_text.clone()
    }

    pub fn last_success(&self) -> Option<bool> {
        self.shared.lock_state().downtime.last_success()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.lock_state().started_at
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock_state().last_error_at
    }

    pub fn target(&self) -> Target {
        self.shared.lock_state().target.clone()
    }

    pub fn url(&self) -> String {
        self.shared.lock_state().target.url.clone()
    }

    pub fn history(&self) -> Vec<ProbeOutcome> {
        self.shared.lock_state().history.snapshot()
    }

    pub fn downtimes(&self) -> Vec<DowntimeInterval> {
        self.shared.lock_state().downtime.intervals().to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> MonitorSnapshot {
        let running = self.is_running();
        let state = self.shared.lock_state();

        MonitorSnapshot {
            target: state.target.clone(),
            running,
            has_error: state.has_error,
            status: if running { "Running" } else { "Stopped" },
            uptime: state.uptime_text.clone(),
            started_at: state.started_at,
            last_error_at: state.last_error_at,
            last_outcome: state.history.last().cloned(),
            history: state.history.snapshot(),
            downtimes: state
                .downtime
                .intervals()
                .iter()
                .cloned()
                .map(|d| DowntimeRecord::new(d, now))
                .collect(),
        }
    }
}

impl std::fmt::Debug for TargetMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetMonitor")
            .field("url", &self.url())
            .field("running", &self.is_running())
            .field("has_error", &self.has_error())
            .finish()
    }
}

/// Format an elapsed duration as `HH:MM:SS`, hours unbounded.
pub fn format_uptime(elapsed: ChronoDuration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Run the probe loop for a single target.
///
/// Probes are strictly sequential: probe, then sleep for the interval. The
/// loop ends when stopped or when the monitor is dropped.
async fn run_probe_loop(shared: Weak<Shared>, mut stop_rx: broadcast::Receiver<()>) {
    // Stagger the first probe so a bulk load does not fire all at once
    let jitter = rand::random::<u64>() % 100;
    tokio::select! {
        _ = stop_rx.recv() => return,
        _ = tokio::time::sleep(Duration::from_millis(jitter)) => {}
    }

    loop {
        let Some(monitor) = shared.upgrade() else {
            break;
        };

        let (url, timeout) = monitor.probe_params();
        let success = monitor.client.probe(&url, timeout).await;

        {
            // Held while recording so stop() cannot return in between
            let _run = monitor.lock_run();
            if stop_requested(&mut stop_rx) {
                tracing::debug!("Discarding result for {} after stop", url);
                break;
            }
            monitor.record(success);
        }

        let interval = monitor.interval();
        drop(monitor);

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        stop_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedServer;

    fn target(url: &str, interval: i64) -> Target {
        Target {
            interval_seconds: interval,
            timeout_seconds: 2,
            ..Target::new("Test", url)
        }
    }

    async fn wait_until<F: Fn() -> bool>(cond: F, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(ChronoDuration::seconds(0)), "00:00:00");
        assert_eq!(format_uptime(ChronoDuration::seconds(3725)), "01:02:05");
        assert_eq!(format_uptime(ChronoDuration::hours(130)), "130:00:00");
        assert_eq!(format_uptime(ChronoDuration::seconds(-5)), "00:00:00");
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let server = ScriptedServer::start(&[]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 60), ProbeClient::new());
        let mut rx = monitor.subscribe();

        assert!(!monitor.is_running());
        assert_eq!(monitor.status_text(), "Stopped");

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        assert_eq!(monitor.status_text(), "Running");
        assert!(wait_until(|| server.hits() >= 1, Duration::from_secs(5)).await);

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        let lifecycle: Vec<MonitorEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, MonitorEvent::Started { .. } | MonitorEvent::Stopped { .. }))
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                MonitorEvent::Started { url: server.url() },
                MonitorEvent::Stopped { url: server.url() },
            ]
        );
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_ping_once_on_stopped_monitor() {
        let server = ScriptedServer::start(&[500, 200]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 60), ProbeClient::new());
        let mut rx = monitor.subscribe();

        assert!(!monitor.ping_once().await);
        assert!(!monitor.is_running());
        assert!(monitor.has_error());
        assert!(monitor.last_error_at().is_some());
        assert_eq!(monitor.history().len(), 1);
        assert_eq!(monitor.downtimes().len(), 1);
        assert!(monitor.downtimes()[0].is_open());
        // The first failure opens an interval without a transition event
        assert!(drain(&mut rx).is_empty());

        assert!(monitor.ping_once().await);
        assert!(!monitor.has_error());
        assert_eq!(monitor.last_success(), Some(true));
        assert!(!monitor.downtimes()[0].is_open());

        match drain(&mut rx).as_slice() {
            [MonitorEvent::StatusChanged(change)] => {
                assert!(!change.previous);
                assert!(change.current);
                assert_eq!(change.url, server.url());
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_history_and_switches_url() {
        let first = ScriptedServer::start(&[]).await;
        let second = ScriptedServer::start(&[]).await;
        second.set_status(503);

        let monitor = TargetMonitor::new(target(&first.url(), 1), ProbeClient::new());
        assert!(monitor.ping_once().await);

        monitor.start();
        assert!(wait_until(|| first.hits() >= 2, Duration::from_secs(5)).await);

        monitor.reconfigure(Target {
            name: "Renamed".to_string(),
            ..target(&second.url(), 1)
        });
        assert!(monitor.is_running());
        assert!(wait_until(|| second.hits() >= 1, Duration::from_secs(5)).await);
        assert!(wait_until(|| monitor.has_error(), Duration::from_secs(5)).await);
        monitor.stop();

        let history = monitor.history();
        assert!(history.len() >= 3);
        assert!(history[0].success);
        assert_eq!(monitor.target().name, "Renamed");

        let downtimes = monitor.downtimes();
        assert_eq!(downtimes.len(), 1);
        assert_eq!(downtimes[0].url, second.url());
    }

    #[tokio::test]
    async fn test_failure_run_records_one_interval() {
        let server = ScriptedServer::start(&[200, 200, 200, 500, 500, 200]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 1), ProbeClient::new());
        let mut rx = monitor.subscribe();

        monitor.start();

        let mut changes = Vec::new();
        while changes.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(15), rx.recv())
                .await
                .expect("timed out waiting for status change")
                .unwrap();
            if let MonitorEvent::StatusChanged(change) = event {
                changes.push(change);
            }
        }
        monitor.stop();

        assert_eq!((changes[0].previous, changes[0].current), (true, false));
        assert_eq!((changes[1].previous, changes[1].current), (false, true));
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, MonitorEvent::StatusChanged(_))));

        let downtimes = monitor.downtimes();
        assert_eq!(downtimes.len(), 1);
        assert!(!downtimes[0].is_open());
        let millis = downtimes[0].duration(Utc::now()).num_milliseconds();
        assert!((1500..4000).contains(&millis), "duration was {}ms", millis);
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_result() {
        let server = ScriptedServer::start(&[]).await;
        server.set_delay(Duration::from_millis(400));
        let monitor = TargetMonitor::new(target(&server.url(), 1), ProbeClient::new());

        monitor.start();
        assert!(wait_until(|| server.hits() == 1, Duration::from_secs(5)).await);
        monitor.stop();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(monitor.history().is_empty());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_nothing_recorded_after_stop_returns() {
        let server = ScriptedServer::start(&[]).await;
        server.set_delay(Duration::from_millis(50));
        let monitor = TargetMonitor::new(target(&server.url(), 1), ProbeClient::new());

        for round in 0..6u64 {
            let hits = server.hits();
            monitor.start();
            assert!(wait_until(|| server.hits() > hits, Duration::from_secs(5)).await);
            // Land the stop before, during and after the response arrives
            tokio::time::sleep(Duration::from_millis(round * 15)).await;
            monitor.stop();

            let recorded = monitor.history().len();
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert_eq!(monitor.history().len(), recorded, "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_reconfigured_timeout_applies_to_running_monitor() {
        let server = ScriptedServer::start(&[]).await;
        server.set_delay(Duration::from_millis(1500));
        let monitor = TargetMonitor::new(
            Target {
                timeout_seconds: 5,
                ..target(&server.url(), 1)
            },
            ProbeClient::new(),
        );

        monitor.start();
        assert!(wait_until(|| monitor.history().len() == 1, Duration::from_secs(5)).await);
        assert!(monitor.history()[0].success);

        monitor.reconfigure(Target {
            timeout_seconds: 1,
            ..target(&server.url(), 1)
        });
        assert!(wait_until(|| monitor.has_error(), Duration::from_secs(5)).await);
        monitor.stop();

        let history = monitor.history();
        assert!(history.len() >= 2);
        assert!(!history[history.len() - 1].success);
    }

    #[tokio::test]
    async fn test_restart_probes_without_waiting_out_interval() {
        let server = ScriptedServer::start(&[]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 3600), ProbeClient::new());

        monitor.start();
        assert!(wait_until(|| monitor.history().len() == 1, Duration::from_secs(5)).await);
        monitor.stop();
        monitor.start();

        // A fresh run probes again right away instead of waiting out the hour
        assert!(wait_until(|| monitor.history().len() == 2, Duration::from_secs(5)).await);
        monitor.stop();
    }

    #[tokio::test]
    async fn test_tick_uptime_counts_from_last_error() {
        let server = ScriptedServer::start(&[500]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 60), ProbeClient::new());
        assert_eq!(monitor.uptime_text(), UPTIME_PLACEHOLDER);

        monitor.tick_uptime(monitor.started_at() + ChronoDuration::seconds(61));
        assert_eq!(monitor.uptime_text(), "00:01:01");

        monitor.ping_once().await;
        let failed_at = monitor.last_error_at().unwrap();
        monitor.tick_uptime(failed_at + ChronoDuration::seconds(5));
        assert_eq!(monitor.uptime_text(), "00:00:05");
    }

    #[tokio::test]
    async fn test_snapshot() {
        let server = ScriptedServer::start(&[404]).await;
        let monitor = TargetMonitor::new(target(&server.url(), 60), ProbeClient::new());
        monitor.ping_once().await;

        let snapshot = monitor.snapshot(Utc::now());
        assert_eq!(snapshot.target.url, server.url());
        assert!(snapshot.has_error);
        assert!(!snapshot.running);
        assert_eq!(snapshot.status, "Stopped");
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.downtimes.len(), 1);
        assert!(snapshot.downtimes[0].open);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["url"], server.url());
        assert_eq!(json["has_error"], true);
    }
}
