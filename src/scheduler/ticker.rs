//! Fixed-cadence tick refreshing uptime text and the aggregate summary.

use super::{MonitorRegistry, Summary};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};

/// Background task recomputing every monitor's uptime text on a fixed period
/// and publishing the resulting [`Summary`].
///
/// It only reads monitor state, so it never waits on a probe.
pub struct UptimeTicker {
    registry: Arc<MonitorRegistry>,
    period: Duration,
    summary_tx: watch::Sender<Summary>,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl UptimeTicker {
    pub fn new(registry: Arc<MonitorRegistry>, period: Duration) -> Self {
        let (summary_tx, _) = watch::channel(Summary::new(0, 0, 0));
        Self {
            registry,
            period,
            summary_tx,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Latest summary, updated on every tick.
    pub fn summary(&self) -> watch::Receiver<Summary> {
        self.summary_tx.subscribe()
    }

    /// Start the ticker background task. No-op when already started.
    pub async fn start(&self) {
        let mut stop_guard = self.stop.lock().await;
        if stop_guard.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop_guard = Some(tx);

        let registry = self.registry.clone();
        let summary_tx = self.summary_tx.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let summary = registry.tick(Utc::now()).await;
                        summary_tx.send_replace(summary);
                    }
                }
            }
        });
    }

    /// Stop the ticker.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
    }
}
