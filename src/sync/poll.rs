//! Periodic refresh of the active vehicle
//!
//! The poll loop waits one full interval of quiet: any successful
//! foreground fetch resets the timer, so the loop never polls right after
//! the user refreshed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use super::scheduler::FetchOutcome;

/// Resettable countdown shared between the poll loop and foreground fetches
#[derive(Debug)]
pub struct RefreshTimer {
    interval: Duration,
    reset: Notify,
    resets: AtomicU64,
}

impl RefreshTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            reset: Notify::new(),
            resets: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restart the countdown of whoever is waiting in [`Self::elapsed`]
    pub fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.reset.notify_one();
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Complete once a full interval passes without a reset
    pub async fn elapsed(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => return,
                _ = self.reset.notified() => {
                    debug!("Refresh timer restarted");
                }
            }
        }
    }
}

/// Spawn the poll loop. It runs until the handle is aborted.
pub fn spawn_poll_task(engine: Arc<SyncEngine>) -> JoinHandle<()> {
    info!(
        interval_secs = engine.refresh_timer.interval().as_secs(),
        "Starting telemetry poll loop"
    );
    tokio::spawn(async move {
        loop {
            engine.refresh_timer.elapsed().await;

            let Some(vin) = engine.active_vin() else {
                debug!("No active vehicle to poll");
                continue;
            };
            match engine.fetch_snapshot(&vin, false).await {
                FetchOutcome::Updated => debug!(vin = %vin, "Scheduled refresh complete"),
                FetchOutcome::Empty => debug!(vin = %vin, "Scheduled refresh skipped"),
                FetchOutcome::Failed(e) => warn!(vin = %vin, error = %e, "Scheduled refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::test_support::{harness_with, Harness, MockApi};
    use serde_json::json;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_interval() {
        let timer = RefreshTimer::new(Duration::from_secs(60));
        let start = Instant::now();
        timer.elapsed().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_postpones_timer() {
        let timer = Arc::new(RefreshTimer::new(Duration::from_secs(3600)));
        let resetter = Arc::clone(&timer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1800)).await;
            resetter.reset();
        });

        let start = Instant::now();
        timer.elapsed().await;
        assert!(start.elapsed() >= Duration::from_secs(5400));
        assert_eq!(timer.reset_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_task_refreshes_active_vehicle() {
        let api = MockApi::default().with_telemetry("VIN1", json!({"speed": 12}));
        let config = SyncConfig {
            poll_interval: Duration::from_secs(60),
            ..SyncConfig::default()
        };
        let Harness { engine, api, .. } = harness_with(api, config);

        let handle = spawn_poll_task(Arc::clone(&engine));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.telemetry_calls(), 0, "no active vehicle yet");

        engine.live.send_modify(|s| s.vin = Some("VIN1".into()));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(api.telemetry_calls(), 1);
        assert_eq!(engine.state().signal("speed"), Some(&json!(12)));
        assert_eq!(engine.refresh_timer.reset_count(), 1);

        handle.abort();
    }
}
