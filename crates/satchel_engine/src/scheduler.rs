//! Automatic sync scheduling.
//!
//! Two triggers, and only two, start a sync automatically: the periodic
//! interval timer and the network monitor's reconnect event. Both defer to
//! the engine's own mutual exclusion - a busy engine simply drops the
//! trigger - and both respect the `auto_sync_enabled` setting.

use crate::engine::SyncEngine;
use crate::error::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Handle to the background scheduling task.
pub struct SyncScheduler {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl SyncScheduler {
    /// Spawns the scheduler for an engine.
    #[must_use]
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(engine, Arc::clone(&shutdown)));
        Self { handle, shutdown }
    }

    /// Stops the scheduler and waits for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

async fn run(engine: Arc<SyncEngine>, shutdown: Arc<Notify>) {
    let mut reconnects = engine.monitor().subscribe_reconnect();

    loop {
        // Re-read each iteration so runtime settings changes take effect
        let interval_minutes = engine.settings().sync_interval_minutes.max(1);
        let tick = tokio::time::sleep(Duration::from_secs(interval_minutes * 60));

        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tick => trigger(&engine, "interval").await,
            event = reconnects.recv() => match event {
                Ok(_) => trigger(&engine, "reconnect").await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "reconnect events lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn trigger(engine: &Arc<SyncEngine>, cause: &str) {
    if !engine.settings().auto_sync_enabled {
        return;
    }
    if !engine.can_sync() {
        tracing::debug!(cause, "skipping automatic sync, network unusable");
        return;
    }

    match engine.sync().await {
        Ok(report) => {
            tracing::debug!(
                cause,
                success = report.success,
                synced = report.entities_synced,
                "automatic sync finished"
            );
        }
        Err(SyncError::Busy) => {
            tracing::debug!(cause, "automatic sync skipped, cycle already running");
        }
        Err(e) => {
            tracing::warn!(cause, error = %e, "automatic sync failed");
        }
    }
}
