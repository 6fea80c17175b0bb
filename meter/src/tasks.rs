//! Long-lived background loops: directory resync and node heartbeat.

use crate::billing::BillingApi;
use crate::config::DirectoryConfig;
use crate::directory::TenantDirectory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, warn};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BackgroundTasks {
    directory: Arc<TenantDirectory>,
    api: Arc<dyn BillingApi>,
    resync_interval: Duration,
    heartbeat_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle for spawned background tasks
pub struct BackgroundTasksHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasksHandle {
    /// Signal every loop and wait for it to exit. A loop that has not
    /// stopped within the timeout is aborted, so nothing it was doing can
    /// complete after this returns.
    pub async fn shutdown(self) {
        info!("Stopping background tasks");
        let _ = self.shutdown_tx.send(true);

        for (i, handle) in self.handles.into_iter().enumerate() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = i, "Background task stopped"),
                Ok(Err(e)) => warn!(task = i, error = %e, "Background task panicked"),
                Err(_) => {
                    abort.abort();
                    warn!(task = i, "Background task shutdown timeout, aborted");
                }
            }
        }
        info!("Background tasks stopped");
    }
}

impl BackgroundTasks {
    pub fn new(directory: Arc<TenantDirectory>, api: Arc<dyn BillingApi>, config: &DirectoryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            directory,
            api,
            resync_interval: config.resync_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn start(self) -> BackgroundTasksHandle {
        let handles = vec![self.start_resync_task(), self.start_heartbeat_task()];
        info!(
            resync_interval_secs = self.resync_interval.as_secs(),
            heartbeat_interval_secs = self.heartbeat_interval.as_secs(),
            "Background tasks started"
        );
        BackgroundTasksHandle {
            shutdown_tx: self.shutdown_tx,
            handles,
        }
    }

    /// The first resync happens at startup, so the loop waits one period.
    fn start_resync_task(&self) -> JoinHandle<()> {
        let directory = Arc::clone(&self.directory);
        let period = self.resync_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // Shutdown cancels a resync in flight; the previous snapshot stays.
                tokio::select! {
                    result = directory.resync() => match result {
                        Ok(summary) => debug!(
                            tenants = summary.installed,
                            added = summary.added,
                            removed = summary.removed,
                            "Tenant directory synchronized"
                        ),
                        Err(e) => warn!(error = %e, "Resync failed, keeping previous tenant directory"),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Resync task shutting down");
        })
    }

    fn start_heartbeat_task(&self) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let period = self.heartbeat_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            // A slow heartbeat is followed by the next one right away.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                tokio::select! {
                    result = api.heartbeat() => match result {
                        Ok(status) => debug!(%status, "Heartbeat sent"),
                        Err(e) => warn!(error = %e, "Failed to send heartbeat"),
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Heartbeat task shutting down");
        })
    }
}
