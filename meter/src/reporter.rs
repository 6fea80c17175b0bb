//! Batched, retrying delivery of usage records to the billing backend.
//!
//! Records are buffered under a mutex and swapped out wholesale when the
//! batch reaches its size threshold or the flush timer fires. The lock is
//! only ever held for the push or the swap, so submitting never waits on
//! the network.

use crate::billing::BillingApi;
use crate::config::ReporterConfig;
use crate::recorder::UsageRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReporterStats {
    pub pending_records: usize,
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub dropped_batches: u64,
    pub dropped_records: u64,
}

#[derive(Default)]
struct Counters {
    delivered_batches: AtomicU64,
    delivered_records: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_records: AtomicU64,
}

struct PendingBatch {
    records: Vec<UsageRecord>,
    closed: bool,
}

/// Delivers one swapped-out batch with bounded retries.
#[derive(Clone)]
struct Courier {
    api: Arc<dyn BillingApi>,
    max_attempts: u32,
    backoff_base: Duration,
    counters: Arc<Counters>,
}

impl Courier {
    async fn deliver(self, batch: Vec<UsageRecord>) {
        if batch.is_empty() {
            return;
        }
        let records = batch.len() as u64;
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.api.report_usage(&batch).await {
                Ok(()) => {
                    self.counters.delivered_batches.fetch_add(1, Ordering::Relaxed);
                    self.counters.delivered_records.fetch_add(records, Ordering::Relaxed);
                    debug!(records, attempt, "Usage batch delivered");
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.backoff_base * attempt;
                    warn!(records, attempt, error = %e, ?delay, "Usage report failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
                    self.counters.dropped_records.fetch_add(records, Ordering::Relaxed);
                    error!(
                        records,
                        attempts = max_attempts,
                        error = %e,
                        "Usage report failed after all attempts, dropping batch"
                    );
                }
            }
        }
    }
}

pub struct UsageReporter {
    batch_size: usize,
    pending: Mutex<PendingBatch>,
    courier: Courier,
    deliveries: TaskTracker,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl UsageReporter {
    /// Create a reporter and start its flush timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(api: Arc<dyn BillingApi>, config: &ReporterConfig) -> Arc<Self> {
        let batch_size = config.batch_size.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter = Arc::new(Self {
            batch_size,
            pending: Mutex::new(PendingBatch {
                records: Vec::with_capacity(batch_size),
                closed: false,
            }),
            courier: Courier {
                api,
                max_attempts: config.max_attempts,
                backoff_base: config.backoff_base(),
                counters: Arc::new(Counters::default()),
            },
            deliveries: TaskTracker::new(),
            shutdown_tx,
            timer: Mutex::new(None),
        });

        let timer = spawn_flush_timer(Arc::downgrade(&reporter), config.flush_interval(), shutdown_rx);
        *reporter.timer.lock() = Some(timer);
        reporter
    }

    /// Queue one record. A full batch is handed to a background delivery
    /// task; the caller never waits for it. No-op after shutdown.
    pub fn submit(&self, record: UsageRecord) {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.closed {
                debug!(tenant_id = %record.tenant_id, "Reporter closed, dropping usage record");
                return;
            }
            pending.records.push(record);
            if pending.records.len() < self.batch_size {
                return;
            }
            std::mem::replace(&mut pending.records, Vec::with_capacity(self.batch_size))
        };

        debug!(records = batch.len(), "Batch size reached, flushing");
        self.deliveries.spawn(self.courier.clone().deliver(batch));
    }

    /// Swap out whatever is pending and deliver it.
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut self.pending.lock().records);
        self.courier.clone().deliver(batch).await;
    }

    /// Stop accepting records, stop the timer, wait for in-flight deliveries
    /// and make one final delivery of whatever is still pending.
    pub async fn shutdown(&self) {
        let remaining = {
            let mut pending = self.pending.lock();
            if pending.closed {
                return;
            }
            pending.closed = true;
            std::mem::take(&mut pending.records)
        };

        let _ = self.shutdown_tx.send(true);
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        self.deliveries.close();
        self.deliveries.wait().await;

        info!(records = remaining.len(), "Draining usage reporter");
        self.courier.clone().deliver(remaining).await;
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    pub fn stats(&self) -> ReporterStats {
        let counters = &self.courier.counters;
        ReporterStats {
            pending_records: self.pending.lock().records.len(),
            delivered_batches: counters.delivered_batches.load(Ordering::Relaxed),
            delivered_records: counters.delivered_records.load(Ordering::Relaxed),
            dropped_batches: counters.dropped_batches.load(Ordering::Relaxed),
            dropped_records: counters.dropped_records.load(Ordering::Relaxed),
        }
    }
}

fn spawn_flush_timer(
    reporter: Weak<UsageReporter>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(reporter) = reporter.upgrade() else {
                        break;
                    };
                    reporter.flush().await;
                }
                _ = shutdown_rx.changed() => {
                    debug!("Usage flush timer shutting down");
                    break;
                }
            }
        }
    })
}
