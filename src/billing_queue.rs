//! Deferred billing threshold checks.
//!
//! Threshold checks are advisory and must never hold up a response, so the
//! gateway pushes each committed charge onto a bounded channel and a
//! background worker runs the checks in batches.
//!
//! - Push is lock-free (crossbeam channel) and never blocks
//! - When `max_pending` checks are queued, new ones are dropped and counted
//! - `shutdown()` makes the worker drain everything still queued, then exit

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::{
    config::BillingQueueConfig,
    observability::metrics,
    services::{BillingMonitor, Charge},
};

pub struct BillingQueue {
    sender: Sender<Charge>,
    receiver: Receiver<Charge>,
    batch_size: usize,
    flush_interval: Duration,
    max_pending: usize,
    shutdown: AtomicBool,
    dropped_count: AtomicU64,
}

impl BillingQueue {
    pub fn new(config: &BillingQueueConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.max_pending.max(1));
        Self {
            sender,
            receiver,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            max_pending: config.max_pending,
            shutdown: AtomicBool::new(false),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Queue a threshold check. Dropped if the queue is full.
    pub fn push(&self, charge: Charge) {
        match self.sender.try_send(charge) {
            Ok(()) => {}
            Err(TrySendError::Full(charge)) => {
                metrics::record_billing_check("dropped");
                let count = self.dropped_count.fetch_add(1, Ordering::Relaxed);
                // Every 100th drop
                if count.is_multiple_of(100) {
                    tracing::warn!(
                        dropped_count = count + 1,
                        max_pending = self.max_pending,
                        account_id = %charge.account_id,
                        "Billing queue full: dropping threshold check"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Spawn the worker that feeds queued charges to `monitor`.
    pub fn start_worker(
        self: &Arc<Self>,
        monitor: Arc<BillingMonitor>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(queue.batch_size);

            loop {
                queue.drain(&mut batch, queue.batch_size);
                if !batch.is_empty() {
                    queue.process(&monitor, &mut batch).await;
                }

                if queue.shutdown.load(Ordering::Acquire) {
                    queue.drain(&mut batch, usize::MAX);
                    if !batch.is_empty() {
                        queue.process(&monitor, &mut batch).await;
                    }
                    tracing::info!("Billing queue worker shutting down");
                    break;
                }

                // A full batch means more is probably waiting
                if queue.receiver.is_empty() {
                    tokio::time::sleep(queue.flush_interval).await;
                }
            }
        })
    }

    fn drain(&self, batch: &mut Vec<Charge>, max: usize) {
        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(charge) => batch.push(charge),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    async fn process(&self, monitor: &BillingMonitor, batch: &mut Vec<Charge>) {
        tracing::debug!(count = batch.len(), "Processing billing threshold checks");
        for charge in batch.drain(..) {
            monitor.record_and_check_logged(charge).await;
        }
    }

    /// Signal the worker to drain and exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::dec;
    use uuid::Uuid;

    use super::*;
    use crate::{
        alert_sink::RecordingSink,
        clock::SystemClock,
        db::{DbPool, tests::harness::create_account},
        models::{OperationKind, PlanTier},
        pricing::{PriceTable, PricingConfig},
    };

    fn charge(account_id: Uuid) -> Charge {
        Charge {
            account_id,
            kind: OperationKind::Prediction,
            quantity: 1,
            cost: dec!(0.10),
            entry_id: None,
            at: Utc::now(),
        }
    }

    fn config(max_pending: usize) -> BillingQueueConfig {
        BillingQueueConfig {
            max_pending,
            batch_size: 2,
            flush_interval_ms: 3_600_000,
        }
    }

    #[test]
    fn test_overflow_drops_new_checks() {
        let queue = BillingQueue::new(&config(3));
        let account_id = Uuid::new_v4();
        for _ in 0..3 {
            queue.push(charge(account_id));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 0);

        queue.push(charge(account_id));
        queue.push(charge(account_id));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_checks() {
        let db = DbPool::in_memory();
        let sink = Arc::new(RecordingSink::default());
        // Threshold of 1 minor unit: the first check alerts
        let monitor = Arc::new(BillingMonitor::new(
            db.accounts(),
            db.usage(),
            db.billing_alerts(),
            Arc::new(PriceTable::new(PricingConfig::default())),
            sink.clone(),
            Arc::new(SystemClock),
            1,
        ));
        let account = create_account(&db, "acme", PlanTier::Basic).await;

        let queue = Arc::new(BillingQueue::new(&config(100)));
        for _ in 0..5 {
            queue.push(charge(account.id));
        }

        let handle = queue.start_worker(monitor);
        queue.shutdown();
        handle.await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(sink.received().len(), 1);
    }
}
