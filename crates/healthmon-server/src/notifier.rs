//! Notifier for batching published check results.

use crate::metrics::MetricsRegistry;
use crate::types::{Notification, NotificationBatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

/// Notifier batches notifications and hands each batch downstream
pub struct Notifier {
    /// Notification receiver
    notify_rx: mpsc::Receiver<Notification>,

    /// Optional consumer of finished batches
    batch_tx: Option<mpsc::Sender<NotificationBatch>>,

    /// Batch delay
    batch_delay: Duration,

    /// Maximum batch size
    batch_size: usize,

    metrics: Option<Arc<MetricsRegistry>>,
}

impl Notifier {
    /// Create a new notifier
    pub fn new(
        notify_rx: mpsc::Receiver<Notification>,
        batch_delay: Duration,
        batch_size: usize,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            notify_rx,
            batch_tx: None,
            batch_delay,
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// Forward every batch to `batch_tx` after logging it
    pub fn with_sink(mut self, batch_tx: mpsc::Sender<NotificationBatch>) -> Self {
        self.batch_tx = Some(batch_tx);
        self
    }

    /// Run the notifier task until every sender is gone
    pub async fn run(mut self) {
        info!("Notifier task started");

        let mut batch = Vec::new();
        let mut batch_timer = interval(self.batch_delay);
        batch_timer.tick().await; // Skip first immediate tick

        let mut last_batch_time = Instant::now();

        loop {
            tokio::select! {
                received = self.notify_rx.recv() => {
                    let Some(notification) = received else {
                        self.send_batch(&mut batch, "shutdown", last_batch_time).await;
                        break;
                    };
                    debug!(
                        host = %notification.hostname,
                        address = %notification.address,
                        status = %notification.status,
                        "Received notification"
                    );
                    self.record(&notification);
                    batch.push(notification);

                    // Send batch if it reaches max size
                    if batch.len() >= self.batch_size {
                        self.send_batch(&mut batch, "size_limit", last_batch_time).await;
                        last_batch_time = Instant::now();
                        batch_timer.reset();
                    }
                }

                // Batch delay elapsed
                _ = batch_timer.tick() => {
                    if !batch.is_empty() && last_batch_time.elapsed() >= self.batch_delay {
                        self.send_batch(&mut batch, "time_delay", last_batch_time).await;
                        last_batch_time = Instant::now();
                    }
                }
            }
        }

        info!("Notifier task stopped");
    }

    fn record(&self, notification: &Notification) {
        let Some(ref m) = self.metrics else {
            return;
        };
        m.record_notification_batched();
        m.record_check(
            notification.check_type,
            notification.reason,
            Duration::from_millis(notification.response_time_ms),
        );
        if notification.changed {
            m.record_transition(notification.check_type, notification.status);
        }
    }

    /// Send a batch of notifications
    async fn send_batch(&self, batch: &mut Vec<Notification>, trigger: &str, started: Instant) {
        if batch.is_empty() {
            return;
        }

        let changed = batch.iter().filter(|n| n.changed).count();
        info!(size = batch.len(), changed, trigger, "Sending notification batch");

        if let Some(ref m) = self.metrics {
            m.record_batch_sent(batch.len(), trigger, started.elapsed());
        }

        let notifications = std::mem::take(batch);
        if let Some(ref tx) = self.batch_tx
            && let Err(e) = tx.send(NotificationBatch { notifications }).await
        {
            warn!(error = %e, "Failed to forward notification batch");
            if let Some(ref m) = self.metrics {
                m.record_error("batch_forward");
            }
        }
    }
}
