//! Types shared by the server tasks.

use crate::metrics::MetricsRegistry;
use healthmon::{CheckResult, CheckType, HostCheck, HostStatus, IpAddress, Publisher, Reason, TimeStamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Batch delay for notifications
    pub batch_delay: Duration,

    /// Maximum batch size
    pub batch_size: usize,

    /// Notification channel buffer size
    pub channel_size: usize,

    /// Interval between backend commits
    pub commit_interval: Duration,

    /// Serve /metrics and /status
    pub http_enabled: bool,

    /// HTTP listen address
    pub http_listen: String,

    /// Histogram buckets for batch delay (seconds)
    pub metrics_batch_delay_buckets: Vec<f64>,

    /// Histogram buckets for batch size
    pub metrics_batch_size_buckets: Vec<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(100),
            batch_size: 100,
            channel_size: 10_000,
            commit_interval: Duration::from_secs(60),
            http_enabled: true,
            http_listen: "127.0.0.1:9090".to_string(),
            metrics_batch_delay_buckets: vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0],
            metrics_batch_size_buckets: vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0],
        }
    }
}

/// One published check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub hostname: String,
    pub address: IpAddress,
    pub check_type: CheckType,
    pub port: u16,
    pub status: HostStatus,
    pub reason: Reason,
    pub response_time_ms: u64,
    pub host_groups: Vec<String>,
    /// The result crossed a status edge
    pub changed: bool,
    pub check_time: TimeStamp,
}

impl Notification {
    pub fn new(hostname: &str, check: &HostCheck, result: &CheckResult, host_groups: &[String], changed: bool) -> Self {
        Self {
            hostname: hostname.to_string(),
            address: result.address,
            check_type: check.check_type,
            port: result.port,
            status: result.host_status(),
            reason: result.reason,
            response_time_ms: result.response_time,
            host_groups: host_groups.to_vec(),
            changed,
            check_time: result.check_time,
        }
    }
}

/// Batch of notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
}

/// Feeds published results into the notifier channel.
///
/// Called from engine worker threads, so it never blocks: a full channel
/// drops the notification.
pub struct ChannelPublisher {
    tx: mpsc::Sender<Notification>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<Notification>, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self { tx, metrics }
    }
}

impl Publisher for ChannelPublisher {
    fn publish_result(
        &self,
        hostname: &str,
        check: &HostCheck,
        result: &CheckResult,
        host_groups: &[String],
        changed: bool,
    ) {
        let notification = Notification::new(hostname, check, result, host_groups, changed);
        if let Err(e) = self.tx.try_send(notification) {
            let error_type = match e {
                TrySendError::Full(_) => "notification_dropped",
                TrySendError::Closed(_) => "notification_channel_closed",
            };
            warn!(host = hostname, address = %result.address, error_type, "Failed to queue notification");
            if let Some(ref m) = self.metrics {
                m.record_error(error_type);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthmon::types::StatusBits;

    fn up_result() -> CheckResult {
        CheckResult {
            address: "192.0.2.5".parse().unwrap(),
            port: 443,
            reason: Reason::Success,
            response_time: 12,
            status: StatusBits {
                hard: true,
                soft: true,
                flap: true,
            },
            ..CheckResult::default()
        }
    }

    #[test]
    fn test_notification_from_result() {
        let check = HostCheck {
            check_type: CheckType::Https,
            port: 443,
            ..HostCheck::default()
        };
        let n = Notification::new("web1", &check, &up_result(), &["web".to_string()], true);
        assert_eq!(n.status, HostStatus::Up);
        assert_eq!(n.check_type, CheckType::Https);
        assert_eq!(n.response_time_ms, 12);
        assert_eq!(n.host_groups, vec!["web".to_string()]);
        assert!(n.changed);
    }

    #[test]
    fn test_channel_publisher_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = ChannelPublisher::new(tx, None);
        let check = HostCheck::default();
        publisher.publish_result("web1", &check, &up_result(), &[], false);
        publisher.publish_result("web2", &check, &up_result(), &[], false);

        assert_eq!(rx.try_recv().unwrap().hostname, "web1");
        assert!(rx.try_recv().is_err());
    }
}
