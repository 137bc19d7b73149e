//! Prometheus metrics for the healthmon daemon.

use healthmon::{CheckType, EngineStats, HostStatus, Reason};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Check type (http, tcp, dns, ...)
    pub check_type: String,
    /// Reason the probe ended with
    pub reason: String,
}

/// Labels for per-check-type metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckTypeLabels {
    pub check_type: String,
}

/// Labels for status transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub check_type: String,
    /// New status (up, down, flapping)
    pub status: String,
}

/// Labels for batch trigger metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BatchTriggerLabels {
    /// Trigger reason (size_limit, time_delay, shutdown)
    pub trigger: String,
}

/// Labels for reload metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReloadLabels {
    /// success or failure
    pub result: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub error_type: String,
}

/// Metrics registry with all daemon metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Check results
    checks_total: Family<CheckLabels, Counter>,
    response_time_seconds: Family<CheckTypeLabels, Histogram>,
    status_transitions_total: Family<TransitionLabels, Counter>,

    // Engine
    queue_depth: Gauge,
    timers: Gauge,
    threads: Gauge,
    idle_threads: Gauge,
    config_version: Gauge,
    reloads_total: Family<ReloadLabels, Counter>,

    // Notifier
    notifications_batched_total: Counter,
    batches_sent_total: Family<BatchTriggerLabels, Counter>,
    batch_size: Histogram,
    batch_delay_seconds: Histogram,

    errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsRegistry {
    /// Create a new registry with custom batch histogram buckets
    pub fn new(batch_delay_buckets: &[f64], batch_size_buckets: &[f64]) -> Self {
        let mut registry = Registry::with_prefix("healthmon");

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register(
            "checks",
            "Health check results by check type and reason",
            checks_total.clone(),
        );

        // Exponential buckets from 1ms to ~16s
        let response_time_seconds = Family::<CheckTypeLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "response_time_seconds",
            "Health check response time in seconds",
            response_time_seconds.clone(),
        );

        let status_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "status_transitions",
            "Host status transitions by new status",
            status_transitions_total.clone(),
        );

        let queue_depth = Gauge::default();
        registry.register("work_queue_depth", "Work items waiting for a worker", queue_depth.clone());

        let timers = Gauge::default();
        registry.register("timer_queue_size", "Armed scheduling timers", timers.clone());

        let threads = Gauge::default();
        registry.register("worker_threads", "Worker threads in the pool", threads.clone());

        let idle_threads = Gauge::default();
        registry.register("idle_worker_threads", "Worker threads waiting for work", idle_threads.clone());

        let config_version = Gauge::default();
        registry.register(
            "config_version",
            "Version of the running configuration generation",
            config_version.clone(),
        );

        let reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register("reloads", "Configuration reloads by result", reloads_total.clone());

        let notifications_batched_total = Counter::default();
        registry.register(
            "notifications_batched",
            "Total notifications batched",
            notifications_batched_total.clone(),
        );

        let batches_sent_total = Family::<BatchTriggerLabels, Counter>::default();
        registry.register(
            "notification_batches",
            "Total notification batches sent",
            batches_sent_total.clone(),
        );

        let batch_size = Histogram::new(batch_size_buckets.iter().copied());
        registry.register("batch_size", "Notification batch size", batch_size.clone());

        let batch_delay_seconds = Histogram::new(batch_delay_buckets.iter().copied());
        registry.register(
            "batch_delay_seconds",
            "Actual batch delay in seconds",
            batch_delay_seconds.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register("errors", "Total errors by type", errors_total.clone());

        Self {
            registry,
            checks_total,
            response_time_seconds,
            status_transitions_total,
            queue_depth,
            timers,
            threads,
            idle_threads,
            config_version,
            reloads_total,
            notifications_batched_total,
            batches_sent_total,
            batch_size,
            batch_delay_seconds,
            errors_total,
        }
    }

    /// Record a health check result
    pub fn record_check(&self, check_type: CheckType, reason: Reason, response_time: Duration) {
        self.checks_total
            .get_or_create(&CheckLabels {
                check_type: check_type.to_string(),
                reason: reason.to_string(),
            })
            .inc();

        self.response_time_seconds
            .get_or_create(&CheckTypeLabels {
                check_type: check_type.to_string(),
            })
            .observe(response_time.as_secs_f64());
    }

    /// Record a status edge
    pub fn record_transition(&self, check_type: CheckType, status: HostStatus) {
        self.status_transitions_total
            .get_or_create(&TransitionLabels {
                check_type: check_type.to_string(),
                status: status_label(status).to_string(),
            })
            .inc();
    }

    /// Copy engine counters into the gauges
    pub fn update_engine(&self, stats: &EngineStats) {
        self.queue_depth.set(stats.queue_depth as i64);
        self.timers.set(stats.timers as i64);
        self.threads.set(stats.threads as i64);
        self.idle_threads.set(stats.idle_threads as i64);
        self.config_version.set(stats.version as i64);
    }

    pub fn record_reload(&self, success: bool) {
        self.reloads_total
            .get_or_create(&ReloadLabels {
                result: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    /// Record notification batched
    pub fn record_notification_batched(&self) {
        self.notifications_batched_total.inc();
    }

    /// Record batch sent
    pub fn record_batch_sent(&self, size: usize, trigger: &str, delay: Duration) {
        self.batches_sent_total
            .get_or_create(&BatchTriggerLabels {
                trigger: trigger.to_string(),
            })
            .inc();

        self.batch_size.observe(size as f64);
        self.batch_delay_seconds.observe(delay.as_secs_f64());
    }

    /// Record error by type
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }
}

fn status_label(status: HostStatus) -> &'static str {
    match status {
        HostStatus::Up => "up",
        HostStatus::Down => "down",
        HostStatus::Flapping => "flapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(&[0.01, 0.1, 1.0], &[1.0, 10.0, 100.0])
    }

    fn encoded(registry: &MetricsRegistry) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &registry.registry).unwrap();
        buffer
    }

    #[test]
    fn test_record_check() {
        let registry = registry();
        registry.record_check(CheckType::Tcp, Reason::Success, Duration::from_millis(50));
        registry.record_check(CheckType::Tcp, Reason::ConnectFailure, Duration::from_millis(100));

        let text = encoded(&registry);
        assert!(text.contains(r#"healthmon_checks_total{check_type="tcp",reason="SUCCESS"} 1"#));
        assert!(text.contains(r#"healthmon_checks_total{check_type="tcp",reason="CONNECT_FAILURE"} 1"#));
        assert!(text.contains("healthmon_response_time_seconds_count{check_type=\"tcp\"} 2"));
    }

    #[test]
    fn test_record_transition() {
        let registry = registry();
        registry.record_transition(CheckType::Http, HostStatus::Down);
        registry.record_transition(CheckType::Http, HostStatus::Down);
        registry.record_transition(CheckType::Http, HostStatus::Flapping);

        let text = encoded(&registry);
        assert!(text.contains(r#"healthmon_status_transitions_total{check_type="http",status="down"} 2"#));
        assert!(text.contains(r#"healthmon_status_transitions_total{check_type="http",status="flapping"} 1"#));
    }

    #[test]
    fn test_engine_gauges() {
        let registry = registry();
        registry.update_engine(&EngineStats {
            version: 3,
            queue_depth: 7,
            timers: 120,
            threads: 8,
            idle_threads: 5,
            reloads: 2,
            reload_failures: 0,
        });
        registry.record_reload(true);
        registry.record_reload(false);

        let text = encoded(&registry);
        assert!(text.contains("healthmon_work_queue_depth 7"));
        assert!(text.contains("healthmon_timer_queue_size 120"));
        assert!(text.contains("healthmon_idle_worker_threads 5"));
        assert!(text.contains("healthmon_config_version 3"));
        assert!(text.contains(r#"healthmon_reloads_total{result="failure"} 1"#));
    }

    #[test]
    fn test_batch_metrics() {
        let registry = registry();
        registry.record_notification_batched();
        registry.record_batch_sent(50, "size_limit", Duration::from_millis(100));
        registry.record_batch_sent(10, "time_delay", Duration::from_millis(50));
        registry.record_error("notification_dropped");

        let text = encoded(&registry);
        assert!(text.contains("healthmon_notifications_batched_total 1"));
        assert!(text.contains(r#"healthmon_notification_batches_total{trigger="size_limit"} 1"#));
        assert!(text.contains("healthmon_batch_size_count 2"));
        assert!(text.contains(r#"healthmon_errors_total{error_type="notification_dropped"} 1"#));
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(HostStatus::Up), "up");
        assert_eq!(status_label(HostStatus::Down), "down");
        assert_eq!(status_label(HostStatus::Flapping), "flapping");
    }
}
