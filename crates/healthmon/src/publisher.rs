//! Result publishing hooks.

use crate::check_result::CheckResult;
use crate::host_check::HostCheck;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Receives every stored check result.
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    /// Publish one result. `changed` is set when the result crossed a
    /// status edge.
    fn publish_result(
        &self,
        hostname: &str,
        check: &HostCheck,
        result: &CheckResult,
        host_groups: &[String],
        changed: bool,
    );
}

/// Drops everything.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish_result(&self, _: &str, _: &HostCheck, _: &CheckResult, _: &[String], _: bool) {}
}

/// Writes each result to the log.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish_result(
        &self,
        hostname: &str,
        check: &HostCheck,
        result: &CheckResult,
        host_groups: &[String],
        changed: bool,
    ) {
        info!(
            host = hostname,
            address = %result.address,
            check_type = %check.check_type,
            port = result.port,
            status = %result.host_status(),
            reason = %result.reason,
            response_ms = result.response_time,
            groups = %host_groups.join(","),
            changed,
            "Check result"
        );
    }
}

/// Forwards results whose host groups intersect a configured set, and
/// optionally only those that changed status.
pub struct FilteredPublisher {
    inner: Arc<dyn Publisher>,
    host_groups: BTreeSet<String>,
    only_on_change: bool,
}

impl FilteredPublisher {
    /// Create a new filter. An empty group set lets every group through.
    pub fn new(inner: Arc<dyn Publisher>, host_groups: BTreeSet<String>, only_on_change: bool) -> Self {
        Self {
            inner,
            host_groups,
            only_on_change,
        }
    }

    fn accepts(&self, host_groups: &[String], changed: bool) -> bool {
        if self.only_on_change && !changed {
            return false;
        }
        self.host_groups.is_empty() || host_groups.iter().any(|g| self.host_groups.contains(g))
    }
}

impl Publisher for FilteredPublisher {
    fn publish_result(
        &self,
        hostname: &str,
        check: &HostCheck,
        result: &CheckResult,
        host_groups: &[String],
        changed: bool,
    ) {
        if self.accepts(host_groups, changed) {
            self.inner
                .publish_result(hostname, check, result, host_groups, changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_by_group() {
        let mut inner = MockPublisher::new();
        inner
            .expect_publish_result()
            .withf(|host, _, _, _, _| host == "web1")
            .times(1)
            .return_const(());
        let publisher = FilteredPublisher::new(Arc::new(inner), ["frontend".to_string()].into(), false);

        let check = HostCheck::default();
        let result = CheckResult::default();
        publisher.publish_result("web1", &check, &result, &groups(&["frontend", "all"]), false);
        publisher.publish_result("db1", &check, &result, &groups(&["backend"]), true);
    }

    #[test]
    fn test_filter_only_on_change() {
        let mut inner = MockPublisher::new();
        inner
            .expect_publish_result()
            .withf(|_, _, _, _, changed| *changed)
            .times(1)
            .return_const(());
        let publisher = FilteredPublisher::new(Arc::new(inner), BTreeSet::new(), true);

        let check = HostCheck::default();
        let result = CheckResult::default();
        publisher.publish_result("web1", &check, &result, &groups(&["g"]), false);
        publisher.publish_result("web1", &check, &result, &groups(&["g"]), true);
    }
}
