//! Work items handed to the worker pool.

use crate::address::IpAddress;
use crate::dns_cache::DnsLookup;
use crate::host_check::HostCheck;
use crate::timestamp::TimeStamp;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a work item, used to park and resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkKind {
    HealthCheck(HostCheck),
    DnsLookup(DnsLookup),
}

/// One unit of work: a health check of an address or a DNS lookup.
///
/// `start` and `end` bound the window in which the item should run.
/// An item dequeued after `end` is late.
#[derive(Debug, Clone)]
pub struct Work {
    pub id: WorkId,
    pub hostname: String,
    /// Target address, or the unspecified address of the stack for lookups.
    pub address: IpAddress,
    pub kind: WorkKind,
    pub start: TimeStamp,
    pub end: TimeStamp,
}

impl Work {
    pub fn health_check(
        hostname: impl Into<String>,
        address: IpAddress,
        check: HostCheck,
        start: TimeStamp,
        end: TimeStamp,
    ) -> Self {
        Self {
            id: WorkId(NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed)),
            hostname: hostname.into(),
            address,
            kind: WorkKind::HealthCheck(check),
            start,
            end,
        }
    }

    pub fn dns_lookup(hostname: impl Into<String>, lookup: DnsLookup, start: TimeStamp, end: TimeStamp) -> Self {
        Self {
            id: WorkId(NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed)),
            hostname: hostname.into(),
            address: IpAddress::unspecified(lookup.ipv6),
            kind: WorkKind::DnsLookup(lookup),
            start,
            end,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            WorkKind::HealthCheck(_) => "health check",
            WorkKind::DnsLookup(_) => "DNS lookup",
        }
    }

    /// Point after which the item counts as off schedule, `threshold_percent`
    /// of the window before `end`.
    pub fn late_after(&self, threshold_percent: u64) -> TimeStamp {
        let window = self.end - self.start;
        self.end - window * threshold_percent / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckType, DnsType, DualStack};

    #[test]
    fn test_ids_are_unique() {
        let check = HostCheck::new(CheckType::Tcp, 22, DualStack::Ipv4Only, "");
        let a = Work::health_check("h", IpAddress::Unset, check.clone(), TimeStamp::ZERO, TimeStamp::ZERO);
        let b = Work::health_check("h", IpAddress::Unset, check, TimeStamp::ZERO, TimeStamp::ZERO);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_dns_lookup_uses_stack_placeholder() {
        let lookup = DnsLookup::new(DnsType::Lookup, true);
        let w = Work::dns_lookup("h", lookup, TimeStamp::ZERO, TimeStamp::ZERO);
        assert_eq!(w.address, IpAddress::unspecified(true));
        assert_eq!(w.type_name(), "DNS lookup");
    }

    #[test]
    fn test_late_after() {
        let check = HostCheck::default();
        let w = Work::health_check(
            "h",
            IpAddress::Unset,
            check,
            TimeStamp::from_millis(1_000),
            TimeStamp::from_millis(2_000),
        );
        assert_eq!(w.late_after(10), TimeStamp::from_millis(1_900));
        assert_eq!(w.late_after(0), TimeStamp::from_millis(2_000));
    }
}
