//! DNS results and re-resolution scheduling.

use crate::address::IpAddress;
use crate::event_loop::Scheduler;
use crate::timestamp::{HOUR_MS, TimeStamp};
use crate::types::{
    DEFAULT_DNS_RESOLUTION_TIMEOUT, DEFAULT_DNS_TTL, DnsType, DualStack, QueryState, Schedule,
};
use crate::work::Work;
use crate::work_queue::WorkQueue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity of a resolution: which source resolves it and for which stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DnsLookup {
    pub dns_type: DnsType,
    pub ipv6: bool,
}

impl DnsLookup {
    pub fn new(dns_type: DnsType, ipv6: bool) -> Self {
        Self { dns_type, ipv6 }
    }
}

/// Resolved addresses of one (hostname, lookup) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResult {
    pub addresses: BTreeSet<IpAddress>,
    /// Addresses dropped by the last update.
    pub expired: BTreeSet<IpAddress>,
    pub ttl: u64,
    pub query_timeout: u64,
    pub query_state: QueryState,
    /// Deadline of the query in progress.
    pub query_time: TimeStamp,
    pub result_time: TimeStamp,
}

impl Default for DnsResult {
    fn default() -> Self {
        Self::new(DEFAULT_DNS_TTL, DEFAULT_DNS_RESOLUTION_TIMEOUT)
    }
}

impl DnsResult {
    pub fn new(ttl: u64, query_timeout: u64) -> Self {
        Self {
            addresses: BTreeSet::new(),
            expired: BTreeSet::new(),
            ttl,
            query_timeout,
            query_state: QueryState::Inactive,
            query_time: TimeStamp::ZERO,
            result_time: TimeStamp::ZERO,
        }
    }

    /// Keep the tighter of the current and the given timings.
    pub fn update_timeouts(&mut self, ttl: u64, query_timeout: u64) {
        self.ttl = self.ttl.min(ttl);
        self.query_timeout = self.query_timeout.min(query_timeout);
    }

    /// Replace the address set, remembering what dropped out.
    pub fn update_query(&mut self, addresses: BTreeSet<IpAddress>) {
        self.expired = self.addresses.difference(&addresses).copied().collect();
        self.addresses = addresses;
    }

    pub fn start_query_at(&mut self, now: TimeStamp) -> TimeStamp {
        self.query_state = QueryState::InProgress;
        self.query_time = now + self.query_timeout;
        self.query_time
    }

    pub fn finish_query_at(&mut self, success: bool, now: TimeStamp) {
        self.query_state = if success {
            QueryState::Inactive
        } else {
            QueryState::Failed
        };
        self.result_time = now;
    }

    pub fn next_query_time_at(&self, now: TimeStamp) -> TimeStamp {
        match self.query_state {
            QueryState::Inactive => (self.result_time + self.ttl).max(now),
            QueryState::InProgress => (self.query_time + self.query_timeout).max(now),
            QueryState::Failed => self.result_time + self.ttl,
            QueryState::Queued => now + HOUR_MS,
        }
    }

    pub fn has_addresses(&self) -> bool {
        !self.addresses.is_empty()
    }

    /// Whether a lookup ever completed or addresses were carried in.
    pub fn is_resolved(&self) -> bool {
        self.result_time != TimeStamp::ZERO || self.has_addresses()
    }
}

/// Addresses configured or added at runtime for `dns-type: static` hosts.
#[derive(Debug, Default)]
pub struct StaticDnsTable {
    entries: RwLock<BTreeMap<(String, bool), BTreeSet<IpAddress>>>,
}

impl StaticDnsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add addresses for `host`, split by family.
    pub fn add(&self, host: &str, addresses: impl IntoIterator<Item = IpAddress>) {
        let mut entries = self.entries.write();
        for address in addresses.into_iter().filter(IpAddress::is_set) {
            entries
                .entry((host.to_string(), address.is_v6()))
                .or_default()
                .insert(address);
        }
    }

    pub fn remove(&self, host: &str, addresses: impl IntoIterator<Item = IpAddress>) {
        let mut entries = self.entries.write();
        for address in addresses {
            if let Some(set) = entries.get_mut(&(host.to_string(), address.is_v6())) {
                set.remove(&address);
            }
        }
    }

    pub fn get(&self, host: &str, ipv6: bool) -> BTreeSet<IpAddress> {
        self.entries
            .read()
            .get(&(host.to_string(), ipv6))
            .cloned()
            .unwrap_or_default()
    }

}

type Entry = Arc<RwLock<DnsResult>>;

/// Map from hostname and lookup identity to resolution state.
///
/// The outer lock guards which keys exist, the per-entry lock guards the
/// result itself.
#[derive(Debug)]
pub struct DnsCache {
    entries: RwLock<BTreeMap<String, BTreeMap<DnsLookup, Entry>>>,
    static_table: Arc<StaticDnsTable>,
    default_ttl: u64,
    default_timeout: u64,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::with_defaults(
            DEFAULT_DNS_TTL,
            DEFAULT_DNS_RESOLUTION_TIMEOUT,
            Arc::new(StaticDnsTable::new()),
        )
    }
}

impl DnsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache sharing `static_table`. `ttl` and `timeout`
    /// replace zero values passed to [`DnsCache::insert_dns_entry`].
    pub fn with_defaults(ttl: u64, timeout: u64, static_table: Arc<StaticDnsTable>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            static_table,
            default_ttl: if ttl == 0 { DEFAULT_DNS_TTL } else { ttl },
            default_timeout: if timeout == 0 {
                DEFAULT_DNS_RESOLUTION_TIMEOUT
            } else {
                timeout
            },
        }
    }

    fn entry(&self, name: &str, lookup: DnsLookup) -> Option<Entry> {
        self.entries.read().get(name)?.get(&lookup).cloned()
    }

    fn entry_or_warn(&self, name: &str, lookup: DnsLookup, op: &str) -> Option<Entry> {
        let entry = self.entry(name, lookup);
        if entry.is_none() {
            debug!(host = name, dns_type = %lookup.dns_type, ipv6 = lookup.ipv6, op, "Missing DNS entry in cache");
        }
        entry
    }

    /// Register a lookup. Zero values fall back to the cache defaults, and
    /// an existing entry keeps the tighter timings.
    pub fn insert_dns_entry(&self, name: &str, lookup: DnsLookup, ttl: u64, timeout: u64) {
        let ttl = if ttl == 0 { self.default_ttl } else { ttl };
        let timeout = if timeout == 0 { self.default_timeout } else { timeout };
        let mut entries = self.entries.write();
        let per_host = entries.entry(name.to_string()).or_default();
        match per_host.get(&lookup) {
            Some(existing) => existing.write().update_timeouts(ttl, timeout),
            None => {
                per_host.insert(lookup, Arc::new(RwLock::new(DnsResult::new(ttl, timeout))));
            }
        }
    }

    /// Carry addresses of a previous generation into this cache.
    pub fn update_reload_dns_entry(
        &self,
        name: &str,
        addresses: &BTreeSet<IpAddress>,
        v4: Option<&DnsResult>,
        v6: Option<&DnsResult>,
        dns_type: DnsType,
    ) {
        for (ipv6, previous) in [(false, v4), (true, v6)] {
            let family: BTreeSet<IpAddress> = addresses
                .iter()
                .filter(|a| a.is_v6() == ipv6)
                .copied()
                .collect();
            if family.is_empty() {
                continue;
            }
            let lookup = DnsLookup::new(dns_type, ipv6);
            let entry = {
                let mut entries = self.entries.write();
                entries
                    .entry(name.to_string())
                    .or_default()
                    .entry(lookup)
                    .or_default()
                    .clone()
            };
            {
                let mut result = entry.write();
                if let Some(previous) = previous {
                    result.result_time = previous.result_time;
                }
                result.update_query(family.clone());
            }
            if dns_type == DnsType::Static {
                self.static_table
                    .add(name, family.into_iter().filter(|a| !a.is_unspecified()));
            }
        }
    }

    /// Replace the addresses of a completed lookup.
    pub fn update_dns_entry(&self, name: &str, lookup: DnsLookup, addresses: BTreeSet<IpAddress>) -> bool {
        match self.entry_or_warn(name, lookup, "update_dns_entry") {
            Some(entry) => {
                entry.write().update_query(addresses);
                true
            }
            None => false,
        }
    }

    pub fn finish_query(&self, name: &str, lookup: DnsLookup, success: bool) {
        self.finish_query_at(name, lookup, success, TimeStamp::now())
    }

    pub fn finish_query_at(&self, name: &str, lookup: DnsLookup, success: bool, now: TimeStamp) {
        if let Some(entry) = self.entry_or_warn(name, lookup, "finish_query") {
            entry.write().finish_query_at(success, now);
        }
    }

    /// Cached addresses of `name` for every stack in `dual_stack`.
    ///
    /// Failed lookups keep the last known addresses.
    pub fn addresses(&self, name: &str, dual_stack: DualStack, dns_type: DnsType) -> BTreeSet<IpAddress> {
        let mut out = BTreeSet::new();
        for ipv6 in dual_stack.stacks() {
            if let Some(entry) = self.entry(name, DnsLookup::new(dns_type, ipv6)) {
                out.extend(entry.read().addresses.iter().copied());
            }
        }
        out
    }

    /// Cached addresses of one stack, or `None` while that stack has no
    /// resolution yet. An empty set means the stack resolved to nothing.
    pub fn stack_addresses(&self, name: &str, lookup: DnsLookup) -> Option<BTreeSet<IpAddress>> {
        let entry = self.entry(name, lookup)?;
        let result = entry.read();
        result.is_resolved().then(|| result.addresses.clone())
    }

    /// Addresses dropped by the last update of each stack in `dual_stack`.
    pub fn expired_addresses(&self, name: &str, dual_stack: DualStack, dns_type: DnsType) -> BTreeSet<IpAddress> {
        let mut out = BTreeSet::new();
        for ipv6 in dual_stack.stacks() {
            if let Some(entry) = self.entry(name, DnsLookup::new(dns_type, ipv6)) {
                out.extend(entry.read().expired.iter().copied());
            }
        }
        out
    }

    pub fn is_valid_address(&self, name: &str, dual_stack: DualStack, dns_type: DnsType, address: IpAddress) -> bool {
        dual_stack.stacks().any(|ipv6| {
            self.entry(name, DnsLookup::new(dns_type, ipv6))
                .is_some_and(|entry| entry.read().addresses.contains(&address))
        })
    }

    pub fn dns_result(&self, name: &str, lookup: DnsLookup) -> Option<DnsResult> {
        self.entry(name, lookup).map(|entry| entry.read().clone())
    }

    /// Every registered (hostname, lookup) pair.
    pub fn entries(&self) -> Vec<(String, DnsLookup)> {
        self.entries
            .read()
            .iter()
            .flat_map(|(name, lookups)| lookups.keys().map(move |lookup| (name.clone(), *lookup)))
            .collect()
    }

    pub fn query_needed(&self, name: &str, lookup: DnsLookup) -> Schedule {
        self.query_needed_at(name, lookup, TimeStamp::now())
    }

    /// Decide whether a timer for this lookup should queue work, re-arm or
    /// do nothing.
    pub fn query_needed_at(&self, name: &str, lookup: DnsLookup, now: TimeStamp) -> Schedule {
        let mut next = now + HOUR_MS;
        let mut already_scheduled = true;
        let mut changed = false;
        if let Some(entry) = self.entry_or_warn(name, lookup, "query_needed") {
            let result = entry.read();
            if result.query_state.is_idle() {
                already_scheduled = false;
                let due = result.next_query_time_at(now);
                if due < next {
                    changed = true;
                    next = due;
                }
            }
        }
        if next <= now {
            Schedule::Work
        } else if already_scheduled || changed {
            Schedule::None
        } else {
            Schedule::Event
        }
    }

    pub fn next_query_time(&self, name: &str, lookup: DnsLookup) -> TimeStamp {
        self.next_query_time_at(name, lookup, TimeStamp::now())
    }

    pub fn next_query_time_at(&self, name: &str, lookup: DnsLookup, now: TimeStamp) -> TimeStamp {
        match self.entry(name, lookup) {
            Some(entry) => entry.read().next_query_time_at(now),
            None => {
                warn!(host = name, dns_type = %lookup.dns_type, ipv6 = lookup.ipv6, "Missing DNS entry for next query time");
                now + HOUR_MS
            }
        }
    }

    pub fn start_dns_query(&self, name: &str, lookup: DnsLookup) -> Option<TimeStamp> {
        self.start_dns_query_at(name, lookup, TimeStamp::now())
    }

    /// Mark a lookup in progress and return its deadline.
    pub fn start_dns_query_at(&self, name: &str, lookup: DnsLookup, now: TimeStamp) -> Option<TimeStamp> {
        self.entry_or_warn(name, lookup, "start_dns_query")
            .map(|entry| entry.write().start_query_at(now))
    }

    /// Queue a resolution for `name`.
    ///
    /// Does nothing when the entry is unknown, resolves with
    /// [`DnsType::None`], or already has a query outstanding.
    pub fn queue_dns_query(&self, name: &str, lookup: DnsLookup, queue: &WorkQueue) -> bool {
        if lookup.dns_type == DnsType::None {
            return false;
        }
        let Some(entry) = self.entry_or_warn(name, lookup, "queue_dns_query") else {
            return false;
        };
        let now = TimeStamp::now();
        let ttl = {
            let mut result = entry.write();
            if !result.query_state.is_idle() {
                debug!(host = name, ipv6 = lookup.ipv6, "DNS query already outstanding");
                return false;
            }
            result.query_state = QueryState::Queued;
            result.ttl
        };
        debug!(host = name, ipv6 = lookup.ipv6, "Queueing DNS lookup");
        queue.insert_work(Work::dns_lookup(name, lookup, now, now + ttl));
        true
    }

    /// Walk every entry and queue lookups that are due or waiting on a
    /// timer. With `restart`, entries that need nothing get a timer armed at
    /// their next query time.
    pub fn queue_dns_lookups(&self, queue: &WorkQueue, scheduler: &dyn Scheduler, restart: bool) {
        for (name, lookup) in self.entries() {
            if lookup.dns_type == DnsType::None {
                continue;
            }
            match self.query_needed(&name, lookup) {
                Schedule::Work | Schedule::Event => {
                    self.queue_dns_query(&name, lookup, queue);
                }
                Schedule::None if restart => {
                    let at = self.next_query_time(&name, lookup);
                    scheduler.add_dns_timeout(&name, lookup, at);
                }
                Schedule::None => {}
            }
        }
    }

    pub fn static_table(&self) -> Arc<StaticDnsTable> {
        self.static_table.clone()
    }

    pub fn add_static_addresses(&self, host: &str, addresses: impl IntoIterator<Item = IpAddress>) {
        self.static_table.add(host, addresses);
    }

    pub fn remove_static_addresses(&self, host: &str, addresses: impl IntoIterator<Item = IpAddress>) {
        self.static_table.remove(host, addresses);
    }

    pub fn static_addresses(&self, host: &str, ipv6: bool) -> BTreeSet<IpAddress> {
        self.static_table.get(host, ipv6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::MockScheduler;
    use std::sync::atomic::AtomicBool;

    fn v4() -> DnsLookup {
        DnsLookup::new(DnsType::Lookup, false)
    }

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_insert_keeps_tighter_timeouts() {
        let cache = DnsCache::new();
        cache.insert_dns_entry("web1", v4(), 0, 0);
        let result = cache.dns_result("web1", v4()).unwrap();
        assert_eq!(result.ttl, DEFAULT_DNS_TTL);
        assert_eq!(result.query_timeout, DEFAULT_DNS_RESOLUTION_TIMEOUT);

        cache.insert_dns_entry("web1", v4(), 1_000, 2_000);
        cache.insert_dns_entry("web1", v4(), 5_000, 500);
        let result = cache.dns_result("web1", v4()).unwrap();
        assert_eq!(result.ttl, 1_000);
        assert_eq!(result.query_timeout, 500);
    }

    #[test]
    fn test_update_tracks_expired_addresses() {
        let cache = DnsCache::new();
        cache.insert_dns_entry("web1", v4(), 1_000, 1_000);
        cache.update_dns_entry("web1", v4(), [ip("1.1.1.1"), ip("2.2.2.2")].into());
        cache.update_dns_entry("web1", v4(), [ip("2.2.2.2"), ip("3.3.3.3")].into());
        assert_eq!(
            cache.expired_addresses("web1", DualStack::Ipv4Only, DnsType::Lookup),
            [ip("1.1.1.1")].into()
        );
        assert!(cache.is_valid_address("web1", DualStack::Both, DnsType::Lookup, ip("3.3.3.3")));
        assert!(!cache.is_valid_address("web1", DualStack::Ipv6Only, DnsType::Lookup, ip("3.3.3.3")));
    }

    #[test]
    fn test_failed_query_keeps_addresses() {
        let cache = DnsCache::new();
        cache.insert_dns_entry("web1", v4(), 1_000, 1_000);
        cache.update_dns_entry("web1", v4(), [ip("1.2.3.4")].into());
        cache.finish_query_at("web1", v4(), false, TimeStamp::from_millis(10));
        assert_eq!(
            cache.addresses("web1", DualStack::Ipv4Only, DnsType::Lookup),
            [ip("1.2.3.4")].into()
        );
        assert_eq!(cache.dns_result("web1", v4()).unwrap().query_state, QueryState::Failed);
    }

    #[test]
    fn test_stack_addresses_tells_unresolved_from_empty() {
        let cache = DnsCache::new();
        let v6 = DnsLookup::new(DnsType::Lookup, true);
        cache.insert_dns_entry("web1", v4(), 1_000, 1_000);
        cache.insert_dns_entry("web1", v6, 1_000, 1_000);
        cache.update_dns_entry("web1", v4(), [ip("1.2.3.4")].into());
        cache.finish_query_at("web1", v4(), true, TimeStamp::from_millis(10));

        assert_eq!(cache.stack_addresses("web1", v4()), Some([ip("1.2.3.4")].into()));
        assert_eq!(cache.stack_addresses("web1", v6), None);
        assert_eq!(cache.stack_addresses("web2", v4()), None);
        // The union still carries the resolved stack
        assert_eq!(
            cache.addresses("web1", DualStack::Both, DnsType::Lookup),
            [ip("1.2.3.4")].into()
        );

        cache.finish_query_at("web1", v6, true, TimeStamp::from_millis(20));
        assert_eq!(cache.stack_addresses("web1", v6), Some(BTreeSet::new()));
    }

    #[test]
    fn test_next_query_time_by_state() {
        let mut result = DnsResult::new(1_000, 200);
        let now = TimeStamp::from_millis(10_000);
        assert_eq!(result.next_query_time_at(now), now);
        result.finish_query_at(true, TimeStamp::from_millis(9_500));
        assert_eq!(result.next_query_time_at(now), TimeStamp::from_millis(10_500));
        result.query_state = QueryState::Queued;
        assert_eq!(result.next_query_time_at(now), now + HOUR_MS);
        let deadline = result.start_query_at(now);
        assert_eq!(deadline, TimeStamp::from_millis(10_200));
        assert_eq!(result.next_query_time_at(now), TimeStamp::from_millis(10_400));
        result.finish_query_at(false, now);
        assert_eq!(result.next_query_time_at(now), TimeStamp::from_millis(11_000));
    }

    #[test]
    fn test_query_needed() {
        let cache = DnsCache::new();
        let now = TimeStamp::from_millis(100_000);
        cache.insert_dns_entry("web1", v4(), 1_000, 1_000);
        assert_eq!(cache.query_needed_at("web1", v4(), now), Schedule::Work);

        cache.finish_query_at("web1", v4(), true, now);
        assert_eq!(cache.query_needed_at("web1", v4(), now + 10), Schedule::None);
        assert_eq!(cache.query_needed_at("web1", v4(), now + 1_000), Schedule::Work);
        assert_eq!(cache.query_needed_at("unknown", v4(), now), Schedule::None);
    }

    #[test]
    fn test_queue_dns_query_is_idempotent() {
        let cache = DnsCache::new();
        let queue = WorkQueue::default();
        cache.insert_dns_entry("web1", v4(), 1_000, 1_000);
        assert!(cache.queue_dns_query("web1", v4(), &queue));
        assert!(!cache.queue_dns_query("web1", v4(), &queue));
        assert!(!cache.queue_dns_query("missing", v4(), &queue));
        assert_eq!(queue.queue_size(), 1);

        let stop = AtomicBool::new(false);
        let work = queue.get_work(&stop).unwrap();
        assert_eq!(work.hostname, "web1");
        assert_eq!(work.end - work.start, 1_000);
    }

    #[test]
    fn test_no_dns_type_never_queues() {
        let cache = DnsCache::new();
        let queue = WorkQueue::default();
        let lookup = DnsLookup::new(DnsType::None, false);
        cache.insert_dns_entry("web1", lookup, 1_000, 1_000);
        assert!(!cache.queue_dns_query("web1", lookup, &queue));
        assert_eq!(queue.queue_size(), 0);
    }

    #[test]
    fn test_queue_dns_lookups_arms_timers_on_restart() {
        let cache = DnsCache::new();
        let queue = WorkQueue::default();
        cache.insert_dns_entry("due", v4(), 1_000, 1_000);
        cache.insert_dns_entry("fresh", v4(), 60_000, 1_000);
        cache.finish_query("fresh", v4(), true);

        let mut scheduler = MockScheduler::new();
        scheduler
            .expect_add_dns_timeout()
            .withf(|name, _, _| name == "fresh")
            .times(1)
            .return_const(());
        cache.queue_dns_lookups(&queue, &scheduler, true);
        assert_eq!(queue.queue_size(), 1);
    }

    #[test]
    fn test_reload_entry_carries_addresses_and_static_table() {
        let cache = DnsCache::new();
        let mut previous = DnsResult::new(1_000, 1_000);
        previous.result_time = TimeStamp::from_millis(42);
        let addresses: BTreeSet<IpAddress> = [ip("10.0.0.1"), ip("::1")].into();
        cache.update_reload_dns_entry("web1", &addresses, Some(&previous), None, DnsType::Static);

        let v4 = cache.dns_result("web1", DnsLookup::new(DnsType::Static, false)).unwrap();
        assert_eq!(v4.result_time, TimeStamp::from_millis(42));
        assert_eq!(v4.addresses, [ip("10.0.0.1")].into());
        assert_eq!(cache.static_addresses("web1", true), [ip("::1")].into());
    }

    #[test]
    fn test_static_table() {
        let cache = DnsCache::new();
        cache.add_static_addresses("db", [ip("10.1.1.1"), ip("10.1.1.2"), ip("fe80::1")]);
        assert_eq!(cache.static_addresses("db", false).len(), 2);
        cache.remove_static_addresses("db", [ip("10.1.1.1")]);
        assert_eq!(cache.static_addresses("db", false), [ip("10.1.1.2")].into());
        assert_eq!(cache.static_addresses("db", true), [ip("fe80::1")].into());

        let shared = DnsCache::with_defaults(0, 0, cache.static_table());
        assert_eq!(shared.static_addresses("db", false), [ip("10.1.1.2")].into());
        shared.insert_dns_entry("db", DnsLookup::new(DnsType::Static, false), 0, 0);
        let result = shared.dns_result("db", DnsLookup::new(DnsType::Static, false)).unwrap();
        assert_eq!(result.ttl, DEFAULT_DNS_TTL);
    }
}
