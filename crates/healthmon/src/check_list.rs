//! Registry of every (hostname, host check) entry and its parameter sets.
//!
//! The registry lock only guards which entries exist. Statistics live behind
//! each [`CheckParams`]' own lock, so probe completions for unrelated hosts
//! never serialize on the registry.

use crate::address::IpAddress;
use crate::check_params::{CheckParams, CheckSettings};
use crate::check_result::{CheckOutcome, CheckResult};
use crate::dns_cache::{DnsCache, DnsLookup};
use crate::host_check::HostCheck;
use crate::host_group::HostGroup;
use crate::publisher::Publisher;
use crate::storage::{StorageBackend, StoredCheck};
use crate::timestamp::{HOUR_MS, TimeStamp};
use crate::types::{DnsType, HostStatus, Schedule};
use crate::work::Work;
use crate::work_queue::WorkQueue;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Identifies one parameter set of one entry, optionally narrowed to an
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckHeader {
    pub hostname: String,
    pub address: IpAddress,
    pub check: HostCheck,
    pub settings: CheckSettings,
}

/// Host checks waiting on the resolution of a (hostname, DNS type) pair.
#[derive(Debug, Default)]
pub struct WaitList {
    entries: RwLock<BTreeMap<(String, DnsType), Vec<HostCheck>>>,
}

impl WaitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hostname: &str, dns_type: DnsType, check: HostCheck) {
        let mut entries = self.entries.write();
        let checks = entries.entry((hostname.to_string(), dns_type)).or_default();
        if !checks.contains(&check) {
            checks.push(check);
        }
    }

    /// Checks released when `hostname` resolves with `dns_type`.
    pub fn checks(&self, hostname: &str, dns_type: DnsType) -> Vec<HostCheck> {
        self.entries
            .read()
            .get(&(hostname.to_string(), dns_type))
            .cloned()
            .unwrap_or_default()
    }
}

type Entries = BTreeMap<String, BTreeMap<HostCheck, Vec<Arc<CheckParams>>>>;

#[derive(Debug, Default)]
pub struct CheckList {
    entries: RwLock<Entries>,
    /// Set once the list is live. New entries are refused afterwards.
    guard: AtomicBool,
}

impl CheckList {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_guard(&self, guard: bool) {
        self.guard.store(guard, Ordering::Release);
    }

    fn guarded(&self) -> bool {
        self.guard.load(Ordering::Acquire)
    }

    /// Parameter sets registered for (hostname, check).
    pub fn params(&self, hostname: &str, check: &HostCheck) -> Vec<Arc<CheckParams>> {
        self.entries
            .read()
            .get(hostname)
            .and_then(|checks| checks.get(check))
            .cloned()
            .unwrap_or_default()
    }

    fn params_for(&self, header: &CheckHeader) -> Option<Arc<CheckParams>> {
        self.params(&header.hostname, &header.check)
            .into_iter()
            .find(|p| p.settings() == &header.settings)
    }

    /// Register every host of `group`. Hosts that already have an entry with
    /// equal settings share it and gain the group name.
    ///
    /// Returns the number of hosts registered.
    pub fn add_host_group(&self, group: &HostGroup) -> usize {
        if self.guarded() {
            warn!(group = %group.name, "Check list is live, ignoring host group");
            return 0;
        }
        let check = group.host_check();
        let settings = group.check_settings();
        let mut entries = self.entries.write();
        for host in &group.hosts {
            let sets = entries
                .entry(host.clone())
                .or_default()
                .entry(check.clone())
                .or_default();
            match sets.iter().find(|p| p.settings() == &settings) {
                Some(existing) => existing.add_host_group(&group.name),
                None => {
                    let params = Arc::new(CheckParams::new(settings.clone()));
                    params.add_host_group(&group.name);
                    sets.push(params);
                }
            }
        }
        group.hosts.len()
    }

    /// Register addresses for an existing parameter set, tagging it with
    /// `group` when one is given.
    pub fn insert_check(
        &self,
        group: Option<&str>,
        hostname: &str,
        check: &HostCheck,
        settings: &CheckSettings,
        addresses: &BTreeSet<IpAddress>,
    ) -> bool {
        if self.guarded() {
            return false;
        }
        let header = CheckHeader {
            hostname: hostname.to_string(),
            address: IpAddress::Unset,
            check: check.clone(),
            settings: settings.clone(),
        };
        let Some(params) = self.params_for(&header) else {
            return false;
        };
        for address in addresses {
            params.empty_query(*address);
        }
        if let Some(group) = group {
            params.add_host_group(group);
        }
        true
    }

    /// Create one DNS entry per (hostname, stack) and register every host
    /// check on the wait list of its hostname.
    pub fn init_dns_cache(&self, cache: &DnsCache, wait_list: &WaitList) {
        if self.guarded() {
            return;
        }
        let entries = self.entries.read();
        for (hostname, checks) in entries.iter() {
            for (check, sets) in checks {
                for params in sets {
                    for ipv6 in check.dual_stack.stacks() {
                        cache.insert_dns_entry(
                            hostname,
                            DnsLookup::new(check.dns_type, ipv6),
                            params.ttl(),
                            params.timeout(),
                        );
                    }
                }
                wait_list.insert(hostname, check.dns_type, check.clone());
            }
        }
    }

    pub fn check_needed(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Schedule {
        self.check_needed_at(hostname, address, check, TimeStamp::now())
    }

    /// Decide what a timer for (hostname, address, check) should do.
    ///
    /// Placeholder addresses and addresses unknown to any parameter set are
    /// never scheduled.
    pub fn check_needed_at(
        &self,
        hostname: &str,
        address: IpAddress,
        check: &HostCheck,
        now: TimeStamp,
    ) -> Schedule {
        if !address.is_set() || address.is_unspecified() {
            return Schedule::None;
        }
        let mut next = now + HOUR_MS;
        let mut already_scheduled = true;
        let mut changed = false;
        for params in self.params(hostname, check) {
            if !params.is_valid_ip(address) {
                return Schedule::None;
            }
            if params.query_state(address).is_idle() {
                already_scheduled = false;
                let due = params.next_check_time_at(address, now);
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

    pub fn next_check_time(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> TimeStamp {
        self.next_check_time_at(hostname, address, check, TimeStamp::now())
    }

    /// Earliest due time over every parameter set of the entry.
    pub fn next_check_time_at(
        &self,
        hostname: &str,
        address: IpAddress,
        check: &HostCheck,
        now: TimeStamp,
    ) -> TimeStamp {
        self.params(hostname, check)
            .iter()
            .map(|p| p.next_check_time_at(address, now))
            .fold(now + HOUR_MS, TimeStamp::min)
    }

    /// Deadline of a work item queued now: the tightest TTL of the entry.
    pub fn check_deadline_at(&self, hostname: &str, check: &HostCheck, now: TimeStamp) -> TimeStamp {
        self.params(hostname, check)
            .iter()
            .map(|p| p.check_deadline_at(now))
            .fold(now + HOUR_MS, TimeStamp::min)
    }

    /// Mark the address queued in every parameter set and push a work item.
    ///
    /// Does nothing while a query for the address is outstanding.
    pub fn queue_check(&self, hostname: &str, address: IpAddress, check: &HostCheck, queue: &WorkQueue) -> bool {
        let sets = self.params(hostname, check);
        if sets.is_empty() {
            debug!(host = hostname, %address, "No check entry to queue");
            return false;
        }
        // The first set acts as the claim on the address.
        if !sets[0].try_queue_query(address) {
            debug!(host = hostname, %address, "Check already outstanding");
            return false;
        }
        debug!(host = hostname, %address, check = %check, "Queueing health check");
        for params in &sets[1..] {
            params.queue_query(address);
        }
        let now = TimeStamp::now();
        let end = self.check_deadline_at(hostname, check, now);
        queue.insert_work(Work::health_check(hostname, address, check.clone(), now, end));
        true
    }

    pub fn start_check(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Option<TimeStamp> {
        self.start_check_at(hostname, address, check, TimeStamp::now())
    }

    /// Move the queued address to in progress and return the deadline the
    /// plugin must respect: now plus the largest timeout of the entry.
    ///
    /// Returns `None` when no parameter set had the address queued, in
    /// which case the caller must not run the check.
    pub fn start_check_at(
        &self,
        hostname: &str,
        address: IpAddress,
        check: &HostCheck,
        now: TimeStamp,
    ) -> Option<TimeStamp> {
        let mut timeout = 0;
        let mut started = false;
        for params in self.params(hostname, check) {
            if params.start_query_at(address, now) {
                started = true;
                timeout = timeout.max(params.timeout());
            }
        }
        started.then(|| now + timeout)
    }

    pub fn update_check(
        &self,
        hostname: &str,
        address: IpAddress,
        check: &HostCheck,
        outcome: &CheckOutcome,
    ) -> Vec<HostStatus> {
        self.update_check_at(hostname, address, check, outcome, TimeStamp::now())
    }

    /// Apply a plugin outcome to every parameter set that knows the address.
    /// Returns the status edges crossed.
    pub fn update_check_at(
        &self,
        hostname: &str,
        address: IpAddress,
        check: &HostCheck,
        outcome: &CheckOutcome,
        now: TimeStamp,
    ) -> Vec<HostStatus> {
        self.params(hostname, check)
            .iter()
            .filter(|p| p.is_valid_ip(address))
            .filter_map(|p| p.update_check_at(hostname, address, outcome, check.port, now))
            .collect()
    }

    /// Store the current result of every parameter set that has one.
    pub fn store_check(&self, hostname: &str, address: IpAddress, check: &HostCheck, backend: &dyn StorageBackend) {
        for params in self.params(hostname, check) {
            let Some(result) = params.check_result(address) else {
                continue;
            };
            let record = StoredCheck {
                hostname: hostname.to_string(),
                check: check.clone(),
                settings: params.settings().clone(),
                host_groups: params.host_groups(),
                result: CheckResult { address, ..result },
            };
            if let Err(e) = backend.store_check_result(&record) {
                warn!(host = hostname, %address, error = %e, "Failed to store check result");
            }
        }
    }

    pub fn publish_check(&self, hostname: &str, address: IpAddress, check: &HostCheck, publisher: &dyn Publisher) {
        for params in self.params(hostname, check) {
            if let Some(result) = params.check_result(address) {
                let result = CheckResult { address, ..result };
                let changed = result.status_changed;
                publisher.publish_result(hostname, check, &result, &params.host_groups(), changed);
            }
        }
    }

    /// Drop the address from every parameter set and purge it from storage.
    pub fn invalidate_check(&self, hostname: &str, address: IpAddress, check: &HostCheck, backend: &dyn StorageBackend) {
        for params in self.params(hostname, check) {
            params.invalidate_result(address);
            if let Err(e) = backend.purge_check_result(hostname, address, check) {
                warn!(host = hostname, %address, error = %e, "Failed to purge check result");
            }
        }
        debug!(host = hostname, %address, "Invalidated check");
    }

    /// Record a result for an address that was never checked, typically the
    /// DNS failure placeholder.
    pub fn insert_empty_query(&self, hostname: &str, address: IpAddress, check: &HostCheck, outcome: &CheckOutcome) {
        for params in self.params(hostname, check) {
            params.record_dns_failure(address, outcome, check.port);
        }
        trace!(host = hostname, %address, "Recorded empty query");
    }

    /// One header per parameter set, with the address unset.
    pub fn all_checks(&self) -> Vec<CheckHeader> {
        let entries = self.entries.read();
        let mut out = Vec::new();
        for (hostname, checks) in entries.iter() {
            for (check, sets) in checks {
                for params in sets {
                    out.push(CheckHeader {
                        hostname: hostname.clone(),
                        address: IpAddress::Unset,
                        check: check.clone(),
                        settings: params.settings().clone(),
                    });
                }
            }
        }
        out
    }

    /// Copy a result into the parameter set named by `header`. Without
    /// `force` an existing newer record wins.
    pub fn update_check_result(&self, header: &CheckHeader, result: CheckResult, force: bool) -> bool {
        match self.params_for(header) {
            Some(params) => {
                params.replace_result(header.address, result, force);
                true
            }
            None => false,
        }
    }

    pub fn host_groups(&self, header: &CheckHeader) -> Option<Vec<String>> {
        self.params_for(header).map(|p| p.host_groups())
    }

    pub fn check_result(&self, header: &CheckHeader) -> Option<CheckResult> {
        self.params_for(header)?.check_result(header.address)
    }

    /// Every address result of the parameter set named by `header`.
    pub fn check_results(&self, header: &CheckHeader) -> Vec<CheckResult> {
        self.params_for(header).map(|p| p.results()).unwrap_or_default()
    }

    /// Administrative override. `None` applies to every address of the
    /// entry.
    pub fn set_force_host_status(&self, hostname: &str, check: &HostCheck, address: Option<IpAddress>, force_down: bool) {
        for params in self.params(hostname, check) {
            params.set_host_status(address, force_down);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(|checks| checks.values().map(Vec::len).sum::<usize>()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MockPublisher;
    use crate::storage::MockStorageBackend;
    use crate::types::{CheckType, QueryState, Reason, Response};
    use std::sync::Barrier;
    use std::thread;

    fn group(name: &str, hosts: &[&str]) -> HostGroup {
        HostGroup::new(name)
            .with_check(CheckType::Http, 80, "/health")
            .with_hosts(hosts.iter().copied())
    }

    fn addr() -> IpAddress {
        "10.0.0.1".parse().unwrap()
    }

    fn g_ttl() -> u64 {
        group("g", &[]).ttl
    }

    fn registered(list: &CheckList, g: &HostGroup) -> HostCheck {
        list.add_host_group(g);
        let check = g.host_check();
        for params in list.params("web1", &check) {
            params.empty_query(addr());
        }
        check
    }

    #[test]
    fn test_groups_share_equal_settings() {
        let list = CheckList::new();
        list.add_host_group(&group("g1", &["web1", "web2"]));
        list.add_host_group(&group("g2", &["web1"]));
        let mut other = group("g3", &["web1"]);
        other.ttl = 5_000;
        list.add_host_group(&other);

        let sets = list.params("web1", &other.host_check());
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].host_groups(), vec!["g1".to_string(), "g2".to_string()]);
        assert_eq!(sets[1].host_groups(), vec!["g3".to_string()]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.all_checks().len(), 3);
    }

    #[test]
    fn test_guard_blocks_additions() {
        let list = CheckList::new();
        list.set_guard(true);
        assert_eq!(list.add_host_group(&group("g1", &["web1"])), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_check_needed() {
        let list = CheckList::new();
        let g = group("g1", &["web1"]);
        let check = registered(&list, &g);
        let now = TimeStamp::from_millis(1_000_000);

        assert_eq!(list.check_needed_at("web1", addr(), &check, now), Schedule::Work);
        assert_eq!(
            list.check_needed_at("web1", "10.0.0.9".parse().unwrap(), &check, now),
            Schedule::None
        );
        assert_eq!(
            list.check_needed_at("web1", IpAddress::unspecified(false), &check, now),
            Schedule::None
        );

        let queue = WorkQueue::default();
        assert!(list.queue_check("web1", addr(), &check, &queue));
        assert_eq!(list.check_needed_at("web1", addr(), &check, now), Schedule::None);
    }

    #[test]
    fn test_queue_check_is_idempotent() {
        let list = CheckList::new();
        let check = registered(&list, &group("g1", &["web1"]));
        let queue = WorkQueue::default();
        assert!(list.queue_check("web1", addr(), &check, &queue));
        assert!(!list.queue_check("web1", addr(), &check, &queue));
        assert_eq!(queue.queue_size(), 1);

        let stop = AtomicBool::new(false);
        let work = queue.get_work(&stop).unwrap();
        assert_eq!(work.end - work.start, g_ttl());
    }

    #[test]
    fn test_full_check_cycle() {
        let list = CheckList::new();
        let check = registered(&list, &group("g1", &["web1"]));
        let queue = WorkQueue::default();
        list.queue_check("web1", addr(), &check, &queue);

        let now = TimeStamp::from_millis(5_000_000);
        let deadline = list.start_check_at("web1", addr(), &check, now);
        assert_eq!(deadline, Some(now + group("g", &[]).timeout));
        assert_eq!(list.params("web1", &check)[0].query_state(addr()), QueryState::InProgress);

        let outcome = CheckOutcome::success(now, now + 15);
        let edges = list.update_check_at("web1", addr(), &check, &outcome, now + 15);
        assert_eq!(edges, vec![HostStatus::Up]);

        let mut backend = MockStorageBackend::new();
        backend
            .expect_store_check_result()
            .withf(|r| r.hostname == "web1" && r.host_groups == vec!["g1".to_string()])
            .times(1)
            .returning(|_| Ok(()));
        list.store_check("web1", addr(), &check, &backend);

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_result()
            .withf(|_, _, result, _, changed| *changed && result.is_up())
            .times(1)
            .return_const(());
        list.publish_check("web1", addr(), &check, &publisher);

        assert_eq!(
            list.next_check_time_at("web1", addr(), &check, now + 20),
            now + 15 + g_ttl()
        );
    }

    #[test]
    fn test_second_start_is_refused() {
        let list = CheckList::new();
        let check = registered(&list, &group("g1", &["web1"]));
        let now = TimeStamp::from_millis(5_000_000);
        assert_eq!(list.start_check_at("web1", addr(), &check, now), None);

        let queue = WorkQueue::default();
        assert!(list.queue_check("web1", addr(), &check, &queue));
        assert!(list.start_check_at("web1", addr(), &check, now).is_some());
        assert_eq!(list.start_check_at("web1", addr(), &check, now + 1), None);

        let outcome = CheckOutcome::success(now, now + 15);
        assert_eq!(
            list.update_check_at("web1", addr(), &check, &outcome, now + 15),
            vec![HostStatus::Up]
        );
        assert!(list.update_check_at("web1", addr(), &check, &outcome, now + 16).is_empty());

        let result = list.params("web1", &check)[0].check_result(addr()).unwrap();
        assert_eq!(result.num_checks, 1);
        assert_eq!(result.check_time, now + 15);
    }

    #[test]
    fn test_concurrent_queue_check_enqueues_once() {
        for _ in 0..50 {
            let list = Arc::new(CheckList::new());
            let mut other = group("g2", &["web1"]);
            other.ttl = 5_000;
            list.add_host_group(&other);
            let check = registered(&list, &group("g1", &["web1"]));
            let queue = Arc::new(WorkQueue::default());
            let barrier = Arc::new(Barrier::new(4));

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let (list, queue, check, barrier) = (list.clone(), queue.clone(), check.clone(), barrier.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        list.queue_check("web1", addr(), &check, &queue)
                    })
                })
                .collect();
            let queued = handles.into_iter().map(|h| h.join().unwrap()).filter(|q| *q).count();

            assert_eq!(queued, 1);
            assert_eq!(queue.queue_size(), 1);
            for params in list.params("web1", &check) {
                assert_eq!(params.query_state(addr()), QueryState::Queued);
            }
        }
    }

    #[test]
    fn test_invalidate_purges_storage() {
        let list = CheckList::new();
        let check = registered(&list, &group("g1", &["web1"]));
        let mut backend = MockStorageBackend::new();
        backend
            .expect_purge_check_result()
            .times(1)
            .returning(|_, _, _| Ok(()));
        list.invalidate_check("web1", addr(), &check, &backend);
        assert!(!list.params("web1", &check)[0].is_valid_ip(addr()));
    }

    #[test]
    fn test_empty_query_records_dns_failure() {
        let list = CheckList::new();
        let g = group("g1", &["web1"]);
        list.add_host_group(&g);
        let check = g.host_check();
        let placeholder = IpAddress::unspecified(false);
        let now = TimeStamp::now();
        let outcome = CheckOutcome::new(Response::DnsFailed, Reason::DnsFailure, now, now);
        list.insert_empty_query("web1", placeholder, &check, &outcome);

        let header = CheckHeader {
            hostname: "web1".to_string(),
            address: placeholder,
            check: check.clone(),
            settings: g.check_settings(),
        };
        let result = list.check_result(&header).unwrap();
        assert_eq!(result.response, Response::DnsFailed);
        assert_eq!(result.check_time, now);
        assert_eq!(list.host_groups(&header), Some(vec!["g1".to_string()]));
    }

    #[test]
    fn test_init_dns_cache_per_stack() {
        let list = CheckList::new();
        let mut g = group("g1", &["web1"]);
        g.dual_stack = crate::types::DualStack::Both;
        list.add_host_group(&g);
        let cache = DnsCache::new();
        let wait_list = WaitList::new();
        list.init_dns_cache(&cache, &wait_list);

        assert_eq!(cache.entries().len(), 2);
        assert_eq!(wait_list.checks("web1", DnsType::Lookup).len(), 1);
        assert!(wait_list.checks("web1", DnsType::Static).is_empty());
    }

    #[test]
    fn test_force_host_status_and_insert_check() {
        let list = CheckList::new();
        let g = group("g1", &["web1"]);
        list.add_host_group(&g);
        let check = g.host_check();
        let addresses: BTreeSet<IpAddress> = [addr()].into();
        assert!(list.insert_check(Some("extra"), "web1", &check, &g.check_settings(), &addresses));
        assert!(!list.insert_check(None, "web9", &check, &g.check_settings(), &addresses));

        list.set_force_host_status("web1", &check, None, true);
        let params = &list.params("web1", &check)[0];
        assert!(params.check_result(addr()).unwrap().force_host_down);
        assert!(params.serves_group("extra"));
    }
}
