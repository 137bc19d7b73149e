//! One configuration generation and the reconciliation between two of them.

use crate::address::IpAddress;
use crate::check_list::{CheckHeader, CheckList, WaitList};
use crate::dns_cache::{DnsCache, DnsLookup, StaticDnsTable};
use crate::event_loop::Scheduler;
use crate::host_group::HostGroup;
use crate::plugins::{PluginSet, SystemDnsOptions};
use crate::publisher::{FilteredPublisher, NullPublisher, Publisher};
use crate::settings::{ConfigInfo, DaemonConfig, DaemonSettings};
use crate::storage::{self, StorageBackend, StoredCheck};
use crate::timestamp::TimeStamp;
use crate::types::{QueryState, Schedule};
use crate::work_queue::WorkQueue;
use common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators handed to a new generation. Unset fields are built from
/// the config.
#[derive(Clone, Default)]
pub struct Services {
    pub backend: Option<Arc<dyn StorageBackend>>,
    pub publisher: Option<Arc<dyn Publisher>>,
    pub plugins: Option<PluginSet>,
    /// Shared by every generation so runtime additions survive reloads.
    pub static_table: Option<Arc<StaticDnsTable>>,
}

/// A complete, internally consistent generation: parsed host groups plus
/// the registries built from them.
pub struct State {
    pub settings: DaemonSettings,
    pub host_groups: BTreeMap<String, HostGroup>,
    pub check_list: CheckList,
    pub dns_cache: DnsCache,
    pub wait_list: WaitList,
    pub plugins: PluginSet,
    pub backend: Arc<dyn StorageBackend>,
    pub publisher: Arc<dyn Publisher>,
    pub config_info: ConfigInfo,
}

impl State {
    /// Build a fresh generation from `config`. No network calls are made.
    pub fn build(config: &DaemonConfig, services: Services) -> Result<Self> {
        let settings = config.settings.clone();
        let static_table = services.static_table.unwrap_or_default();
        for (host, addresses) in &settings.dns.static_hosts {
            static_table.add(host, addresses.iter().copied());
        }

        let backend = match services.backend {
            Some(backend) => backend,
            None => storage::open(&settings.storage)?,
        };
        let publisher: Arc<dyn Publisher> = if settings.publish.enabled {
            let inner = services.publisher.unwrap_or_else(|| Arc::new(crate::publisher::LogPublisher));
            Arc::new(FilteredPublisher::new(
                inner,
                settings.publish.host_groups.clone(),
                settings.publish.only_on_change,
            ))
        } else {
            Arc::new(NullPublisher)
        };
        let plugins = services.plugins.unwrap_or_else(|| {
            let options = SystemDnsOptions {
                timeout: Duration::from_millis(settings.dns.timeout),
                retries: settings.dns.retries,
                server: settings.dns.server,
            };
            PluginSet::standard(options, static_table.clone())
        });

        let state = Self {
            dns_cache: DnsCache::with_defaults(settings.dns.ttl, settings.dns.timeout, static_table),
            check_list: CheckList::new(),
            wait_list: WaitList::new(),
            host_groups: config.host_groups.clone(),
            settings,
            plugins,
            backend,
            publisher,
            config_info: ConfigInfo {
                version: 0,
                hash: config.hash.clone(),
                load_time: TimeStamp::now(),
            },
        };
        state.generate();
        Ok(state)
    }

    fn generate(&self) {
        for group in self.host_groups.values() {
            debug!(group = %group.name, hosts = group.hosts.len(), "Adding hosts from host group");
            self.check_list.add_host_group(group);
        }
        self.check_list.init_dns_cache(&self.dns_cache, &self.wait_list);
        info!(
            groups = self.host_groups.len(),
            checks = self.check_list.len(),
            dns_entries = self.dns_cache.entries().len(),
            "Generated check list"
        );
    }

    /// Stop accepting new entries. Called once the generation is populated.
    pub fn seal(&self) {
        self.check_list.set_guard(true);
    }

    /// Load stored results and DNS answers for entries that still exist,
    /// and purge the stored records of entries that do not.
    pub fn init_results_from_backend(&self) {
        let mut restored = 0;
        let mut purged = 0;
        let mut seen: BTreeMap<(String, DnsLookup), BTreeSet<IpAddress>> = BTreeMap::new();

        for record in self.backend.check_results() {
            let address = record.address();
            let header = CheckHeader {
                hostname: record.hostname.clone(),
                address,
                check: record.check.clone(),
                settings: record.settings.clone(),
            };
            if self.check_list.host_groups(&header).is_none() {
                if let Err(e) = self.backend.purge_check_result(&record.hostname, address, &record.check) {
                    warn!(host = %record.hostname, %address, error = %e, "Failed to purge stale result");
                }
                purged += 1;
                continue;
            }
            self.check_list.insert_check(
                None,
                &record.hostname,
                &record.check,
                &record.settings,
                &BTreeSet::from([address]),
            );
            let result = crate::check_result::CheckResult {
                query_state: QueryState::Inactive,
                status_changed: false,
                ..record.result
            };
            self.check_list.update_check_result(&header, result, false);
            seen.entry((record.hostname, DnsLookup::new(record.check.dns_type, address.is_v6())))
                .or_default()
                .insert(address);
            restored += 1;
        }

        for (name, lookup) in self.dns_cache.entries() {
            let stored = self.backend.dns_result(&name, lookup);
            let addresses = match &stored {
                Some(result) if result.has_addresses() => result.addresses.clone(),
                _ => seen.remove(&(name.clone(), lookup)).unwrap_or_default(),
            };
            if addresses.is_empty() {
                continue;
            }
            let (v4, v6) = if lookup.ipv6 {
                (None, stored.as_ref())
            } else {
                (stored.as_ref(), None)
            };
            self.dns_cache
                .update_reload_dns_entry(&name, &addresses, v4, v6, lookup.dns_type);
        }
        info!(restored, purged, "Restored check results from backend");
    }

    /// Copy DNS answers and results of `src` into this generation.
    ///
    /// A result is copied only when this generation has no newer one. The
    /// storage cache is refreshed with the host groups both generations
    /// share, so results never leak into or out of a group.
    pub fn restore_running_check_state(&self, src: &State) {
        let mut copied = 0;
        for header in src.check_list.all_checks() {
            let dns_type = header.check.dns_type;
            let lookups = [DnsLookup::new(dns_type, false), DnsLookup::new(dns_type, true)];
            let addresses = src
                .dns_cache
                .addresses(&header.hostname, header.check.dual_stack, dns_type);
            let carried: BTreeSet<IpAddress> = addresses
                .iter()
                .filter(|a| {
                    let lookup = DnsLookup::new(dns_type, a.is_v6());
                    self.dns_cache.dns_result(&header.hostname, lookup).is_some()
                })
                .copied()
                .collect();
            if !carried.is_empty() {
                let v4 = src.dns_cache.dns_result(&header.hostname, lookups[0]);
                let v6 = src.dns_cache.dns_result(&header.hostname, lookups[1]);
                self.dns_cache.update_reload_dns_entry(
                    &header.hostname,
                    &carried,
                    v4.as_ref(),
                    v6.as_ref(),
                    dns_type,
                );
            }

            for address in addresses {
                let header = CheckHeader { address, ..header.clone() };
                let Some(result) = src.check_list.check_result(&header) else {
                    continue;
                };
                let newer_here = self
                    .check_list
                    .check_result(&header)
                    .is_some_and(|current| current.check_time >= result.check_time);
                if newer_here {
                    continue;
                }
                let result = crate::check_result::CheckResult { address, ..result };
                if !self.check_list.update_check_result(&header, result.clone(), true) {
                    continue;
                }
                let before = src.check_list.host_groups(&header).unwrap_or_default();
                let after = self.check_list.host_groups(&header).unwrap_or_default();
                let common: Vec<String> = after.into_iter().filter(|g| before.contains(g)).collect();
                let record = StoredCheck {
                    hostname: header.hostname.clone(),
                    check: header.check.clone(),
                    settings: header.settings.clone(),
                    host_groups: common,
                    result,
                };
                if let Err(e) = self.backend.update_check_result_cache(&record) {
                    warn!(host = %header.hostname, %address, error = %e, "Failed to refresh result cache");
                }
                copied += 1;
            }
        }
        debug!(copied, "Restored running check state");
    }

    /// Queue lookups whose TTL got shorter than the one cached by `src`.
    pub fn reschedule_dns_checks(&self, src: &State, queue: &WorkQueue) -> usize {
        let mut queued = 0;
        let mut visited = BTreeSet::new();
        for header in self.check_list.all_checks() {
            for ipv6 in header.check.dual_stack.stacks() {
                let lookup = DnsLookup::new(header.check.dns_type, ipv6);
                if !visited.insert((header.hostname.clone(), lookup)) {
                    continue;
                }
                let (Some(old), Some(new)) = (
                    src.dns_cache.dns_result(&header.hostname, lookup),
                    self.dns_cache.dns_result(&header.hostname, lookup),
                ) else {
                    continue;
                };
                if new.ttl < old.ttl && self.dns_cache.queue_dns_query(&header.hostname, lookup, queue) {
                    queued += 1;
                }
            }
        }
        debug!(queued, "Rescheduled DNS lookups");
        queued
    }

    /// Queue health checks for hosts whose probe or tuning changed, hosts
    /// new to a group, and every host of a new group.
    pub fn reschedule_health_checks(&self, src: &State, queue: &WorkQueue) -> usize {
        let mut queued = 0;
        for (name, group) in &self.host_groups {
            let check = group.host_check();
            let hosts: Vec<&String> = match src.host_groups.get(name) {
                Some(old) if old.host_check() == check && old.check_settings() == group.check_settings() => {
                    group.hosts.difference(&old.hosts).collect()
                }
                _ => group.hosts.iter().collect(),
            };
            for host in hosts {
                for address in self.dns_cache.addresses(host, check.dual_stack, check.dns_type) {
                    if address.is_unspecified() {
                        continue;
                    }
                    if self.check_list.queue_check(host, address, &check, queue) {
                        queued += 1;
                    }
                }
            }
        }
        info!(queued, "Rescheduled health checks");
        queued
    }

    /// Tell the backend which groups of `src` were removed or changed
    /// membership or passthrough info.
    pub fn update_backend(&self, src: &State) -> Result<()> {
        let changed: BTreeSet<String> = src
            .host_groups
            .iter()
            .filter(|(name, old)| match self.host_groups.get(*name) {
                None => true,
                Some(new) => new.passthrough_info != old.passthrough_info || new.hosts != old.hosts,
            })
            .map(|(name, _)| name.clone())
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        info!(groups = changed.len(), "Rewriting changed host groups in backend");
        let current: Vec<HostGroup> = self.host_groups.values().cloned().collect();
        self.backend.update_host_groups(&changed, &current)
    }

    /// Queue every due DNS lookup and health check, arming timers for the
    /// rest. Used when a generation starts from scratch.
    pub fn schedule_all(&self, queue: &WorkQueue, scheduler: &dyn Scheduler) {
        self.dns_cache.queue_dns_lookups(queue, scheduler, true);
        for header in self.check_list.all_checks() {
            let check = &header.check;
            for address in self.dns_cache.addresses(&header.hostname, check.dual_stack, check.dns_type) {
                if address.is_unspecified() {
                    continue;
                }
                match self.check_list.check_needed(&header.hostname, address, check) {
                    Schedule::Work => {
                        self.check_list.queue_check(&header.hostname, address, check, queue);
                    }
                    Schedule::Event | Schedule::None => {
                        let at = self.check_list.next_check_time(&header.hostname, address, check);
                        scheduler.add_health_check_timeout(&header.hostname, address, check, at);
                    }
                }
            }
        }
    }

    fn group(&self, name: &str) -> Result<&HostGroup> {
        self.host_groups
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown host group {}", name)))
    }

    fn group_hosts<'a>(&self, group: &'a HostGroup, host: Option<&'a str>) -> Result<Vec<&'a str>> {
        match host {
            Some(host) if group.hosts.contains(host) => Ok(vec![host]),
            Some(host) => Err(Error::config(format!(
                "host {} is not in host group {}",
                host, group.name
            ))),
            None => Ok(group.hosts.iter().map(String::as_str).collect()),
        }
    }

    /// Queue an immediate health check of every known address of the group,
    /// or of one of its hosts. Stacks that never resolved, or only have the
    /// DNS failure placeholder, get a new lookup instead.
    pub fn force_health_check(&self, group: &str, host: Option<&str>, queue: &WorkQueue) -> Result<usize> {
        let group = self.group(group)?;
        let check = group.host_check();
        let mut queued = 0;
        for host in self.group_hosts(group, host)? {
            for ipv6 in check.dual_stack.stacks() {
                let lookup = DnsLookup::new(check.dns_type, ipv6);
                let Some(addresses) = self.dns_cache.stack_addresses(host, lookup) else {
                    if self.dns_cache.queue_dns_query(host, lookup, queue) {
                        queued += 1;
                    }
                    continue;
                };
                for address in addresses {
                    let ok = if address.is_unspecified() {
                        self.dns_cache.queue_dns_query(host, lookup, queue)
                    } else {
                        self.check_list.queue_check(host, address, &check, queue)
                    };
                    if ok {
                        queued += 1;
                    }
                }
            }
        }
        info!(group = %group.name, queued, "Forced health check");
        Ok(queued)
    }

    /// Queue an immediate resolution of the group's hosts, or of one host.
    pub fn force_dns_check(&self, group: &str, host: Option<&str>, queue: &WorkQueue) -> Result<usize> {
        let group = self.group(group)?;
        let check = group.host_check();
        let mut queued = 0;
        for host in self.group_hosts(group, host)? {
            for ipv6 in check.dual_stack.stacks() {
                if self
                    .dns_cache
                    .queue_dns_query(host, DnsLookup::new(check.dns_type, ipv6), queue)
                {
                    queued += 1;
                }
            }
        }
        info!(group = %group.name, queued, "Forced DNS check");
        Ok(queued)
    }

    pub fn store_config_info(&self) -> Result<()> {
        self.backend.store_config_info(&self.config_info)
    }

    /// Persist the host group definitions, logging how they differ from the
    /// stored ones.
    pub fn store_configs(&self) -> Result<()> {
        let stored: BTreeMap<String, HostGroup> = self
            .backend
            .configs()
            .into_iter()
            .map(|g| (g.name.clone(), g))
            .collect();
        let added = self.host_groups.keys().filter(|n| !stored.contains_key(*n)).count();
        let removed = stored.keys().filter(|n| !self.host_groups.contains_key(*n)).count();
        let modified = self
            .host_groups
            .iter()
            .filter(|(n, g)| stored.get(*n).is_some_and(|old| old != *g))
            .count();
        info!(added, removed, modified, "Storing host group configs");
        let groups: Vec<HostGroup> = self.host_groups.values().cloned().collect();
        self.backend.store_configs(&groups)
    }
}
