//! Thread-safe in-memory backend.

use super::{StorageBackend, StoredCheck};
use crate::address::IpAddress;
use crate::check_result::CheckResult;
use crate::dns_cache::{DnsLookup, DnsResult};
use crate::host_check::HostCheck;
use crate::host_group::HostGroup;
use crate::settings::ConfigInfo;
use common::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

type CheckKey = (String, IpAddress, HostCheck);

fn key_of(record: &StoredCheck) -> CheckKey {
    (record.hostname.clone(), record.address(), record.check.clone())
}

/// Serializable image of a [`MemoryStorage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub checks: Vec<StoredCheck>,
    pub dns: Vec<(String, DnsLookup, DnsResult)>,
    pub host_groups: Vec<HostGroup>,
    pub config_info: Option<ConfigInfo>,
}

#[derive(Default)]
struct Tables {
    checks: BTreeMap<CheckKey, StoredCheck>,
    groups_index: BTreeMap<String, BTreeSet<CheckKey>>,
    dns: BTreeMap<(String, DnsLookup), DnsResult>,
    host_groups: BTreeMap<String, HostGroup>,
    config_info: Option<ConfigInfo>,
}

impl Tables {
    fn upsert(&mut self, record: &StoredCheck) {
        let key = key_of(record);
        if let Some(previous) = self.checks.get(&key) {
            for group in &previous.host_groups {
                if let Some(members) = self.groups_index.get_mut(group) {
                    members.remove(&key);
                }
            }
        }
        for group in &record.host_groups {
            self.groups_index
                .entry(group.clone())
                .or_default()
                .insert(key.clone());
        }
        self.checks.insert(key, record.clone());
    }
}

/// Keeps every record in memory, indexed by entry and by host group.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    dirty: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let storage = Self::new();
        {
            let mut tables = storage.tables.write();
            for record in &snapshot.checks {
                tables.upsert(record);
            }
            tables.dns = snapshot
                .dns
                .into_iter()
                .map(|(host, lookup, result)| ((host, lookup), result))
                .collect();
            tables.host_groups = snapshot
                .host_groups
                .into_iter()
                .map(|g| (g.name.clone(), g))
                .collect();
            tables.config_info = snapshot.config_info;
        }
        storage
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let tables = self.tables.read();
        Snapshot {
            checks: tables.checks.values().cloned().collect(),
            dns: tables
                .dns
                .iter()
                .map(|((host, lookup), result)| (host.clone(), *lookup, result.clone()))
                .collect(),
            host_groups: tables.host_groups.values().cloned().collect(),
            config_info: tables.config_info.clone(),
        }
    }

    /// Clear and return the dirty flag.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl StorageBackend for MemoryStorage {
    fn store_check_result(&self, record: &StoredCheck) -> Result<()> {
        self.tables.write().upsert(record);
        self.mark_dirty();
        Ok(())
    }

    fn update_check_result_cache(&self, record: &StoredCheck) -> Result<()> {
        self.tables.write().upsert(record);
        Ok(())
    }

    fn check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Option<CheckResult> {
        let key = (hostname.to_string(), address, check.clone());
        self.tables.read().checks.get(&key).map(|r| r.result.clone())
    }

    fn purge_check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Result<()> {
        let key = (hostname.to_string(), address, check.clone());
        let mut tables = self.tables.write();
        if tables.checks.remove(&key).is_some() {
            for members in tables.groups_index.values_mut() {
                members.remove(&key);
            }
            debug!(host = hostname, %address, "Purged stored check result");
            self.mark_dirty();
        }
        Ok(())
    }

    fn check_results(&self) -> Vec<StoredCheck> {
        self.tables.read().checks.values().cloned().collect()
    }

    fn group_check_results(&self, group: &str) -> Vec<StoredCheck> {
        let tables = self.tables.read();
        tables
            .groups_index
            .get(group)
            .map(|keys| keys.iter().filter_map(|k| tables.checks.get(k).cloned()).collect())
            .unwrap_or_default()
    }

    fn store_dns_result(&self, hostname: &str, lookup: DnsLookup, result: &DnsResult) -> Result<()> {
        self.tables
            .write()
            .dns
            .insert((hostname.to_string(), lookup), result.clone());
        self.mark_dirty();
        Ok(())
    }

    fn dns_result(&self, hostname: &str, lookup: DnsLookup) -> Option<DnsResult> {
        self.tables
            .read()
            .dns
            .get(&(hostname.to_string(), lookup))
            .cloned()
    }

    fn store_configs(&self, groups: &[HostGroup]) -> Result<()> {
        self.tables.write().host_groups = groups.iter().map(|g| (g.name.clone(), g.clone())).collect();
        self.mark_dirty();
        Ok(())
    }

    fn configs(&self) -> Vec<HostGroup> {
        self.tables.read().host_groups.values().cloned().collect()
    }

    fn store_config_info(&self, info: &ConfigInfo) -> Result<()> {
        self.tables.write().config_info = Some(info.clone());
        self.mark_dirty();
        Ok(())
    }

    fn config_info(&self) -> Option<ConfigInfo> {
        self.tables.read().config_info.clone()
    }

    fn update_host_groups(&self, changed: &BTreeSet<String>, current: &[HostGroup]) -> Result<()> {
        let mut tables = self.tables.write();
        let tables = &mut *tables;
        for name in changed {
            let Some(group) = current.iter().find(|g| &g.name == name) else {
                tables.host_groups.remove(name);
                tables.groups_index.remove(name);
                for record in tables.checks.values_mut() {
                    record.host_groups.retain(|g| g != name);
                }
                continue;
            };

            let check = group.host_check();
            let mut members = BTreeSet::new();
            for (key, record) in tables.checks.iter_mut() {
                let belongs = group.hosts.contains(&record.hostname) && record.check == check;
                let tagged = record.host_groups.iter().any(|g| g == name);
                if belongs {
                    if !tagged {
                        record.host_groups.push(name.clone());
                    }
                    members.insert(key.clone());
                } else if tagged {
                    record.host_groups.retain(|g| g != name);
                }
            }
            debug!(group = %name, members = members.len(), "Rewrote stored host group");
            tables.groups_index.insert(name.clone(), members);
            tables.host_groups.insert(name.clone(), group.clone());
        }
        self.mark_dirty();
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_params::CheckSettings;
    use crate::types::{CheckType, DnsType, DualStack};

    fn record(host: &str, addr: &str, groups: &[&str]) -> StoredCheck {
        StoredCheck {
            hostname: host.to_string(),
            check: HostCheck::new(CheckType::Http, 80, DualStack::Ipv4Only, "/"),
            settings: CheckSettings::default(),
            host_groups: groups.iter().map(|s| s.to_string()).collect(),
            result: CheckResult {
                address: addr.parse().unwrap(),
                ..CheckResult::default()
            },
        }
    }

    #[test]
    fn test_store_and_group_index() {
        let storage = MemoryStorage::new();
        storage.store_check_result(&record("web1", "10.0.0.1", &["g1"])).unwrap();
        storage.store_check_result(&record("web2", "10.0.0.2", &["g1", "g2"])).unwrap();
        assert!(storage.take_dirty());
        assert!(!storage.take_dirty());

        assert_eq!(storage.group_check_results("g1").len(), 2);
        assert_eq!(storage.group_check_results("g2").len(), 1);

        // Re-storing with a new membership moves the index entry
        storage.store_check_result(&record("web2", "10.0.0.2", &["g1"])).unwrap();
        assert!(storage.group_check_results("g2").is_empty());
    }

    #[test]
    fn test_cache_update_does_not_dirty() {
        let storage = MemoryStorage::new();
        storage.update_check_result_cache(&record("web1", "10.0.0.1", &["g1"])).unwrap();
        assert!(!storage.take_dirty());
        assert_eq!(storage.check_results().len(), 1);
    }

    #[test]
    fn test_purge() {
        let storage = MemoryStorage::new();
        let r = record("web1", "10.0.0.1", &["g1"]);
        storage.store_check_result(&r).unwrap();
        storage.purge_check_result("web1", r.address(), &r.check).unwrap();
        assert!(storage.check_result("web1", r.address(), &r.check).is_none());
        assert!(storage.group_check_results("g1").is_empty());
    }

    #[test]
    fn test_update_host_groups_rewrites_membership() {
        let storage = MemoryStorage::new();
        storage.store_check_result(&record("web1", "10.0.0.1", &["old"])).unwrap();
        storage.store_check_result(&record("web2", "10.0.0.2", &["old"])).unwrap();

        let group = HostGroup::new("new")
            .with_check(CheckType::Http, 80, "/")
            .with_hosts(["web1"]);
        let changed: BTreeSet<String> = ["old".to_string(), "new".to_string()].into();
        storage.update_host_groups(&changed, &[group]).unwrap();

        let members = storage.group_check_results("new");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].hostname, "web1");
        assert!(storage.group_check_results("old").is_empty());
        assert_eq!(storage.configs().len(), 1);
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_index() {
        let storage = MemoryStorage::new();
        storage.store_check_result(&record("web1", "10.0.0.1", &["g1"])).unwrap();
        let lookup = DnsLookup::new(DnsType::Lookup, false);
        storage.store_dns_result("web1", lookup, &DnsResult::default()).unwrap();

        let restored = MemoryStorage::from_snapshot(storage.snapshot());
        assert_eq!(restored.group_check_results("g1").len(), 1);
        assert!(restored.dns_result("web1", lookup).is_some());
    }
}
