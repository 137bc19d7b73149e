//! JSON file backend: a [`MemoryStorage`] snapshotted to disk on commit.

use super::memory::{MemoryStorage, Snapshot};
use super::{StorageBackend, StoredCheck};
use crate::address::IpAddress;
use crate::check_result::CheckResult;
use crate::dns_cache::{DnsLookup, DnsResult};
use crate::host_check::HostCheck;
use crate::host_group::HostGroup;
use crate::settings::ConfigInfo;
use common::Result;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonFileStorage {
    path: PathBuf,
    inner: MemoryStorage,
}

impl JsonFileStorage {
    /// Open the store at `path`, loading the previous snapshot if one exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            info!(
                path = %path.display(),
                checks = snapshot.checks.len(),
                dns = snapshot.dns.len(),
                "Loaded stored results"
            );
            MemoryStorage::from_snapshot(snapshot)
        } else {
            MemoryStorage::new()
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Wrote storage snapshot");
        Ok(())
    }
}

impl StorageBackend for JsonFileStorage {
    fn store_check_result(&self, record: &StoredCheck) -> Result<()> {
        self.inner.store_check_result(record)
    }

    fn update_check_result_cache(&self, record: &StoredCheck) -> Result<()> {
        self.inner.update_check_result_cache(record)
    }

    fn check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Option<CheckResult> {
        self.inner.check_result(hostname, address, check)
    }

    fn purge_check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Result<()> {
        self.inner.purge_check_result(hostname, address, check)
    }

    fn check_results(&self) -> Vec<StoredCheck> {
        self.inner.check_results()
    }

    fn group_check_results(&self, group: &str) -> Vec<StoredCheck> {
        self.inner.group_check_results(group)
    }

    fn store_dns_result(&self, hostname: &str, lookup: DnsLookup, result: &DnsResult) -> Result<()> {
        self.inner.store_dns_result(hostname, lookup, result)
    }

    fn dns_result(&self, hostname: &str, lookup: DnsLookup) -> Option<DnsResult> {
        self.inner.dns_result(hostname, lookup)
    }

    fn store_configs(&self, groups: &[HostGroup]) -> Result<()> {
        self.inner.store_configs(groups)
    }

    fn configs(&self) -> Vec<HostGroup> {
        self.inner.configs()
    }

    fn store_config_info(&self, info: &ConfigInfo) -> Result<()> {
        self.inner.store_config_info(info)
    }

    fn config_info(&self) -> Option<ConfigInfo> {
        self.inner.config_info()
    }

    fn update_host_groups(&self, changed: &BTreeSet<String>, current: &[HostGroup]) -> Result<()> {
        self.inner.update_host_groups(changed, current)
    }

    /// Write the snapshot if anything changed since the last commit.
    fn commit(&self) -> Result<()> {
        if self.inner.take_dirty() {
            self.write_snapshot()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_params::CheckSettings;
    use crate::timestamp::TimeStamp;
    use crate::types::{CheckType, DualStack};
    use tempfile::tempdir;

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");

        let storage = JsonFileStorage::open(&path).unwrap();
        let record = StoredCheck {
            hostname: "web1".to_string(),
            check: HostCheck::new(CheckType::Tcp, 22, DualStack::Ipv4Only, ""),
            settings: CheckSettings::default(),
            host_groups: vec!["ssh".to_string()],
            result: CheckResult {
                address: "10.1.1.1".parse().unwrap(),
                check_time: TimeStamp::from_millis(1_234),
                ..CheckResult::default()
            },
        };
        storage.store_check_result(&record).unwrap();
        storage
            .store_config_info(&ConfigInfo {
                version: 3,
                hash: "abc".to_string(),
                load_time: TimeStamp::from_millis(99),
            })
            .unwrap();
        assert!(!path.exists());
        storage.commit().unwrap();
        assert!(path.exists());

        let reopened = JsonFileStorage::open(&path).unwrap();
        let result = reopened
            .check_result("web1", record.address(), &record.check)
            .unwrap();
        assert_eq!(result.check_time, TimeStamp::from_millis(1_234));
        assert_eq!(reopened.group_check_results("ssh").len(), 1);
        assert_eq!(reopened.config_info().map(|i| i.version), Some(3));
    }

    #[test]
    fn test_commit_skips_clean_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.json");
        let storage = JsonFileStorage::open(&path).unwrap();
        storage.commit().unwrap();
        assert!(!path.exists());
        storage.store_configs(&[HostGroup::new("g")]).unwrap();
        storage.close().unwrap();
        assert_eq!(JsonFileStorage::open(storage.path()).unwrap().configs().len(), 1);
    }
}
