//! Persistence backends for check results, DNS results and config records.

mod json;
mod memory;

pub use json::JsonFileStorage;
pub use memory::MemoryStorage;

use crate::address::IpAddress;
use crate::check_params::CheckSettings;
use crate::check_result::CheckResult;
use crate::dns_cache::{DnsLookup, DnsResult};
use crate::host_check::HostCheck;
use crate::host_group::HostGroup;
use crate::settings::{ConfigInfo, StorageKind, StorageSettings};
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// A check result together with the entry it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCheck {
    pub hostname: String,
    pub check: HostCheck,
    pub settings: CheckSettings,
    pub host_groups: Vec<String>,
    /// The result, with `result.address` set.
    pub result: CheckResult,
}

impl StoredCheck {
    pub fn address(&self) -> IpAddress {
        self.result.address
    }
}

/// Narrow persistence interface used by the scheduler.
///
/// Writes are best effort from the scheduler's point of view: failures are
/// logged by the caller and never change scheduling.
#[cfg_attr(test, mockall::automock)]
pub trait StorageBackend: Send + Sync {
    fn store_check_result(&self, record: &StoredCheck) -> Result<()>;

    /// Refresh a cached record without marking the store dirty.
    fn update_check_result_cache(&self, record: &StoredCheck) -> Result<()>;

    fn check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Option<CheckResult>;

    fn purge_check_result(&self, hostname: &str, address: IpAddress, check: &HostCheck) -> Result<()>;

    /// Every stored record.
    fn check_results(&self) -> Vec<StoredCheck>;

    fn group_check_results(&self, group: &str) -> Vec<StoredCheck>;

    fn store_dns_result(&self, hostname: &str, lookup: DnsLookup, result: &DnsResult) -> Result<()>;

    fn dns_result(&self, hostname: &str, lookup: DnsLookup) -> Option<DnsResult>;

    fn store_configs(&self, groups: &[HostGroup]) -> Result<()>;

    fn configs(&self) -> Vec<HostGroup>;

    fn store_config_info(&self, info: &ConfigInfo) -> Result<()>;

    fn config_info(&self) -> Option<ConfigInfo>;

    /// Rewrite the records of groups whose definition changed. Groups in
    /// `changed` but not in `current` are dropped.
    fn update_host_groups(&self, changed: &BTreeSet<String>, current: &[HostGroup]) -> Result<()>;

    /// Flush pending writes.
    fn commit(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Open the backend described by `settings`.
pub fn open(settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>> {
    match settings.kind {
        StorageKind::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageKind::Json => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| Error::config("storage kind json requires a path"))?;
            info!(path = %path.display(), "Using JSON file storage");
            Ok(Arc::new(JsonFileStorage::open(path)?))
        }
    }
}
