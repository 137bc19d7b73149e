//! Daemon settings and the loader seam used on every (re)load.

use crate::address::IpAddress;
use crate::host_group::HostGroup;
use crate::timestamp::TimeStamp;
use crate::types::{DEFAULT_DNS_RESOLUTION_TIMEOUT, DEFAULT_DNS_RETRIES, DEFAULT_DNS_TTL};
use crate::work_queue::DEFAULT_LATE_THRESHOLD_PERCENT;
use common::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STRIDE_PERCENT: u32 = 10;
pub const DEFAULT_WORK_PER_THREAD: usize = 4;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RECYCLE_AFTER: u64 = 10_000;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSettings {
    pub min: usize,
    pub max: usize,
    pub monitor_interval: Duration,
    /// Share of the pool, in percent, added or removed per resize step.
    pub stride_percent: u32,
    /// Backlog a single new worker is expected to absorb.
    pub work_per_thread: usize,
    pub recycle: bool,
    /// Items a worker processes before it is replaced.
    pub recycle_after: u64,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            min: 4,
            max: 64,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            stride_percent: DEFAULT_STRIDE_PERCENT,
            work_per_thread: DEFAULT_WORK_PER_THREAD,
            recycle: false,
            recycle_after: DEFAULT_RECYCLE_AFTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingSettings {
    pub late_threshold_percent: u64,
    /// Upper bound on waiting for the previous generation to be released.
    pub drain_timeout: Duration,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            late_threshold_percent: DEFAULT_LATE_THRESHOLD_PERCENT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Resolver settings. `ttl` and `timeout` are milliseconds and apply when a
/// host group does not set its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsSettings {
    pub ttl: u64,
    pub timeout: u64,
    pub retries: u32,
    pub server: Option<SocketAddr>,
    /// Addresses for hosts resolved with `dns-type: static`.
    pub static_hosts: BTreeMap<String, Vec<IpAddress>>,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_DNS_TTL,
            timeout: DEFAULT_DNS_RESOLUTION_TIMEOUT,
            retries: DEFAULT_DNS_RETRIES,
            server: None,
            static_hosts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSettings {
    pub enabled: bool,
    pub only_on_change: bool,
    /// Publish only these groups. Empty means every group.
    pub host_groups: BTreeSet<String>,
}

/// Settings from the master config that the core consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonSettings {
    pub threads: ThreadSettings,
    pub checks: SchedulingSettings,
    pub dns: DnsSettings,
    pub storage: StorageSettings,
    pub publish: PublishSettings,
}

/// One fully parsed configuration.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub settings: DaemonSettings,
    pub host_groups: BTreeMap<String, HostGroup>,
    /// Hex digest of every config file in load order.
    pub hash: String,
}

/// Produces a fresh [`DaemonConfig`] on every load or reload.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigLoader: Send + Sync {
    fn load(&self) -> Result<DaemonConfig>;
}

/// Identity of the configuration a state was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigInfo {
    pub version: u64,
    pub hash: String,
    pub load_time: TimeStamp,
}

/// MD5 over the raw bytes of each config source, in order.
pub fn config_hash<I, B>(sources: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Md5::new();
    for source in sources {
        hasher.update(source.as_ref());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_hash_is_order_sensitive() {
        let a = config_hash(["master", "groups"]);
        let b = config_hash(["groups", "master"]);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(a, config_hash(["master", "groups"]));
        assert_eq!(config_hash(Vec::<&[u8]>::new()), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_defaults() {
        let settings = DaemonSettings::default();
        assert_eq!(settings.threads.stride_percent, 10);
        assert_eq!(settings.threads.work_per_thread, 4);
        assert_eq!(settings.threads.recycle_after, 10_000);
        assert_eq!(settings.checks.drain_timeout, Duration::from_secs(30));
        assert_eq!(settings.dns.ttl, DEFAULT_DNS_TTL);
        assert_eq!(settings.storage.kind, StorageKind::Memory);
    }
}
