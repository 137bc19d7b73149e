//! Parsed host group records.

use crate::address::IpAddress;
use crate::check_params::CheckSettings;
use crate::host_check::HostCheck;
use crate::types::{
    CheckType, DEFAULT_CHECK_TIMEOUT, DEFAULT_FLAP_THRESHOLD, DEFAULT_GROUP_THRESHOLD,
    DEFAULT_MAX_FLAPS, DEFAULT_SLOW_THRESHOLD, DEFAULT_SMOOTHING_WINDOW, DEFAULT_TTL,
    DistributedFallback, DnsType, DualStack, Measurement,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named set of hosts sharing one check configuration.
///
/// Timing fields are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    pub check_type: CheckType,
    pub port: u16,
    pub check_info: String,
    pub dual_stack: DualStack,
    pub hosts: BTreeSet<String>,
    /// Child groups whose hosts were merged into `hosts`.
    pub child_groups: Vec<String>,
    pub check_retries: u32,
    pub check_retry_delay: u64,
    pub timeout: u64,
    pub ttl: u64,
    pub group_threshold: u32,
    pub smoothing_window: u32,
    pub flap_threshold: u32,
    pub max_flaps: u32,
    pub slow_threshold: u32,
    pub measurement: Measurement,
    pub distributed_fallback: DistributedFallback,
    pub remote_check: String,
    pub source_address: IpAddress,
    pub tos_value: u8,
    pub dns_type: DnsType,
    pub plugin: Option<String>,
    pub passthrough_info: u32,
}

impl HostGroup {
    /// Create an empty group with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_type: CheckType::None,
            port: 0,
            check_info: String::new(),
            dual_stack: DualStack::Ipv4Only,
            hosts: BTreeSet::new(),
            child_groups: Vec::new(),
            check_retries: 0,
            check_retry_delay: 0,
            timeout: DEFAULT_CHECK_TIMEOUT,
            ttl: DEFAULT_TTL,
            group_threshold: DEFAULT_GROUP_THRESHOLD,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            flap_threshold: DEFAULT_FLAP_THRESHOLD,
            max_flaps: DEFAULT_MAX_FLAPS,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            measurement: Measurement::Connect,
            distributed_fallback: DistributedFallback::default(),
            remote_check: String::new(),
            source_address: IpAddress::Unset,
            tos_value: 0,
            dns_type: DnsType::Lookup,
            plugin: None,
            passthrough_info: 0,
        }
    }

    pub fn with_check(mut self, check_type: CheckType, port: u16, check_info: impl Into<String>) -> Self {
        self.check_type = check_type;
        self.port = if port == 0 { check_type.default_port() } else { port };
        self.check_info = check_info.into();
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    /// Identity of the probe every host in this group runs.
    pub fn host_check(&self) -> HostCheck {
        HostCheck {
            check_type: self.check_type,
            port: self.port,
            dual_stack: self.dual_stack,
            check_info: self.check_info.clone(),
            remote_check: self.remote_check.clone(),
            source_address: self.source_address,
            tos_value: self.tos_value,
            distributed_fallback: self.distributed_fallback,
            plugin: self.plugin.clone(),
            dns_type: self.dns_type,
        }
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            num_check_retries: self.check_retries,
            check_retry_delay: self.check_retry_delay,
            measurement: self.measurement,
            smoothing_window: self.smoothing_window,
            group_threshold: self.group_threshold,
            slow_threshold: self.slow_threshold,
            max_flaps: self.max_flaps,
            check_timeout: self.timeout,
            check_ttl: self.ttl,
            flap_threshold: self.flap_threshold,
            passthrough_info: self.passthrough_info,
        }
        .normalized()
    }
}
