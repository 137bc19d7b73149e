//! Check and DNS plugins.
//!
//! A plugin is selected per host check: an explicitly named plugin wins,
//! otherwise the check type picks one. DNS plugins are selected by
//! [`DnsType`].

mod checks;
mod dns;

pub use checks::{DnsServiceCheck, FtpCheck, HttpCheck, NoneCheck, TcpCheck, UnsupportedCheck};
pub use dns::{NoDns, StaticDns, SystemDns, SystemDnsOptions};

use crate::address::IpAddress;
use crate::check_result::CheckOutcome;
use crate::dns_cache::StaticDnsTable;
use crate::host_check::HostCheck;
use crate::timestamp::TimeStamp;
use crate::types::{CheckType, DnsType};
use common::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Runs one probe against one address.
pub trait CheckPlugin: Send + Sync {
    /// Probe `address` and report how it went. Must return by `deadline`
    /// plus a small margin and must always produce an outcome.
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, deadline: TimeStamp) -> CheckOutcome;

    /// Get the name of this plugin
    fn name(&self) -> &str;
}

/// Addresses returned by a resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAnswer {
    pub addresses: BTreeSet<IpAddress>,
    /// Seconds the answer stays valid, when the source reports one.
    ///
    /// Only logged. The cache refreshes on the TTL configured for the
    /// host group, not on the resolver's.
    pub ttl_secs: Option<u64>,
}

/// Resolves a hostname for one stack.
pub trait DnsPlugin: Send + Sync {
    fn resolve(&self, hostname: &str, ipv6: bool, deadline: TimeStamp) -> Result<DnsAnswer>;

    /// Get the name of this plugin
    fn name(&self) -> &str;
}

/// The plugins available to workers.
#[derive(Clone, Default)]
pub struct PluginSet {
    by_type: HashMap<CheckType, Arc<dyn CheckPlugin>>,
    by_name: HashMap<String, Arc<dyn CheckPlugin>>,
    dns: HashMap<DnsType, Arc<dyn DnsPlugin>>,
}

impl PluginSet {
    /// Create an empty set. Every check resolves to [`UnsupportedCheck`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The built in plugins for every supported check type and DNS source.
    pub fn standard(dns: SystemDnsOptions, static_table: Arc<StaticDnsTable>) -> Self {
        let mut set = Self::new();
        set.register_check(CheckType::None, Arc::new(NoneCheck));
        set.register_check(CheckType::Tcp, Arc::new(TcpCheck));
        let http = Arc::new(HttpCheck);
        for check_type in [CheckType::Http, CheckType::Https, CheckType::HttpsNoPeerCheck] {
            set.register_check(check_type, http.clone());
        }
        set.register_check(CheckType::Ftp, Arc::new(FtpCheck));
        let dns_service = Arc::new(DnsServiceCheck::new(dns.timeout));
        set.register_check(CheckType::Dns, dns_service.clone());
        set.register_check(CheckType::Dnsvc, dns_service);

        set.register_dns(DnsType::Lookup, Arc::new(SystemDns::new(dns)));
        set.register_dns(DnsType::Static, Arc::new(StaticDns::new(static_table)));
        set.register_dns(DnsType::None, Arc::new(NoDns));
        set
    }

    pub fn register_check(&mut self, check_type: CheckType, plugin: Arc<dyn CheckPlugin>) {
        self.by_type.insert(check_type, plugin);
    }

    /// Register a plugin that host groups select with `plugin: <name>`.
    pub fn register_named(&mut self, plugin: Arc<dyn CheckPlugin>) {
        self.by_name.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_dns(&mut self, dns_type: DnsType, plugin: Arc<dyn DnsPlugin>) {
        self.dns.insert(dns_type, plugin);
    }

    /// The plugin that runs `check`.
    pub fn check_plugin(&self, check: &HostCheck) -> Arc<dyn CheckPlugin> {
        if let Some(plugin) = check.plugin.as_deref().and_then(|name| self.by_name.get(name)) {
            return plugin.clone();
        }
        match self.by_type.get(&check.check_type) {
            Some(plugin) => plugin.clone(),
            None => Arc::new(UnsupportedCheck),
        }
    }

    pub fn dns_plugin(&self, dns_type: DnsType) -> Option<Arc<dyn DnsPlugin>> {
        self.dns.get(&dns_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DualStack, Reason};

    struct Named(&'static str);

    impl CheckPlugin for Named {
        fn perform(&self, _: &str, _: IpAddress, _: &HostCheck, _: TimeStamp) -> CheckOutcome {
            let now = TimeStamp::now();
            CheckOutcome::success(now, now)
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_named_plugin_wins_over_type() {
        let mut set = PluginSet::new();
        set.register_check(CheckType::Tcp, Arc::new(TcpCheck));
        set.register_named(Arc::new(Named("custom")));

        let mut check = HostCheck::new(CheckType::Tcp, 22, DualStack::Ipv4Only, "");
        assert_eq!(set.check_plugin(&check).name(), "tcp");
        check.plugin = Some("custom".to_string());
        assert_eq!(set.check_plugin(&check).name(), "custom");
        check.plugin = Some("missing".to_string());
        assert_eq!(set.check_plugin(&check).name(), "tcp");
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let set = PluginSet::new();
        let check = HostCheck::new(CheckType::FtpsImplicit, 990, DualStack::Ipv4Only, "");
        let plugin = set.check_plugin(&check);
        let outcome = plugin.perform("h", IpAddress::Unset, &check, TimeStamp::now() + 1_000);
        assert_eq!(outcome.reason, Reason::InternalError);
    }

    #[test]
    fn test_standard_set_covers_dns_types() {
        let set = PluginSet::standard(SystemDnsOptions::default(), Arc::new(StaticDnsTable::new()));
        assert_eq!(set.dns_plugin(DnsType::Static).map(|p| p.name().to_string()), Some("static".into()));
        assert_eq!(set.dns_plugin(DnsType::None).map(|p| p.name().to_string()), Some("none".into()));
        let check = HostCheck::new(CheckType::Https, 443, DualStack::Both, "/");
        assert_eq!(set.check_plugin(&check).name(), "http");
    }
}
