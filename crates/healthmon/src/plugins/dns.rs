//! Built in DNS plugins.

use super::{DnsAnswer, DnsPlugin};
use crate::address::IpAddress;
use crate::dns_cache::StaticDnsTable;
use crate::timestamp::TimeStamp;
use crate::types::{DEFAULT_DNS_RESOLUTION_TIMEOUT, DEFAULT_DNS_RETRIES};
use common::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use trust_dns_resolver::Resolver;
use trust_dns_resolver::config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::system_conf::read_system_conf;

/// Resolver tuning for [`SystemDns`].
#[derive(Debug, Clone)]
pub struct SystemDnsOptions {
    pub timeout: Duration,
    pub retries: u32,
    /// Use this server instead of the system configuration.
    pub server: Option<SocketAddr>,
}

impl Default for SystemDnsOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_DNS_RESOLUTION_TIMEOUT),
            retries: DEFAULT_DNS_RETRIES,
            server: None,
        }
    }
}

/// Resolves through the configured or system name servers.
pub struct SystemDns {
    options: SystemDnsOptions,
}

impl SystemDns {
    /// Create a new system resolver plugin.
    pub fn new(options: SystemDnsOptions) -> Self {
        Self { options }
    }

    fn resolver_config(&self) -> Result<(ResolverConfig, ResolverOpts)> {
        match self.options.server {
            Some(server) => {
                let servers = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
                Ok((ResolverConfig::from_parts(None, vec![], servers), ResolverOpts::default()))
            }
            None => read_system_conf().map_err(Error::dns),
        }
    }
}

impl DnsPlugin for SystemDns {
    fn resolve(&self, hostname: &str, ipv6: bool, deadline: TimeStamp) -> Result<DnsAnswer> {
        let (config, mut opts) = self.resolver_config()?;
        let budget = deadline.until(TimeStamp::now());
        if budget.is_zero() {
            return Err(Error::dns(format!("no time left to resolve {}", hostname)));
        }
        opts.timeout = budget.min(self.options.timeout);
        opts.attempts = self.options.retries.max(1) as usize;
        opts.ip_strategy = if ipv6 {
            LookupIpStrategy::Ipv6Only
        } else {
            LookupIpStrategy::Ipv4Only
        };

        let resolver = Resolver::new(config, opts).map_err(Error::dns)?;
        let lookup = resolver.lookup_ip(hostname).map_err(Error::dns)?;
        let ttl_secs = lookup
            .valid_until()
            .saturating_duration_since(Instant::now())
            .as_secs();
        let addresses = lookup
            .iter()
            .map(IpAddress::from)
            .filter(|a| a.is_v6() == ipv6)
            .collect::<std::collections::BTreeSet<_>>();
        if addresses.is_empty() {
            return Err(Error::dns(format!("no addresses for {}", hostname)));
        }
        debug!(host = hostname, ipv6, count = addresses.len(), ttl_secs, "Resolved host");
        Ok(DnsAnswer {
            addresses,
            ttl_secs: Some(ttl_secs),
        })
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Resolves from the static address table.
pub struct StaticDns {
    table: Arc<StaticDnsTable>,
}

impl StaticDns {
    /// Create a new static resolver over a shared table.
    pub fn new(table: Arc<StaticDnsTable>) -> Self {
        Self { table }
    }
}

impl DnsPlugin for StaticDns {
    fn resolve(&self, hostname: &str, ipv6: bool, _deadline: TimeStamp) -> Result<DnsAnswer> {
        let addresses = self.table.get(hostname, ipv6);
        if addresses.is_empty() {
            return Err(Error::dns(format!("no static entry for {}", hostname)));
        }
        Ok(DnsAnswer {
            addresses,
            ttl_secs: None,
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Never resolves. Hosts using it are not scheduled for lookups.
pub struct NoDns;

impl DnsPlugin for NoDns {
    fn resolve(&self, hostname: &str, _ipv6: bool, _deadline: TimeStamp) -> Result<DnsAnswer> {
        Err(Error::dns(format!("lookups disabled for {}", hostname)))
    }

    fn name(&self) -> &str {
        "none"
    }
}
