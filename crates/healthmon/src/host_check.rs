//! Immutable description of a probe: what to run and where.

use crate::address::IpAddress;
use crate::types::{CheckType, DistributedFallback, DnsType, DualStack};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a check.
///
/// Equality, ordering and hashing ignore `plugin` and `dns_type`: two checks
/// that differ only in which implementation runs them are the same check for
/// scheduling purposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostCheck {
    pub check_type: CheckType,
    pub port: u16,
    pub dual_stack: DualStack,
    /// URL path, `//host/path` form, or query name depending on the type.
    pub check_info: String,
    pub remote_check: String,
    pub source_address: IpAddress,
    pub tos_value: u8,
    pub distributed_fallback: DistributedFallback,
    /// Name of an explicitly selected check plugin.
    pub plugin: Option<String>,
    pub dns_type: DnsType,
}

type IdentityKey<'a> = (
    CheckType,
    u16,
    DualStack,
    &'a str,
    &'a str,
    IpAddress,
    u8,
    DistributedFallback,
);

impl HostCheck {
    pub fn new(check_type: CheckType, port: u16, dual_stack: DualStack, check_info: impl Into<String>) -> Self {
        Self {
            check_type,
            port,
            dual_stack,
            check_info: check_info.into(),
            ..Self::default()
        }
    }

    fn identity(&self) -> IdentityKey<'_> {
        (
            self.check_type,
            self.port,
            self.dual_stack,
            &self.check_info,
            &self.remote_check,
            self.source_address,
            self.tos_value,
            self.distributed_fallback,
        )
    }

    /// Host header value and request path for HTTP style checks.
    ///
    /// `check_info` may be a plain path, or `//authority/path` where the
    /// authority may contain the `<host>` or `<host:port>` tokens.
    pub fn http_target(&self, hostname: &str) -> (String, String) {
        let default_port = self.check_type.default_port();
        let with_port = |host: &str| {
            if self.port == default_port || self.port == 0 {
                host.to_string()
            } else {
                format!("{}:{}", host, self.port)
            }
        };

        let Some(rest) = self.check_info.strip_prefix("//") else {
            let path = if self.check_info.is_empty() {
                "/".to_string()
            } else {
                self.check_info.clone()
            };
            return (with_port(hostname), path);
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        let host = if authority.contains("<host:port>") {
            authority.replace("<host:port>", &format!("{}:{}", hostname, self.port))
        } else if authority.contains("<host>") {
            with_port(&authority.replace("<host>", hostname))
        } else if authority.contains(':') {
            authority.to_string()
        } else {
            with_port(authority)
        };
        (host, path)
    }
}

impl PartialEq for HostCheck {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for HostCheck {}

impl PartialOrd for HostCheck {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HostCheck {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl Hash for HostCheck {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for HostCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" ds={} port={}",
            self.check_type, self.check_info, self.dual_stack, self.port
        )
    }
}
