//! IP address value type used as a key throughout the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 or IPv6 address, or no address at all.
///
/// Ordering is by family first (unset < v4 < v6), then by address bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IpAddress {
    #[default]
    Unset,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    /// The unspecified address of a stack (`0.0.0.0` or `::`).
    ///
    /// Stored as a placeholder when a host has never resolved.
    pub const fn unspecified(ipv6: bool) -> Self {
        if ipv6 {
            IpAddress::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddress::V4(Ipv4Addr::UNSPECIFIED)
        }
    }

    pub const fn is_set(&self) -> bool {
        !matches!(self, IpAddress::Unset)
    }

    pub const fn is_v4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub const fn is_v6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// True for `0.0.0.0` and `::`.
    pub fn is_unspecified(&self) -> bool {
        match self {
            IpAddress::Unset => false,
            IpAddress::V4(a) => a.is_unspecified(),
            IpAddress::V6(a) => a.is_unspecified(),
        }
    }

    pub fn to_ip_addr(&self) -> Option<IpAddr> {
        match self {
            IpAddress::Unset => None,
            IpAddress::V4(a) => Some(IpAddr::V4(*a)),
            IpAddress::V6(a) => Some(IpAddr::V6(*a)),
        }
    }
}

impl From<IpAddr> for IpAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(a) => IpAddress::V4(a),
            IpAddr::V6(a) => IpAddress::V6(a),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(a: Ipv4Addr) -> Self {
        IpAddress::V4(a)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(a: Ipv6Addr) -> Self {
        IpAddress::V6(a)
    }
}

impl FromStr for IpAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>().map(IpAddress::from)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::Unset => write!(f, "unset"),
            IpAddress::V4(a) => write!(f, "{}", a),
            IpAddress::V6(a) => write!(f, "{}", a),
        }
    }
}
