//! Health check enums, status bits and default constants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default time to live of DNS resolutions in milliseconds.
pub const DEFAULT_DNS_TTL: u64 = 360_000;
/// Default time to live of a check result in milliseconds.
pub const DEFAULT_TTL: u64 = 30_000;
/// Default DNS resolution timeout in milliseconds.
pub const DEFAULT_DNS_RESOLUTION_TIMEOUT: u64 = 60_000;
/// Default check timeout in milliseconds.
pub const DEFAULT_CHECK_TIMEOUT: u64 = 10_000;
pub const DEFAULT_DNS_RETRIES: u32 = 3;
pub const DEFAULT_SMOOTHING_WINDOW: u32 = 10;
/// Two measurements within this many ms are considered a tie.
pub const DEFAULT_GROUP_THRESHOLD: u32 = 20;
/// A measurement this many ms slower than the smoothed value is re-checked.
pub const DEFAULT_SLOW_THRESHOLD: u32 = 20;
/// Window in ms within which consecutive transitions count as flaps.
pub const DEFAULT_FLAP_THRESHOLD: u32 = 60_000;
pub const DEFAULT_MAX_FLAPS: u32 = 4;

pub const HTTP_DEFAULT_PORT: u16 = 80;
pub const HTTPS_DEFAULT_PORT: u16 = 443;
pub const TCP_DEFAULT_PORT: u16 = 80;
pub const FTP_DEFAULT_PORT: u16 = 21;
pub const FTPS_DEFAULT_PORT: u16 = 990;
pub const DNS_DEFAULT_PORT: u16 = 53;

/// Protocol used to probe a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckType {
    /// No probe. Hosts are reported up once resolved.
    #[default]
    None,
    Http,
    Https,
    HttpsNoPeerCheck,
    Tcp,
    Tcps,
    Ftp,
    #[serde(alias = "ftps")]
    FtpsExplicit,
    FtpsExplicitNoPeerCheck,
    FtpsImplicit,
    FtpsImplicitNoPeerCheck,
    Dns,
    Dnsvc,
}

impl CheckType {
    /// Port used when a host group does not configure one.
    pub fn default_port(self) -> u16 {
        match self {
            CheckType::None => 0,
            CheckType::Http => HTTP_DEFAULT_PORT,
            CheckType::Https | CheckType::HttpsNoPeerCheck => HTTPS_DEFAULT_PORT,
            CheckType::Tcp | CheckType::Tcps => TCP_DEFAULT_PORT,
            CheckType::Ftp | CheckType::FtpsExplicit | CheckType::FtpsExplicitNoPeerCheck => {
                FTP_DEFAULT_PORT
            }
            CheckType::FtpsImplicit | CheckType::FtpsImplicitNoPeerCheck => FTPS_DEFAULT_PORT,
            CheckType::Dns | CheckType::Dnsvc => DNS_DEFAULT_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckType::None => "none",
            CheckType::Http => "http",
            CheckType::Https => "https",
            CheckType::HttpsNoPeerCheck => "https-no-peer-check",
            CheckType::Tcp => "tcp",
            CheckType::Tcps => "tcps",
            CheckType::Ftp => "ftp",
            CheckType::FtpsExplicit => "ftps-explicit",
            CheckType::FtpsExplicitNoPeerCheck => "ftps-explicit-no-peer-check",
            CheckType::FtpsImplicit => "ftps-implicit",
            CheckType::FtpsImplicitNoPeerCheck => "ftps-implicit-no-peer-check",
            CheckType::Dns => "dns",
            CheckType::Dnsvc => "dnsvc",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address families a check runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DualStack {
    #[default]
    Ipv4Only,
    Ipv6Only,
    Both,
}

impl DualStack {
    pub fn includes_v4(self) -> bool {
        matches!(self, DualStack::Ipv4Only | DualStack::Both)
    }

    pub fn includes_v6(self) -> bool {
        matches!(self, DualStack::Ipv6Only | DualStack::Both)
    }

    /// The stacks covered, as `ipv6` flags in v4-then-v6 order.
    pub fn stacks(self) -> impl Iterator<Item = bool> {
        [(self.includes_v4(), false), (self.includes_v6(), true)]
            .into_iter()
            .filter_map(|(on, ipv6)| on.then_some(ipv6))
    }

    /// The single-stack value for one family.
    pub fn for_stack(ipv6: bool) -> Self {
        if ipv6 { DualStack::Ipv6Only } else { DualStack::Ipv4Only }
    }
}

impl fmt::Display for DualStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DualStack::Ipv4Only => write!(f, "ipv4"),
            DualStack::Ipv6Only => write!(f, "ipv6"),
            DualStack::Both => write!(f, "both"),
        }
    }
}

/// Raw outcome of a probe at the transport level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Response {
    #[default]
    None,
    Connected,
    Failed,
    DnsFailed,
}

/// Why a probe ended the way it did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    #[default]
    None,
    Success,
    DnsNotFound,
    DnsTimeout,
    DnsFailure,
    ConnectTimeout,
    ConnectFailure,
    RequestFailure,
    ResponseTimeout,
    ResponseFailure,
    ResponseDown,
    Response404,
    Response403,
    Response3xx,
    Response5xx,
    InternalError,
    /// A remote peer had no data for this target. Soft status is left as is.
    RemoteNoData,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::None => "NONE",
            Reason::Success => "SUCCESS",
            Reason::DnsNotFound => "DNS_NOTFOUND",
            Reason::DnsTimeout => "DNS_TIMEOUT",
            Reason::DnsFailure => "DNS_FAILURE",
            Reason::ConnectTimeout => "CONNECT_TIMEOUT",
            Reason::ConnectFailure => "CONNECT_FAILURE",
            Reason::RequestFailure => "REQUEST_FAILURE",
            Reason::ResponseTimeout => "RESPONSE_TIMEOUT",
            Reason::ResponseFailure => "RESPONSE_FAILURE",
            Reason::ResponseDown => "RESPONSE_DOWN",
            Reason::Response404 => "RESPONSE_404",
            Reason::Response403 => "RESPONSE_403",
            Reason::Response3xx => "RESPONSE_3XX",
            Reason::Response5xx => "RESPONSE_5XX",
            Reason::InternalError => "INTERNAL_ERROR",
            Reason::RemoteNoData => "REMOTE_NO_DATA",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one outstanding query (health check or DNS lookup).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    #[default]
    Inactive,
    Queued,
    InProgress,
    Failed,
}

impl QueryState {
    /// Idle states are the only ones from which new work may be queued.
    pub fn is_idle(self) -> bool {
        matches!(self, QueryState::Inactive | QueryState::Failed)
    }
}

/// Scheduling decision for an entry whose timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Nothing to do: work is outstanding or a timer already covers it.
    None,
    /// Due now, queue work.
    Work,
    /// Not due within the horizon, arm a new timer.
    Event,
}

/// Which response time is compared against the timeout and thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Measurement {
    /// Time to connect.
    #[default]
    Connect,
    SmoothedConnect,
    /// Time for the whole exchange.
    Total,
    SmoothedTotal,
}

impl Measurement {
    pub fn is_total(self) -> bool {
        matches!(self, Measurement::Total | Measurement::SmoothedTotal)
    }
}

/// Source used to resolve a host's addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsType {
    /// Resolve through a DNS resolver.
    #[default]
    Lookup,
    /// Resolve from the static address table.
    Static,
    /// Never resolve.
    None,
}

impl fmt::Display for DnsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsType::Lookup => write!(f, "lookup"),
            DnsType::Static => write!(f, "static"),
            DnsType::None => write!(f, "none"),
        }
    }
}

/// Fallback flags for distributed checking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistributedFallback {
    pub local: bool,
    pub remote: bool,
}

/// Status of one address, split into the three bits the state machine tracks.
///
/// `hard` is the externally visible status and honours the retry budget.
/// `soft` is the result of the most recent probe. `flap` is the soft value
/// at the last transition check and only feeds flap detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusBits {
    pub hard: bool,
    pub soft: bool,
    pub flap: bool,
}

/// Status string reported on a transition edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    Up,
    Down,
    Flapping,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Up => write!(f, "UP"),
            HostStatus::Down => write!(f, "DOWN"),
            HostStatus::Flapping => write!(f, "FLAPPING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(CheckType::Http.default_port(), 80);
        assert_eq!(CheckType::Https.default_port(), 443);
        assert_eq!(CheckType::FtpsImplicit.default_port(), 990);
        assert_eq!(CheckType::FtpsExplicit.default_port(), 21);
        assert_eq!(CheckType::Dnsvc.default_port(), 53);
    }

    #[test]
    fn test_dual_stack_iteration() {
        assert_eq!(DualStack::Both.stacks().collect::<Vec<_>>(), vec![false, true]);
        assert_eq!(DualStack::Ipv6Only.stacks().collect::<Vec<_>>(), vec![true]);
        assert_eq!(DualStack::Ipv4Only.stacks().collect::<Vec<_>>(), vec![false]);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(HostStatus::Flapping.to_string(), "FLAPPING");
        assert_eq!(Reason::ResponseTimeout.to_string(), "RESPONSE_TIMEOUT");
        assert_eq!(CheckType::HttpsNoPeerCheck.to_string(), "https-no-peer-check");
    }

    #[test]
    fn test_check_type_serde_names() {
        let t: CheckType = serde_json::from_str("\"ftps-implicit-no-peer-check\"").unwrap();
        assert_eq!(t, CheckType::FtpsImplicitNoPeerCheck);
    }
}
