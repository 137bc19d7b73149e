//! Built in check plugins.

use super::CheckPlugin;
use crate::address::IpAddress;
use crate::check_result::CheckOutcome;
use crate::host_check::HostCheck;
use crate::timestamp::TimeStamp;
use crate::types::{CheckType, Reason, Response};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::Resolver;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;

/// Time left until `deadline`, or `None` when it has passed.
fn remaining(deadline: TimeStamp) -> Option<Duration> {
    let left = deadline.until(TimeStamp::now());
    (!left.is_zero()).then_some(left)
}

fn socket_addr(address: IpAddress, port: u16) -> Option<SocketAddr> {
    address.to_ip_addr().map(|ip| SocketAddr::new(ip, port))
}

fn connect_failure_reason(err: &io::Error) -> Reason {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Reason::ConnectTimeout,
        _ => Reason::ConnectFailure,
    }
}

fn connect(
    address: IpAddress,
    port: u16,
    deadline: TimeStamp,
    start: TimeStamp,
) -> Result<TcpStream, CheckOutcome> {
    let Some(target) = socket_addr(address, port) else {
        return Err(CheckOutcome::failure(Reason::InternalError, start, TimeStamp::now()));
    };
    let Some(budget) = remaining(deadline) else {
        return Err(CheckOutcome::failure(Reason::ConnectTimeout, start, start));
    };
    TcpStream::connect_timeout(&target, budget).map_err(|e| {
        debug!(%target, error = %e, "TCP connect failed");
        CheckOutcome::failure(connect_failure_reason(&e), start, TimeStamp::now())
    })
}

/// Reports every target up without probing it.
pub struct NoneCheck;

impl CheckPlugin for NoneCheck {
    fn perform(&self, _: &str, _: IpAddress, _: &HostCheck, _: TimeStamp) -> CheckOutcome {
        let now = TimeStamp::now();
        CheckOutcome::success(now, now)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Reports an internal error for check types without a plugin.
pub struct UnsupportedCheck;

impl CheckPlugin for UnsupportedCheck {
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, _: TimeStamp) -> CheckOutcome {
        warn!(host = hostname, %address, check_type = %check.check_type, "No plugin for check type");
        let now = TimeStamp::now();
        CheckOutcome::failure(Reason::InternalError, now, now)
    }

    fn name(&self) -> &str {
        "unsupported"
    }
}

/// TCP connect check.
pub struct TcpCheck;

impl CheckPlugin for TcpCheck {
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, deadline: TimeStamp) -> CheckOutcome {
        let start = TimeStamp::now();
        match connect(address, check.port, deadline, start) {
            Ok(_stream) => {
                let end = TimeStamp::now();
                debug!(host = hostname, %address, port = check.port, duration_ms = end - start, "TCP check successful");
                CheckOutcome::success(start, end)
            }
            Err(outcome) => outcome,
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// HTTP and HTTPS check. Any 2xx status is a success.
pub struct HttpCheck;

impl HttpCheck {
    fn status_reason(status: u16) -> Reason {
        match status {
            200..=299 => Reason::Success,
            300..=399 => Reason::Response3xx,
            403 => Reason::Response403,
            404 => Reason::Response404,
            500..=599 => Reason::Response5xx,
            _ => Reason::ResponseFailure,
        }
    }

    fn error_reason(err: &reqwest::Error) -> Reason {
        if err.is_timeout() {
            if err.is_connect() {
                Reason::ConnectTimeout
            } else {
                Reason::ResponseTimeout
            }
        } else if err.is_connect() {
            Reason::ConnectFailure
        } else {
            Reason::RequestFailure
        }
    }
}

impl CheckPlugin for HttpCheck {
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, deadline: TimeStamp) -> CheckOutcome {
        let start = TimeStamp::now();
        let Some(budget) = remaining(deadline) else {
            return CheckOutcome::failure(Reason::ConnectTimeout, start, start);
        };
        let Some(ip) = address.to_ip_addr() else {
            return CheckOutcome::failure(Reason::InternalError, start, start);
        };

        let scheme = if check.check_type == CheckType::Http { "http" } else { "https" };
        let (host_header, path) = check.http_target(hostname);
        let url = format!("{}://{}{}", scheme, SocketAddr::new(ip, check.port), path);

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(budget)
            .connect_timeout(budget)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(check.check_type == CheckType::HttpsNoPeerCheck);
        if let Some(source) = check.source_address.to_ip_addr() {
            builder = builder.local_address(source);
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                warn!(host = hostname, error = %e, "Failed to build HTTP client");
                return CheckOutcome::failure(Reason::InternalError, start, TimeStamp::now());
            }
        };

        match client.get(&url).header(reqwest::header::HOST, host_header).send() {
            Ok(response) => {
                let end = TimeStamp::now();
                let status = response.status().as_u16();
                let reason = Self::status_reason(status);
                debug!(host = hostname, %url, status, duration_ms = end - start, "HTTP check completed");
                CheckOutcome::new(Response::Connected, reason, start, end)
            }
            Err(e) => {
                debug!(host = hostname, %url, error = %e, "HTTP check failed");
                CheckOutcome::failure(Self::error_reason(&e), start, TimeStamp::now())
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Plain FTP check: connect and wait for a `220` greeting.
pub struct FtpCheck;

impl CheckPlugin for FtpCheck {
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, deadline: TimeStamp) -> CheckOutcome {
        let start = TimeStamp::now();
        let mut stream = match connect(address, check.port, deadline, start) {
            Ok(stream) => stream,
            Err(outcome) => return outcome,
        };
        let Some(budget) = remaining(deadline) else {
            return CheckOutcome::failure(Reason::ResponseTimeout, start, TimeStamp::now());
        };
        if stream.set_read_timeout(Some(budget)).is_err() {
            return CheckOutcome::failure(Reason::InternalError, start, TimeStamp::now());
        }

        let mut banner = [0u8; 512];
        match stream.read(&mut banner) {
            Ok(n) if banner[..n].starts_with(b"220") => {
                let end = TimeStamp::now();
                debug!(host = hostname, %address, duration_ms = end - start, "FTP check successful");
                CheckOutcome::success(start, end)
            }
            Ok(n) => {
                debug!(host = hostname, %address, banner = %String::from_utf8_lossy(&banner[..n]).trim(), "Unexpected FTP greeting");
                CheckOutcome::new(Response::Connected, Reason::ResponseFailure, start, TimeStamp::now())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                CheckOutcome::new(Response::Connected, Reason::ResponseTimeout, start, TimeStamp::now())
            }
            Err(e) => {
                debug!(host = hostname, %address, error = %e, "FTP read failed");
                CheckOutcome::new(Response::Connected, Reason::ResponseFailure, start, TimeStamp::now())
            }
        }
    }

    fn name(&self) -> &str {
        "ftp"
    }
}

/// Queries the target as a DNS server.
///
/// The query name is the check info, or the hostname when empty. For
/// `dnsvc` any answer from the server, including an empty one, is a
/// success.
pub struct DnsServiceCheck {
    timeout: Duration,
}

impl DnsServiceCheck {
    /// Create a new DNS service check with an upper bound per query.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CheckPlugin for DnsServiceCheck {
    fn perform(&self, hostname: &str, address: IpAddress, check: &HostCheck, deadline: TimeStamp) -> CheckOutcome {
        let start = TimeStamp::now();
        let (Some(target), Some(budget)) = (socket_addr(address, check.port), remaining(deadline)) else {
            return CheckOutcome::failure(Reason::ConnectTimeout, start, start);
        };

        let servers = NameServerConfigGroup::from_ips_clear(&[target.ip()], target.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], servers);
        let mut opts = ResolverOpts::default();
        opts.timeout = budget.min(self.timeout);
        opts.attempts = 1;
        opts.cache_size = 0;

        let resolver = match Resolver::new(config, opts) {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Failed to build DNS resolver");
                return CheckOutcome::failure(Reason::InternalError, start, TimeStamp::now());
            }
        };

        let query = if check.check_info.is_empty() { hostname } else { check.check_info.as_str() };
        let result = resolver.lookup_ip(query);
        let end = TimeStamp::now();
        match result {
            Ok(_) => CheckOutcome::success(start, end),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } if check.check_type == CheckType::Dnsvc => {
                    CheckOutcome::success(start, end)
                }
                ResolveErrorKind::NoRecordsFound { .. } => {
                    CheckOutcome::new(Response::Connected, Reason::ResponseFailure, start, end)
                }
                ResolveErrorKind::Timeout => CheckOutcome::failure(Reason::ConnectTimeout, start, end),
                _ => {
                    debug!(host = hostname, %target, error = %e, "DNS service check failed");
                    CheckOutcome::failure(Reason::ConnectFailure, start, end)
                }
            },
        }
    }

    fn name(&self) -> &str {
        "dns"
    }
}
