//! Per-address measurement record.

use crate::address::IpAddress;
use crate::timestamp::TimeStamp;
use crate::types::{HostStatus, QueryState, Reason, Response, StatusBits};
use serde::{Deserialize, Serialize};

/// Statistics and status of one (host, check, address) target.
///
/// Response times are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub address: IpAddress,
    pub start: TimeStamp,
    pub end: TimeStamp,
    pub response_time: u64,
    pub total_response_time: u64,
    pub min_response_time: u64,
    pub max_response_time: u64,
    pub smoothed_response_time: u64,
    pub sum_response_time: u64,
    pub num_checks: u32,
    pub num_responses: u32,
    pub num_connect_failures: u32,
    pub num_failures: u32,
    pub num_timeouts: u32,
    pub num_flaps: u32,
    pub num_failed_checks: u32,
    pub num_slow_responses: u32,
    pub status: StatusBits,
    pub response: Response,
    pub reason: Reason,
    /// Reason of the last probe before retry masking.
    pub soft_reason: Reason,
    pub port: u16,
    pub change_time: TimeStamp,
    pub flap_time: TimeStamp,
    pub check_time: TimeStamp,
    pub force_host_down: bool,
    pub query_state: QueryState,
    /// Set when the last update crossed a status edge.
    #[serde(skip)]
    pub status_changed: bool,
}

impl CheckResult {
    /// Fresh record whose response times start at the check timeout.
    pub fn with_timeout(timeout: u64) -> Self {
        Self {
            response_time: timeout,
            total_response_time: timeout,
            min_response_time: timeout,
            max_response_time: timeout,
            smoothed_response_time: timeout,
            ..Self::default()
        }
    }

    /// Externally visible status, honouring the administrative override.
    pub fn is_up(&self) -> bool {
        self.status.hard && !self.force_host_down
    }

    pub fn host_status(&self) -> HostStatus {
        if self.is_up() { HostStatus::Up } else { HostStatus::Down }
    }
}

/// Raw result reported by a check plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub response: Response,
    pub reason: Reason,
    pub start: TimeStamp,
    pub end: TimeStamp,
}

impl CheckOutcome {
    pub fn new(response: Response, reason: Reason, start: TimeStamp, end: TimeStamp) -> Self {
        Self { response, reason, start, end }
    }

    /// Connected with a successful response.
    pub fn success(start: TimeStamp, end: TimeStamp) -> Self {
        Self::new(Response::Connected, Reason::Success, start, end)
    }

    /// Failed at the transport level.
    pub fn failure(reason: Reason, start: TimeStamp, end: TimeStamp) -> Self {
        Self::new(Response::Failed, reason, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_seeds_response_times() {
        let r = CheckResult::with_timeout(5_000);
        assert_eq!(r.smoothed_response_time, 5_000);
        assert_eq!(r.min_response_time, 5_000);
        assert_eq!(r.sum_response_time, 0);
        assert_eq!(r.query_state, QueryState::Inactive);
    }

    #[test]
    fn test_force_down_masks_hard_status() {
        let mut r = CheckResult::default();
        r.status.hard = true;
        assert_eq!(r.host_status(), HostStatus::Up);
        r.force_host_down = true;
        assert!(!r.is_up());
        assert_eq!(r.host_status(), HostStatus::Down);
    }
}
