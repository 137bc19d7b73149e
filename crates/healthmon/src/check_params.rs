//! Per-check statistics: retry, flap and response-time smoothing.

use crate::address::IpAddress;
use crate::check_result::{CheckOutcome, CheckResult};
use crate::timestamp::{HOUR_MS, TimeStamp};
use crate::types::{
    DEFAULT_CHECK_TIMEOUT, DEFAULT_FLAP_THRESHOLD, DEFAULT_GROUP_THRESHOLD, DEFAULT_MAX_FLAPS,
    DEFAULT_SLOW_THRESHOLD, DEFAULT_SMOOTHING_WINDOW, DEFAULT_TTL, HostStatus, Measurement,
    QueryState, Reason, Response,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

/// Static parameters of a check, copied in from its host group.
///
/// Two settings are equal when every field matches. A host check entry can
/// carry several parameter sets when groups share the probe but not the
/// tuning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckSettings {
    pub num_check_retries: u32,
    pub check_retry_delay: u64,
    pub measurement: Measurement,
    pub smoothing_window: u32,
    pub group_threshold: u32,
    pub slow_threshold: u32,
    pub max_flaps: u32,
    pub check_timeout: u64,
    pub check_ttl: u64,
    pub flap_threshold: u32,
    pub passthrough_info: u32,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            num_check_retries: 0,
            check_retry_delay: 0,
            measurement: Measurement::Connect,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            group_threshold: DEFAULT_GROUP_THRESHOLD,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            max_flaps: DEFAULT_MAX_FLAPS,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            check_ttl: DEFAULT_TTL,
            flap_threshold: DEFAULT_FLAP_THRESHOLD,
            passthrough_info: 0,
        }
    }
}

impl CheckSettings {
    /// Replace out of range values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.smoothing_window == 0 {
            self.smoothing_window = DEFAULT_SMOOTHING_WINDOW;
        }
        self
    }

    fn flap_window(&self) -> u64 {
        if self.flap_threshold == 0 {
            DEFAULT_FLAP_THRESHOLD as u64
        } else {
            self.flap_threshold as u64
        }
    }
}

/// Mutable measurement state of one (hostname, host check, settings) entry,
/// keyed further by resolved address.
///
/// All per-address state sits behind a single reader/writer lock.
#[derive(Debug)]
pub struct CheckParams {
    settings: CheckSettings,
    host_groups: RwLock<Vec<String>>,
    results: RwLock<BTreeMap<IpAddress, CheckResult>>,
}

impl CheckParams {
    /// Create an entry with no addresses.
    pub fn new(settings: CheckSettings) -> Self {
        Self {
            settings: settings.normalized(),
            host_groups: RwLock::new(Vec::new()),
            results: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    pub fn timeout(&self) -> u64 {
        self.settings.check_timeout
    }

    pub fn ttl(&self) -> u64 {
        self.settings.check_ttl
    }

    /// Record that `name` uses this entry. Duplicates are ignored.
    pub fn add_host_group(&self, name: &str) {
        let mut groups = self.host_groups.write();
        if !groups.iter().any(|g| g == name) {
            groups.push(name.to_string());
        }
    }

    pub fn host_groups(&self) -> Vec<String> {
        self.host_groups.read().clone()
    }

    pub fn serves_group(&self, name: &str) -> bool {
        self.host_groups.read().iter().any(|g| g == name)
    }

    /// Mark `address` as queued, creating its record if needed.
    pub fn queue_query(&self, address: IpAddress) {
        let mut results = self.results.write();
        results
            .entry(address)
            .or_insert_with(|| CheckResult::with_timeout(self.settings.check_timeout))
            .query_state = QueryState::Queued;
    }

    /// Mark `address` queued unless a query for it is outstanding.
    ///
    /// The idle test and the transition happen under one lock, so only one
    /// of several concurrent callers gets true.
    pub fn try_queue_query(&self, address: IpAddress) -> bool {
        let mut results = self.results.write();
        let entry = results
            .entry(address)
            .or_insert_with(|| CheckResult::with_timeout(self.settings.check_timeout));
        if !entry.query_state.is_idle() {
            return false;
        }
        entry.query_state = QueryState::Queued;
        true
    }

    /// Ensure a record exists for `address` and mark it inactive.
    pub fn empty_query(&self, address: IpAddress) {
        let mut results = self.results.write();
        results
            .entry(address)
            .or_insert_with(|| CheckResult::with_timeout(self.settings.check_timeout))
            .query_state = QueryState::Inactive;
    }

    pub fn start_query(&self, address: IpAddress) -> bool {
        self.start_query_at(address, TimeStamp::now())
    }

    /// Move a queued address to in progress.
    ///
    /// Returns false, leaving the record untouched, when the address is
    /// unknown or not queued.
    pub fn start_query_at(&self, address: IpAddress, now: TimeStamp) -> bool {
        let mut results = self.results.write();
        let Some(entry) = results.get_mut(&address) else {
            return false;
        };
        if entry.query_state != QueryState::Queued {
            debug!(%address, state = ?entry.query_state, "Ignoring start of a check that is not queued");
            return false;
        }
        entry.check_time = now;
        entry.query_state = QueryState::InProgress;
        true
    }

    pub fn is_valid_ip(&self, address: IpAddress) -> bool {
        self.results.read().contains_key(&address)
    }

    pub fn query_state(&self, address: IpAddress) -> QueryState {
        self.results
            .read()
            .get(&address)
            .map(|r| r.query_state)
            .unwrap_or_default()
    }

    pub fn addresses(&self) -> Vec<IpAddress> {
        self.results.read().keys().copied().collect()
    }

    pub fn check_time(&self, address: IpAddress) -> TimeStamp {
        self.results
            .read()
            .get(&address)
            .map(|r| r.check_time)
            .unwrap_or_default()
    }

    /// Deadline handed to a worker that queues `address` now.
    pub fn check_deadline_at(&self, now: TimeStamp) -> TimeStamp {
        now + self.settings.check_ttl
    }

    pub fn next_check_time(&self, address: IpAddress) -> TimeStamp {
        self.next_check_time_at(address, TimeStamp::now())
    }

    /// When `address` is next due.
    pub fn next_check_time_at(&self, address: IpAddress, now: TimeStamp) -> TimeStamp {
        let results = self.results.read();
        let Some(entry) = results.get(&address) else {
            return now;
        };
        if !entry.query_state.is_idle() {
            return now + HOUR_MS;
        }
        let s = &self.settings;
        if entry.check_time + s.check_ttl < now {
            return now;
        }
        let retry_pending = entry.num_slow_responses > 0
            || (!entry.status.soft
                && entry.status.hard
                && entry.num_failed_checks <= s.num_check_retries);
        if retry_pending {
            entry.check_time + s.check_retry_delay
        } else {
            entry.check_time + s.check_ttl
        }
    }

    /// Store `result` for `address`, keeping an existing record unless
    /// `force` is set or the existing record is older.
    pub fn replace_result(&self, address: IpAddress, result: CheckResult, force: bool) {
        let mut results = self.results.write();
        match results.get_mut(&address) {
            Some(existing) => {
                if force || existing.check_time < result.check_time {
                    *existing = result;
                }
            }
            None => {
                results.insert(address, result);
            }
        }
    }

    /// Record a DNS failure for `address` without counting it as a check.
    ///
    /// Creates the record when needed and leaves it inactive.
    pub fn record_dns_failure(&self, address: IpAddress, outcome: &CheckOutcome, port: u16) {
        let mut results = self.results.write();
        let entry = results
            .entry(address)
            .or_insert_with(|| CheckResult::with_timeout(self.settings.check_timeout));
        entry.status.soft = false;
        entry.status_changed = false;
        entry.address = address;
        entry.response = outcome.response;
        entry.reason = outcome.reason;
        entry.start = outcome.start;
        entry.end = outcome.end;
        entry.port = port;
        entry.check_time = outcome.start;
        entry.query_state = QueryState::Inactive;
    }

    pub fn update_check(
        &self,
        hostname: &str,
        address: IpAddress,
        outcome: &CheckOutcome,
        port: u16,
    ) -> Option<HostStatus> {
        self.update_check_at(hostname, address, outcome, port, TimeStamp::now())
    }

    /// Apply a probe result to the record of `address`.
    ///
    /// Returns the status to report when the result crosses a status edge.
    pub fn update_check_at(
        &self,
        hostname: &str,
        address: IpAddress,
        outcome: &CheckOutcome,
        port: u16,
        now: TimeStamp,
    ) -> Option<HostStatus> {
        let s = &self.settings;
        let mut results = self.results.write();
        let entry = results.get_mut(&address)?;
        if entry.query_state != QueryState::InProgress {
            debug!(
                host = hostname,
                %address,
                state = ?entry.query_state,
                "Ignoring result of a check that is not in progress"
            );
            return None;
        }

        trace!(
            host = hostname,
            %address,
            failed = entry.num_failed_checks,
            checks = entry.num_checks,
            retries = s.num_check_retries,
            "Updating check"
        );

        let reason = outcome.reason;
        if reason != Reason::RemoteNoData {
            entry.status.soft = false;
        }
        entry.status_changed = false;
        entry.address = address;
        entry.response = outcome.response;
        entry.reason = reason;
        entry.start = outcome.start;
        entry.end = outcome.end;
        entry.port = port;

        if outcome.response == Response::DnsFailed {
            entry.check_time = outcome.start;
            entry.query_state = QueryState::Inactive;
            return None;
        }

        entry.num_checks += 1;
        entry.check_time = now;
        entry.query_state = QueryState::Inactive;

        if outcome.response == Response::Connected {
            if reason == Reason::Success {
                self.set_response(hostname, entry, outcome.start, outcome.end, now);
            }
            if entry.reason != Reason::Success {
                entry.num_failures += 1;
            }
        } else {
            match reason {
                Reason::ConnectFailure | Reason::InternalError | Reason::RemoteNoData => {
                    entry.num_connect_failures += 1
                }
                Reason::ResponseFailure => entry.num_failures += 1,
                Reason::ConnectTimeout => entry.num_timeouts += 1,
                _ => {}
            }
        }
        entry.soft_reason = entry.reason;

        // Remote results without data bypass retry and flap handling
        if reason == Reason::RemoteNoData {
            return None;
        }

        let groups = self.host_groups.read().join(",");

        if entry.status.hard && !entry.status.soft {
            entry.num_failed_checks += 1;
            if entry.num_failed_checks <= s.num_check_retries {
                info!(
                    host = hostname,
                    %address,
                    attempt = entry.num_failed_checks,
                    of = s.num_check_retries + 1,
                    reason = %entry.reason,
                    groups = %groups,
                    "Check failed within retry budget"
                );
                // Still inside the retry window, keep reporting success
                entry.reason = Reason::Success;
            }
        }

        if entry.status.soft {
            if entry.num_failed_checks > 0 {
                info!(
                    host = hostname,
                    %address,
                    retries = entry.num_failed_checks,
                    groups = %groups,
                    "Check successful after retry"
                );
                entry.num_failed_checks = 0;
            }
            entry.status.hard = true;
        }

        if entry.num_failed_checks > s.num_check_retries {
            info!(
                host = hostname,
                %address,
                failed = entry.num_failed_checks,
                reason = %entry.reason,
                groups = %groups,
                "Marked DOWN after exhausting retries"
            );
            entry.status.hard = false;
            entry.num_failed_checks = 0;
        }

        let mut edge = None;
        let since_flap = outcome.start - entry.flap_time;
        if entry.status.soft != entry.status.flap {
            if since_flap < s.flap_window() {
                entry.num_flaps += 1;
            } else {
                entry.num_flaps = 0;
            }

            if entry.num_flaps <= s.max_flaps + 1 {
                let status = if entry.num_flaps > s.max_flaps {
                    HostStatus::Flapping
                } else if entry.status.soft {
                    HostStatus::Up
                } else {
                    HostStatus::Down
                };
                entry.status_changed = true;
                info!(
                    host = hostname,
                    %address,
                    port,
                    %status,
                    reason = %entry.reason,
                    groups = %groups,
                    "Target status changed"
                );
                edge = Some(status);
            }
            entry.flap_time = outcome.start;
            entry.change_time = outcome.start;
        } else if since_flap >= s.flap_window() {
            entry.num_flaps = 0;
        }

        entry.status.flap = entry.status.soft;
        edge
    }

    fn set_response(
        &self,
        hostname: &str,
        entry: &mut CheckResult,
        start: TimeStamp,
        end: TimeStamp,
        now: TimeStamp,
    ) {
        let s = &self.settings;
        let rt = end - start;
        let total = now - start;
        let measured = if s.measurement.is_total() { total } else { rt };

        if measured >= s.check_timeout {
            entry.reason = Reason::ResponseTimeout;
            info!(
                host = hostname,
                address = %entry.address,
                rt,
                total,
                timeout = s.check_timeout,
                "Responded after timeout"
            );
            return;
        }

        if entry.num_responses == 0 {
            entry.smoothed_response_time = 0;
            entry.max_response_time = rt;
        }
        let window = s.smoothing_window.max(1) as u64;
        let smoothed = if entry.smoothed_response_time != 0 {
            (measured + entry.smoothed_response_time * (window - 1)) / window
        } else {
            measured
        };

        entry.reason = Reason::Success;
        entry.num_responses += 1;
        entry.sum_response_time += rt;
        if entry.min_response_time == 0 || rt < entry.min_response_time {
            entry.min_response_time = rt;
        }
        if rt > entry.max_response_time {
            entry.max_response_time = rt;
        }

        let slow_threshold = s.group_threshold.max(s.slow_threshold) as u64;
        let slow = s.num_check_retries > 0
            && entry.smoothed_response_time != 0
            && rt >= entry.smoothed_response_time + slow_threshold;
        if slow && entry.num_slow_responses < s.num_check_retries {
            entry.num_slow_responses += 1;
            info!(
                host = hostname,
                address = %entry.address,
                attempt = entry.num_slow_responses,
                of = s.num_check_retries + 1,
                rt,
                smoothed = entry.smoothed_response_time,
                "Skipping slow response"
            );
        } else {
            entry.num_slow_responses = 0;
            entry.total_response_time = total;
            entry.response_time = rt;
            entry.smoothed_response_time = smoothed;
        }
        entry.status.soft = true;
    }

    pub fn check_result(&self, address: IpAddress) -> Option<CheckResult> {
        self.results.read().get(&address).cloned()
    }

    /// Snapshot of every address record.
    pub fn results(&self) -> Vec<CheckResult> {
        self.results
            .read()
            .iter()
            .map(|(address, result)| CheckResult {
                address: *address,
                ..result.clone()
            })
            .collect()
    }

    /// Remove and return the record of `address`.
    pub fn invalidate_result(&self, address: IpAddress) -> Option<CheckResult> {
        self.results.write().remove(&address)
    }

    /// Administrative override. `None` applies to every address.
    pub fn set_host_status(&self, address: Option<IpAddress>, force_down: bool) {
        let mut results = self.results.write();
        match address {
            Some(address) => {
                if let Some(entry) = results.get_mut(&address) {
                    entry.force_host_down = force_down;
                    debug!(%address, force_down, "Set forced host status");
                }
            }
            None => {
                for (address, entry) in results.iter_mut() {
                    entry.force_host_down = force_down;
                    debug!(%address, force_down, "Set forced host status");
                }
            }
        }
    }
}
