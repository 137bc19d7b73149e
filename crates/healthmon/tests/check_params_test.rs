//! Measurement engine scenarios driven with explicit timestamps.

use healthmon::{CheckOutcome, CheckParams, CheckSettings, HostStatus, IpAddress, QueryState, Reason, TimeStamp};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

const T0: u64 = 10_000_000;

/// Helper to build params that already know one address
fn params_with(settings: CheckSettings) -> (CheckParams, IpAddress) {
    let params = CheckParams::new(settings);
    let address: IpAddress = "192.0.2.10".parse().unwrap();
    params.empty_query(address);
    (params, address)
}

/// Helper to queue and start a check at `start`
fn begin(params: &CheckParams, address: IpAddress, start: TimeStamp) {
    params.queue_query(address);
    assert!(params.start_query_at(address, start));
}

/// Helper to feed a success with a given response time at `at`
fn succeed(params: &CheckParams, address: IpAddress, at: u64, rt: u64) -> Option<HostStatus> {
    let start = TimeStamp::from_millis(at);
    begin(params, address, start);
    let outcome = CheckOutcome::success(start, start + rt);
    params.update_check_at("web1", address, &outcome, 80, start + rt)
}

/// Helper to feed a connect failure at `at`
fn fail(params: &CheckParams, address: IpAddress, at: u64) -> Option<HostStatus> {
    let start = TimeStamp::from_millis(at);
    begin(params, address, start);
    let outcome = CheckOutcome::failure(Reason::ConnectFailure, start, start + 5);
    params.update_check_at("web1", address, &outcome, 80, start + 5)
}

#[test]
fn test_smoothed_response_time_converges() {
    let (params, address) = params_with(CheckSettings {
        smoothing_window: 5,
        ..CheckSettings::default()
    });
    for i in 0..5 {
        succeed(&params, address, T0 + i * 1_000, 100);
        let result = params.check_result(address).unwrap();
        assert_eq!(result.smoothed_response_time, 100);
    }
    let result = params.check_result(address).unwrap();
    assert_eq!(result.num_responses, 5);
    assert_eq!(result.min_response_time, 100);
    assert_eq!(result.max_response_time, 100);
}

#[test]
fn test_alternating_results_flap() {
    let (params, address) = params_with(CheckSettings {
        flap_threshold: 1_000,
        max_flaps: 2,
        ..CheckSettings::default()
    });

    let mut edges = Vec::new();
    for cycle in 0..3 {
        let at = T0 + cycle * 200;
        edges.push(succeed(&params, address, at, 10));
        edges.push(fail(&params, address, at + 100));
        if cycle == 1 {
            assert_eq!(params.check_result(address).unwrap().num_flaps, 3);
        }
    }

    assert_eq!(
        edges,
        vec![
            Some(HostStatus::Up),
            Some(HostStatus::Down),
            Some(HostStatus::Up),
            Some(HostStatus::Flapping),
            None,
            None,
        ]
    );
    assert_eq!(HostStatus::Flapping.to_string(), "FLAPPING");
}

#[test]
fn test_retry_budget_keeps_host_up() {
    let settings = CheckSettings {
        num_check_retries: 2,
        ..CheckSettings::default()
    };
    let (params, address) = params_with(settings.clone());
    succeed(&params, address, T0, 10);
    assert!(params.check_result(address).unwrap().status.hard);

    fail(&params, address, T0 + 1_000);
    fail(&params, address, T0 + 2_000);
    let result = params.check_result(address).unwrap();
    assert!(result.status.hard);
    assert!(!result.status.soft);
    assert_eq!(result.num_failed_checks, 2);
    // Failures inside the retry window still report success
    assert_eq!(result.reason, Reason::Success);

    succeed(&params, address, T0 + 3_000, 10);
    let result = params.check_result(address).unwrap();
    assert!(result.status.hard);
    assert_eq!(result.num_failed_checks, 0);

    let (params, address) = params_with(settings);
    succeed(&params, address, T0, 10);
    fail(&params, address, T0 + 1_000);
    fail(&params, address, T0 + 2_000);
    assert!(params.check_result(address).unwrap().status.hard);
    fail(&params, address, T0 + 3_000);
    assert!(!params.check_result(address).unwrap().status.hard);
}

#[test]
fn test_next_check_time_is_monotonic_without_updates() {
    let (params, address) = params_with(CheckSettings::default());
    succeed(&params, address, T0, 10);
    let mut previous = TimeStamp::ZERO;
    for step in 0..100 {
        let now = TimeStamp::from_millis(T0 + step * 700);
        let next = params.next_check_time_at(address, now);
        assert!(next >= previous);
        previous = next;
    }
}

#[test]
fn test_only_one_start_wins() {
    let (params, address) = params_with(CheckSettings::default());
    params.queue_query(address);
    let params = Arc::new(params);
    let winners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let params = params.clone();
            let winners = winners.clone();
            thread::spawn(move || {
                if params.start_query(address) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(params.query_state(address), QueryState::InProgress);
}
