//! Worker thread body: pull work, run it, apply the outcome.
//!
//! A worker pins the generation that was current when the item started so a
//! reload waits for in-flight probes. Outcomes are applied to the generation
//! current at completion.

use crate::address::IpAddress;
use crate::check_result::CheckOutcome;
use crate::dns_cache::DnsLookup;
use crate::event_loop::Scheduler;
use crate::host_check::HostCheck;
use crate::state::State;
use crate::timestamp::TimeStamp;
use crate::types::{DualStack, Reason, Response};
use crate::work::{Work, WorkKind};
use crate::work_queue::WorkQueue;
use arc_swap::ArcSwap;
use common::Error;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// What every worker shares.
#[derive(Clone)]
pub struct WorkerContext {
    pub state: Arc<ArcSwap<State>>,
    pub queue: Arc<WorkQueue>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Per-thread flags read by the pool monitor.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    pub shutdown: AtomicBool,
    pub idle: AtomicBool,
    pub processed: AtomicU64,
}

impl WorkerStatus {
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Loop until the thread is told to stop or the queue shuts down.
pub fn run_worker(ctx: &WorkerContext, status: &WorkerStatus) {
    loop {
        status.idle.store(true, Ordering::Relaxed);
        let Some(work) = ctx.queue.get_work(&status.shutdown) else {
            break;
        };
        status.idle.store(false, Ordering::Relaxed);
        process_work(ctx, work);
        status.processed.fetch_add(1, Ordering::Relaxed);
    }
    status.idle.store(true, Ordering::Relaxed);
}

pub fn process_work(ctx: &WorkerContext, work: Work) {
    trace!(id = %work.id, kind = work.type_name(), host = %work.hostname, "Processing work");
    match &work.kind {
        WorkKind::HealthCheck(check) => process_health_check(ctx, &work, check),
        WorkKind::DnsLookup(lookup) => process_dns_lookup(ctx, &work, *lookup),
    }
}

fn process_health_check(ctx: &WorkerContext, work: &Work, check: &HostCheck) {
    let (hostname, address) = (work.hostname.as_str(), work.address);
    let outcome = {
        let started = ctx.state.load_full();
        let Some(deadline) = started.check_list.start_check(hostname, address, check) else {
            debug!(host = hostname, %address, "Check not queued, dropping work");
            return;
        };
        let plugin = started.plugins.check_plugin(check);
        debug!(host = hostname, %address, plugin = plugin.name(), "Running health check");
        plugin.perform(hostname, address, check, deadline)
    };

    let state = ctx.state.load_full();
    let list = &state.check_list;
    let edges = list.update_check(hostname, address, check, &outcome);
    list.store_check(hostname, address, check, state.backend.as_ref());
    list.publish_check(hostname, address, check, state.publisher.as_ref());
    if !edges.is_empty() {
        debug!(host = hostname, %address, ?edges, "Status edges crossed");
    }

    if !state
        .dns_cache
        .is_valid_address(hostname, check.dual_stack, check.dns_type, address)
    {
        debug!(host = hostname, %address, "Address no longer resolves, not rescheduling");
        return;
    }
    let next = list.next_check_time(hostname, address, check);
    if next <= TimeStamp::now() {
        list.queue_check(hostname, address, check, &ctx.queue);
    } else {
        ctx.scheduler.add_health_check_timeout(hostname, address, check, next);
    }
}

fn process_dns_lookup(ctx: &WorkerContext, work: &Work, lookup: DnsLookup) {
    let hostname = work.hostname.as_str();
    let start = TimeStamp::now();
    let answer = {
        let started = ctx.state.load_full();
        let Some(deadline) = started.dns_cache.start_dns_query(hostname, lookup) else {
            return;
        };
        match started.plugins.dns_plugin(lookup.dns_type) {
            Some(plugin) => plugin.resolve(hostname, lookup.ipv6, deadline),
            None => Err(Error::dns(format!("no resolver for dns type {}", lookup.dns_type))),
        }
    };

    let state = ctx.state.load_full();
    let cache = &state.dns_cache;
    let success = match answer {
        Ok(answer) if !answer.addresses.is_empty() => {
            debug!(
                host = hostname,
                ipv6 = lookup.ipv6,
                addresses = answer.addresses.len(),
                ttl_secs = ?answer.ttl_secs,
                "Resolved"
            );
            cache.update_dns_entry(hostname, lookup, answer.addresses);
            true
        }
        Ok(_) => {
            keep_or_placeholder(&state, hostname, lookup, "no addresses returned");
            false
        }
        Err(e) => {
            keep_or_placeholder(&state, hostname, lookup, &e.to_string());
            false
        }
    };

    let now = TimeStamp::now();
    cache.finish_query_at(hostname, lookup, success, now);
    let next = cache.next_query_time_at(hostname, lookup, now);
    if next <= now {
        cache.queue_dns_query(hostname, lookup, &ctx.queue);
    } else {
        ctx.scheduler.add_dns_timeout(hostname, lookup, next);
    }

    let failed = CheckOutcome::new(Response::DnsFailed, Reason::DnsFailure, start, now);
    release_waiters(ctx, &state, work, lookup, &failed);
}

/// Keep the last known addresses. A host that never resolved gets the
/// unspecified address so it still shows up as down.
fn keep_or_placeholder(state: &State, hostname: &str, lookup: DnsLookup, error: &str) {
    let cached = state
        .dns_cache
        .dns_result(hostname, lookup)
        .is_some_and(|r| r.has_addresses());
    warn!(host = hostname, ipv6 = lookup.ipv6, error, stale = cached, "DNS lookup failed");
    if !cached {
        let placeholder: BTreeSet<IpAddress> = [IpAddress::unspecified(lookup.ipv6)].into();
        state.dns_cache.update_dns_entry(hostname, lookup, placeholder);
    }
}

/// Hand the fresh addresses of one stack to every check waiting on them.
fn release_waiters(ctx: &WorkerContext, state: &State, work: &Work, lookup: DnsLookup, failed: &CheckOutcome) {
    let hostname = work.hostname.as_str();
    let stack = DualStack::for_stack(lookup.ipv6);
    let list = &state.check_list;
    let now = TimeStamp::now();

    for check in state.wait_list.checks(hostname, lookup.dns_type) {
        if !check.dual_stack.stacks().any(|ipv6| ipv6 == lookup.ipv6) {
            continue;
        }
        for address in state.dns_cache.expired_addresses(hostname, stack, lookup.dns_type) {
            list.invalidate_check(hostname, address, &check, state.backend.as_ref());
        }
        for address in state.dns_cache.addresses(hostname, stack, lookup.dns_type) {
            if address == work.address {
                list.insert_empty_query(hostname, address, &check, failed);
                list.store_check(hostname, address, &check, state.backend.as_ref());
            } else if list.next_check_time_at(hostname, address, &check, now) <= now {
                list.queue_check(hostname, address, &check, &ctx.queue);
            }
        }
    }
}
