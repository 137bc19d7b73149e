//! Timer thread that wakes entries when they are due.
//!
//! Timers carry only the identity of what to re-evaluate. When one fires the
//! decision is taken against whatever state is current at that moment, so
//! timers armed by an older generation are harmless.

use crate::address::IpAddress;
use crate::dns_cache::DnsLookup;
use crate::host_check::HostCheck;
use crate::state::State;
use crate::timestamp::TimeStamp;
use crate::types::Schedule;
use crate::work_queue::WorkQueue;
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Sleep used when no timer is armed.
const IDLE_SLEEP: Duration = Duration::from_secs(300);

/// Arms re-evaluation timers.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send + Sync {
    fn add_health_check_timeout(&self, hostname: &str, address: IpAddress, check: &HostCheck, at: TimeStamp);

    fn add_dns_timeout(&self, hostname: &str, lookup: DnsLookup, at: TimeStamp);
}

/// What a timer re-evaluates when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    HealthCheck {
        hostname: String,
        address: IpAddress,
        check: HostCheck,
    },
    Dns {
        hostname: String,
        lookup: DnsLookup,
    },
}

#[derive(Debug)]
struct TimerEntry {
    at: TimeStamp,
    seq: u64,
    timer: Timer,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct Shared {
    timers: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    wake: Condvar,
    seq: AtomicU64,
    shutdown: AtomicBool,
    state: Arc<ArcSwap<State>>,
    queue: Arc<WorkQueue>,
}

impl Shared {
    fn push(&self, at: TimeStamp, timer: Timer) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let mut timers = self.timers.lock();
        let preempt = timers.peek().is_none_or(|Reverse(first)| at < first.at);
        timers.push(Reverse(TimerEntry { at, seq, timer }));
        if preempt {
            self.wake.notify_one();
        }
    }

    fn run(&self) {
        info!("Timer thread started");
        let mut timers = self.timers.lock();
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }
            let now = TimeStamp::now();
            match timers.peek() {
                None => {
                    self.wake.wait_for(&mut timers, IDLE_SLEEP);
                }
                Some(Reverse(first)) if first.at > now => {
                    let sleep = first.at.until(now);
                    self.wake.wait_for(&mut timers, sleep);
                }
                Some(_) => {
                    if let Some(Reverse(entry)) = timers.pop() {
                        drop(timers);
                        self.fire(entry.timer);
                        timers = self.timers.lock();
                    }
                }
            }
        }
        info!("Timer thread stopped");
    }

    fn fire(&self, timer: Timer) {
        let state = self.state.load_full();
        match timer {
            Timer::HealthCheck { hostname, address, check } => {
                let list = &state.check_list;
                match list.check_needed(&hostname, address, &check) {
                    Schedule::Work => {
                        list.queue_check(&hostname, address, &check, &self.queue);
                    }
                    Schedule::Event => {
                        let at = list.next_check_time(&hostname, address, &check);
                        self.push(at, Timer::HealthCheck { hostname, address, check });
                    }
                    Schedule::None => {
                        trace!(host = %hostname, %address, "Dropping health check timer");
                    }
                }
            }
            Timer::Dns { hostname, lookup } => {
                let cache = &state.dns_cache;
                match cache.query_needed(&hostname, lookup) {
                    Schedule::Work => {
                        cache.queue_dns_query(&hostname, lookup, &self.queue);
                    }
                    Schedule::Event => {
                        let at = cache.next_query_time(&hostname, lookup);
                        self.push(at, Timer::Dns { hostname, lookup });
                    }
                    Schedule::None => {
                        trace!(host = %hostname, ipv6 = lookup.ipv6, "Dropping DNS timer");
                    }
                }
            }
        }
    }
}

/// Min-heap of timers served by a single thread.
pub struct EventLoop {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Create a stopped loop evaluating timers against `state`.
    pub fn new(state: Arc<ArcSwap<State>>, queue: Arc<WorkQueue>) -> Self {
        Self {
            shared: Arc::new(Shared {
                timers: Mutex::new(BinaryHeap::new()),
                wake: Condvar::new(),
                seq: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                state,
                queue,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the timer thread. Calling it twice is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        self.shared.shutdown.store(false, AtomicOrdering::Release);
        let shared = self.shared.clone();
        *handle = Some(
            thread::Builder::new()
                .name("healthmon-timer".to_string())
                .spawn(move || shared.run())?,
        );
        Ok(())
    }

    /// Force the timer thread to re-examine the heap.
    pub fn wakeup(&self) {
        let _timers = self.shared.timers.lock();
        self.shared.wake.notify_all();
    }

    pub fn queue_size(&self) -> usize {
        self.shared.timers.lock().len()
    }

    /// Drop every armed timer.
    pub fn clear(&self) {
        self.shared.timers.lock().clear();
        debug!("Cleared armed timers");
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, AtomicOrdering::Release);
        self.wakeup();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Scheduler for EventLoop {
    fn add_health_check_timeout(&self, hostname: &str, address: IpAddress, check: &HostCheck, at: TimeStamp) {
        self.shared.push(
            at,
            Timer::HealthCheck {
                hostname: hostname.to_string(),
                address,
                check: check.clone(),
            },
        );
    }

    fn add_dns_timeout(&self, hostname: &str, lookup: DnsLookup, at: TimeStamp) {
        self.shared.push(
            at,
            Timer::Dns {
                hostname: hostname.to_string(),
                lookup,
            },
        );
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
