//! Ready queue shared by the scheduler and the worker pool.

use crate::timestamp::TimeStamp;
use crate::work::{Work, WorkId};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Default share of a work window, in percent, after which an item counts
/// as off schedule.
pub const DEFAULT_LATE_THRESHOLD_PERCENT: u64 = 10;

const LATENCY_SAMPLE: u64 = 1000;

#[derive(Default)]
struct Inner {
    queue: VecDeque<Work>,
    sampled: u64,
    sampled_latency: u64,
}

/// FIFO of ready work plus a map of parked items.
///
/// Producers are timer callbacks, the reload path and force-check callers.
/// Consumers are worker threads blocked in [`WorkQueue::get_work`].
pub struct WorkQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
    parked: Mutex<HashMap<WorkId, Work>>,
    shutdown: AtomicBool,
    off_schedule: AtomicU64,
    late_threshold: AtomicU64,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_LATE_THRESHOLD_PERCENT)
    }
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new(late_threshold_percent: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready: Condvar::new(),
            parked: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            off_schedule: AtomicU64::new(0),
            late_threshold: AtomicU64::new(late_threshold_percent.min(100)),
        }
    }

    /// Push a ready item and wake one worker.
    pub fn insert_work(&self, work: Work) {
        debug!(
            kind = work.type_name(),
            host = %work.hostname,
            address = %work.address,
            "Pushing work to queue"
        );
        self.inner.lock().queue.push_back(work);
        self.ready.notify_one();
    }

    /// Park an item that is still in progress so it can be resumed later.
    pub fn insert_map(&self, work: Work) -> WorkId {
        let id = work.id;
        self.parked.lock().insert(id, work);
        id
    }

    /// Move a parked item back onto the ready queue.
    pub fn add_work(&self, id: WorkId) -> bool {
        let work = self.parked.lock().remove(&id);
        match work {
            Some(work) => {
                self.insert_work(work);
                true
            }
            None => {
                debug!(%id, "No parked work with this id");
                false
            }
        }
    }

    /// Block until work is available.
    ///
    /// Returns `None` once the queue or the calling thread is shut down.
    pub fn get_work(&self, thread_shutdown: &AtomicBool) -> Option<Work> {
        let mut inner = self.inner.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) || thread_shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(work) = inner.queue.pop_front() {
                let now = TimeStamp::now();
                self.record_dequeue(&mut inner, &work, now);
                trace!(remaining = inner.queue.len(), "Work queue length");
                return Some(work);
            }
            self.ready.wait(&mut inner);
        }
    }

    fn record_dequeue(&self, inner: &mut Inner, work: &Work, now: TimeStamp) {
        let waited = now - work.start;
        inner.sampled += 1;
        inner.sampled_latency += waited;
        if inner.sampled == LATENCY_SAMPLE {
            info!(
                average_ms = inner.sampled_latency / LATENCY_SAMPLE,
                "Average queue time over the last {} items", LATENCY_SAMPLE
            );
            inner.sampled = 0;
            inner.sampled_latency = 0;
        }

        if now > work.late_after(self.late_threshold.load(Ordering::Relaxed)) {
            self.off_schedule.fetch_add(1, Ordering::Relaxed);
        }
        if now > work.end {
            warn!(
                kind = work.type_name(),
                host = %work.hostname,
                address = %work.address,
                waited_ms = waited,
                ttl_ms = work.end - work.start,
                "Work dequeued after its deadline"
            );
        }
    }

    /// Wake every blocked worker.
    pub fn cycle_threads(&self) {
        let _guard = self.inner.lock();
        self.ready.notify_all();
    }

    pub fn queue_size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn parked_size(&self) -> usize {
        self.parked.lock().len()
    }

    pub fn num_off_schedule(&self) -> u64 {
        self.off_schedule.load(Ordering::Relaxed)
    }

    pub fn reset_off_schedule(&self) {
        self.off_schedule.store(0, Ordering::Relaxed);
    }

    pub fn late_threshold(&self) -> u64 {
        self.late_threshold.load(Ordering::Relaxed)
    }

    pub fn set_late_threshold(&self, percent: u64) {
        self.late_threshold.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop handing out work and release every waiting worker.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.lock();
        self.ready.notify_all();
    }
}
