//! Elastic pool of worker threads with a monitor that sizes it to the
//! backlog.

use crate::settings::ThreadSettings;
use crate::worker::{WorkerContext, WorkerStatus, run_worker};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive idle ticks needed before the pool shrinks.
const SHRINK_CONFIDENCE: u32 = 3;

/// How often long-lived workers are considered for replacement.
const RECYCLE_PERIOD: Duration = Duration::from_secs(3600);

/// Pool size after one monitor tick.
///
/// Any backlog grows the pool by enough workers to absorb it. A pool with
/// more idle workers than one stride for [`SHRINK_CONFIDENCE`] ticks in a
/// row shrinks by one stride.
pub fn plan_resize(
    settings: &ThreadSettings,
    threads: usize,
    idle: usize,
    pending: usize,
    confidence: &mut u32,
) -> usize {
    let stride = (settings.stride_percent as usize * threads / 100).max(1);
    if pending > 0 {
        *confidence = 0;
        let extra = pending.div_ceil(settings.work_per_thread.max(1));
        (threads + extra).min(settings.max)
    } else if idle > stride {
        *confidence += 1;
        if *confidence >= SHRINK_CONFIDENCE {
            *confidence = 0;
            threads.saturating_sub(stride).max(settings.min)
        } else {
            threads
        }
    } else {
        *confidence = 0;
        threads
    }
}

struct Worker {
    status: Arc<WorkerStatus>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn retire(self) {
        if self.handle.join().is_err() {
            warn!("Worker thread panicked");
        }
    }
}

struct Inner {
    ctx: WorkerContext,
    settings: ThreadSettings,
    workers: Mutex<Vec<Worker>>,
    next_id: AtomicUsize,
    stopped: Mutex<bool>,
    stop: Condvar,
}

impl Inner {
    fn spawn(&self) -> io::Result<Worker> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(WorkerStatus::default());
        let ctx = self.ctx.clone();
        let thread_status = status.clone();
        let handle = thread::Builder::new()
            .name(format!("healthmon-worker-{}", id))
            .spawn(move || run_worker(&ctx, &thread_status))?;
        Ok(Worker { status, handle })
    }

    fn resize(&self, target: usize) -> io::Result<()> {
        let target = target.clamp(self.settings.min, self.settings.max);
        let retired = {
            let mut workers = self.workers.lock();
            let current = workers.len();
            if target > current {
                for _ in current..target {
                    workers.push(self.spawn()?);
                }
                info!(from = current, to = target, "Grew worker pool");
                return Ok(());
            }
            let retired: Vec<Worker> = workers.drain(target..).collect();
            if !retired.is_empty() {
                info!(from = current, to = target, "Shrinking worker pool");
            }
            retired
        };
        self.retire(retired);
        Ok(())
    }

    fn retire(&self, workers: Vec<Worker>) {
        if workers.is_empty() {
            return;
        }
        for worker in &workers {
            worker.status.shutdown.store(true, Ordering::Release);
        }
        self.ctx.queue.cycle_threads();
        for worker in workers {
            worker.retire();
        }
    }

    fn recycle(&self) -> io::Result<usize> {
        let retired = {
            let mut workers = self.workers.lock();
            let mut retired = Vec::new();
            for slot in workers.iter_mut() {
                if slot.status.processed() > self.settings.recycle_after {
                    let fresh = self.spawn()?;
                    retired.push(std::mem::replace(slot, fresh));
                }
            }
            retired
        };
        let count = retired.len();
        if count > 0 {
            info!(count, "Recycling worker threads");
        }
        self.retire(retired);
        Ok(count)
    }

    fn tick(&self, confidence: &mut u32) {
        let queue = &self.ctx.queue;
        let (threads, idle) = {
            let workers = self.workers.lock();
            (workers.len(), workers.iter().filter(|w| w.status.is_idle()).count())
        };
        let pending = queue.num_off_schedule() as usize + queue.queue_size();
        if pending > 0 {
            queue.reset_off_schedule();
        }
        let target = plan_resize(&self.settings, threads, idle, pending, confidence);
        debug!(threads, idle, pending, target, "Worker pool tick");
        if target != threads
            && let Err(e) = self.resize(target)
        {
            warn!(error = %e, "Failed to resize worker pool");
        }
    }

    fn monitor(&self) {
        let interval = self.settings.monitor_interval;
        let mut confidence = 0;
        let mut since_recycle = Duration::ZERO;
        loop {
            {
                let mut stopped = self.stopped.lock();
                if !*stopped {
                    self.stop.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }
            self.tick(&mut confidence);
            since_recycle += interval;
            if self.settings.recycle && since_recycle >= RECYCLE_PERIOD {
                since_recycle = Duration::ZERO;
                if let Err(e) = self.recycle() {
                    warn!(error = %e, "Failed to recycle workers");
                }
            }
        }
        debug!("Pool monitor stopped");
    }
}

pub struct ThreadPool {
    inner: Arc<Inner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `settings.max` workers and the monitor thread.
    pub fn start(ctx: WorkerContext, mut settings: ThreadSettings) -> io::Result<Self> {
        settings.min = settings.min.max(1);
        settings.max = settings.max.max(settings.min);
        let inner = Arc::new(Inner {
            ctx,
            workers: Mutex::new(Vec::with_capacity(settings.max)),
            next_id: AtomicUsize::new(0),
            stopped: Mutex::new(false),
            stop: Condvar::new(),
            settings,
        });
        inner.resize(inner.settings.max)?;

        let monitor_inner = inner.clone();
        let monitor = thread::Builder::new()
            .name("healthmon-pool-monitor".to_string())
            .spawn(move || monitor_inner.monitor())?;
        info!(
            threads = inner.settings.max,
            min = inner.settings.min,
            "Started worker pool"
        );
        Ok(Self {
            inner,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    pub fn count_idle(&self) -> usize {
        self.inner.workers.lock().iter().filter(|w| w.status.is_idle()).count()
    }

    /// Items processed by the current workers.
    pub fn processed(&self) -> u64 {
        self.inner.workers.lock().iter().map(|w| w.status.processed()).sum()
    }

    /// Grow or shrink to `target`, clamped to the configured bounds.
    pub fn resize(&self, target: usize) -> io::Result<()> {
        self.inner.resize(target)
    }

    /// Replace workers that processed more than the recycle threshold.
    pub fn recycle(&self) -> io::Result<usize> {
        self.inner.recycle()
    }

    /// Stop the monitor, release every worker and join them.
    pub fn shutdown(&self) {
        *self.inner.stopped.lock() = true;
        self.inner.stop.notify_all();
        if let Some(handle) = self.monitor.lock().take()
            && handle.join().is_err()
        {
            warn!("Pool monitor panicked");
        }
        let workers: Vec<Worker> = self.inner.workers.lock().drain(..).collect();
        for worker in &workers {
            worker.status.shutdown.store(true, Ordering::Release);
        }
        self.inner.ctx.queue.shutdown();
        for worker in workers {
            worker.retire();
        }
        info!("Worker pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
