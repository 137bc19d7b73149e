//! Owns the current generation and swaps in new ones on reload.

use crate::event_loop::{EventLoop, Scheduler};
use crate::settings::{ConfigInfo, ConfigLoader};
use crate::state::{Services, State};
use crate::thread_pool::ThreadPool;
use crate::work_queue::WorkQueue;
use crate::worker::WorkerContext;
use arc_swap::ArcSwap;
use common::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Counters exposed to the server's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub version: u64,
    pub queue_depth: usize,
    pub timers: usize,
    pub threads: usize,
    pub idle_threads: usize,
    pub reloads: u64,
    pub reload_failures: u64,
}

pub struct StateManager {
    loader: Arc<dyn ConfigLoader>,
    services: Services,
    state: Arc<ArcSwap<State>>,
    queue: Arc<WorkQueue>,
    event_loop: Arc<EventLoop>,
    pool: Mutex<Option<ThreadPool>>,
    reloading: Mutex<()>,
    version: AtomicU64,
    reloads: AtomicU64,
    reload_failures: AtomicU64,
}

impl StateManager {
    /// Load the first generation and restore stored results into it.
    ///
    /// Nothing is scheduled until [`StateManager::start`].
    pub fn load_daemon_state(loader: Arc<dyn ConfigLoader>, mut services: Services) -> Result<Self> {
        let config = loader.load()?;
        services.static_table.get_or_insert_with(Default::default);

        let mut state = State::build(&config, services.clone())?;
        state.config_info.version = 1;
        state.init_results_from_backend();
        state.seal();
        persist_config(&state);
        info!(
            hash = %state.config_info.hash,
            groups = state.host_groups.len(),
            "Loaded daemon state"
        );

        let queue = Arc::new(WorkQueue::new(state.settings.checks.late_threshold_percent));
        let state = Arc::new(ArcSwap::from_pointee(state));
        let event_loop = Arc::new(EventLoop::new(state.clone(), queue.clone()));
        Ok(Self {
            loader,
            services,
            state,
            queue,
            event_loop,
            pool: Mutex::new(None),
            reloading: Mutex::new(()),
            version: AtomicU64::new(1),
            reloads: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
        })
    }

    /// Start the timer thread and the worker pool, then queue every due
    /// lookup and check.
    pub fn start(&self) -> Result<()> {
        self.event_loop.start()?;
        let state = self.state.load_full();
        let mut pool = self.pool.lock();
        if pool.is_none() {
            let ctx = WorkerContext {
                state: self.state.clone(),
                queue: self.queue.clone(),
                scheduler: self.event_loop.clone(),
            };
            *pool = Some(ThreadPool::start(ctx, state.settings.threads.clone())?);
        }
        state.schedule_all(&self.queue, self.event_loop.as_ref());
        info!("Scheduling started");
        Ok(())
    }

    /// Build a new generation from a fresh load and splice it in.
    ///
    /// A failure leaves the running generation untouched.
    pub fn reload_daemon_configs(&self) -> Result<()> {
        let _reloading = self.reloading.lock();
        match self.reload() {
            Ok(version) => {
                self.reloads.fetch_add(1, Ordering::Relaxed);
                info!(version, "Reloaded daemon configs");
                Ok(())
            }
            Err(e) => {
                self.reload_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Reload failed, keeping the running configuration");
                Err(e)
            }
        }
    }

    fn reload(&self) -> Result<u64> {
        let config = self.loader.load()?;
        let mut services = self.services.clone();
        let reuse_backend = {
            let current = self.state.load();
            if config.settings.storage == current.settings.storage {
                services.backend = Some(current.backend.clone());
                true
            } else {
                false
            }
        };

        let mut new = State::build(&config, services)?;
        let version = self.version.load(Ordering::Relaxed) + 1;
        new.config_info.version = version;
        if !reuse_backend {
            new.init_results_from_backend();
        }
        {
            let current = self.state.load_full();
            new.restore_running_check_state(&current);
        }
        new.seal();

        let new = Arc::new(new);
        let old = self.state.swap(new.clone());
        self.version.store(version, Ordering::Relaxed);
        debug!(version, "Swapped in new generation");

        new.reschedule_dns_checks(&old, &self.queue);
        new.reschedule_health_checks(&old, &self.queue);
        new.dns_cache
            .queue_dns_lookups(&self.queue, self.event_loop.as_ref(), false);
        if let Err(e) = new.update_backend(&old) {
            warn!(error = %e, "Failed to update backend host groups");
        }
        self.queue
            .set_late_threshold(new.settings.checks.late_threshold_percent);
        self.event_loop.wakeup();
        self.queue.cycle_threads();

        wait_for_release(&old, new.settings.checks.drain_timeout);
        new.restore_running_check_state(&old);
        persist_config(&new);

        if !Arc::ptr_eq(&old.backend, &new.backend)
            && let Err(e) = old.backend.close()
        {
            warn!(error = %e, "Failed to close previous backend");
        }
        if old.settings.threads != new.settings.threads {
            info!("Thread pool settings changed, they apply on restart");
        }
        Ok(version)
    }

    /// Stop the threads and flush the backend.
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down scheduling");
        self.event_loop.shutdown();
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
        let state = self.state.load_full();
        state.backend.commit()?;
        state.backend.close()
    }

    /// Flush pending backend writes.
    pub fn commit(&self) -> Result<()> {
        self.state.load().backend.commit()
    }

    /// The generation serving right now.
    pub fn current(&self) -> Arc<State> {
        self.state.load_full()
    }

    pub fn config_info(&self) -> ConfigInfo {
        self.state.load().config_info.clone()
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.event_loop.clone()
    }

    pub fn force_health_check(&self, group: &str, host: Option<&str>) -> Result<usize> {
        self.current().force_health_check(group, host, &self.queue)
    }

    pub fn force_dns_check(&self, group: &str, host: Option<&str>) -> Result<usize> {
        self.current().force_dns_check(group, host, &self.queue)
    }

    pub fn stats(&self) -> EngineStats {
        let (threads, idle_threads) = match self.pool.lock().as_ref() {
            Some(pool) => (pool.thread_count(), pool.count_idle()),
            None => (0, 0),
        };
        EngineStats {
            version: self.version.load(Ordering::Relaxed),
            queue_depth: self.queue.queue_size(),
            timers: self.event_loop.queue_size(),
            threads,
            idle_threads,
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
        }
    }
}

fn persist_config(state: &State) {
    if let Err(e) = state.store_config_info() {
        warn!(error = %e, "Failed to store config info");
    }
    if let Err(e) = state.store_configs() {
        warn!(error = %e, "Failed to store host group configs");
    }
}

/// Poll until this thread holds the last reference to `old`. Gives up after
/// `timeout`.
fn wait_for_release(old: &Arc<State>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Arc::strong_count(old) > 1 {
        if Instant::now() >= deadline {
            warn!(
                references = Arc::strong_count(old),
                timeout_ms = timeout.as_millis() as u64,
                "Previous generation still referenced, continuing reload"
            );
            return false;
        }
        thread::sleep(DRAIN_POLL);
    }
    true
}
