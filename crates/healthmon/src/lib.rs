//! Scheduling and state-reconciliation core of the healthmon daemon.
//!
//! The engine probes a large population of hosts over several protocols and
//! keeps an up/down/flapping status per (host, address, check). It decides
//! when each check is due, tracks retry, flap and smoothing statistics per
//! target, ties DNS resolution to the checks that depend on it, and splices
//! new configurations into a running system on reload.
//!
//! # Components
//!
//! - **CheckList**: registry of (hostname, [`HostCheck`]) entries and their
//!   [`CheckParams`] statistics
//! - **DnsCache**: resolved addresses and re-resolution schedule
//! - **WorkQueue**: FIFO of due work shared by the worker pool
//! - **EventLoop**: timer thread that promotes entries when they fall due
//! - **State**: one configuration generation, plus reload reconciliation
//! - **StateManager**: atomic swap between generations
//!
//! # Example
//!
//! ```no_run
//! use healthmon::{DaemonConfig, HostGroup, Services, StateManager};
//! use healthmon::settings::ConfigLoader;
//! use healthmon::types::CheckType;
//! use std::sync::Arc;
//!
//! struct Fixed(DaemonConfig);
//!
//! impl ConfigLoader for Fixed {
//!     fn load(&self) -> common::Result<DaemonConfig> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! # fn example() -> common::Result<()> {
//! let mut config = DaemonConfig::default();
//! let group = HostGroup::new("web")
//!     .with_check(CheckType::Http, 80, "/health")
//!     .with_hosts(["web1.example.com"]);
//! config.host_groups.insert(group.name.clone(), group);
//!
//! let manager = StateManager::load_daemon_state(Arc::new(Fixed(config)), Services::default())?;
//! manager.start()?;
//! manager.reload_daemon_configs()?;
//! manager.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod check_list;
pub mod check_params;
pub mod check_result;
pub mod dns_cache;
pub mod event_loop;
pub mod host_check;
pub mod host_group;
pub mod plugins;
pub mod publisher;
pub mod settings;
pub mod state;
pub mod state_manager;
pub mod storage;
pub mod thread_pool;
pub mod timestamp;
pub mod types;
pub mod work;
pub mod work_queue;
pub mod worker;

pub use address::IpAddress;
pub use check_list::{CheckHeader, CheckList, WaitList};
pub use check_params::{CheckParams, CheckSettings};
pub use check_result::{CheckOutcome, CheckResult};
pub use dns_cache::{DnsCache, DnsLookup, DnsResult, StaticDnsTable};
pub use event_loop::{EventLoop, Scheduler};
pub use host_check::HostCheck;
pub use host_group::HostGroup;
pub use plugins::{CheckPlugin, DnsAnswer, DnsPlugin, PluginSet};
pub use publisher::{FilteredPublisher, LogPublisher, NullPublisher, Publisher};
pub use settings::{ConfigInfo, ConfigLoader, DaemonConfig, DaemonSettings};
pub use state::{Services, State};
pub use state_manager::{EngineStats, StateManager};
pub use storage::{JsonFileStorage, MemoryStorage, StorageBackend, StoredCheck};
pub use thread_pool::ThreadPool;
pub use timestamp::TimeStamp;
pub use types::{CheckType, DnsType, DualStack, HostStatus, QueryState, Reason, Response, Schedule};
pub use work::{Work, WorkId, WorkKind};
pub use work_queue::WorkQueue;
