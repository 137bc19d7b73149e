//! Healthmon server - daemon wrapper around the scheduling core
//!
//! Loads the YAML configuration, runs the `healthmon` state manager and
//! exposes what it observes.
//!
//! # Components
//!
//! - **Config**: master YAML file plus host-group files
//! - **Notifier**: Batches published check results
//! - **HttpServer**: Prometheus `/metrics` and a JSON `/status` snapshot
//! - **HealthmonServer**: Ties the above together and handles signals
//!
//! SIGHUP reloads every config file, SIGINT and SIGTERM shut down.

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod notifier;
pub mod server;
pub mod types;

pub use config::{Config, ConfigError, YamlConfigLoader};
pub use http_server::HttpServer;
pub use metrics::MetricsRegistry;
pub use server::HealthmonServer;
pub use types::ServerConfig;
