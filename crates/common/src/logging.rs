//! Logging utilities for healthmon components.
//!
//! The level filter sits behind a reload layer so a configuration reload can
//! change verbosity without replacing the subscriber.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Handle used to change the active level filter after initialization.
#[derive(Clone)]
pub struct LogHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replace the active filter with `level` (any `EnvFilter` directive).
    pub fn set_level(&self, level: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_new(level).map_err(crate::Error::config)?;
        self.inner.reload(filter).map_err(crate::Error::other)
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels.
/// Default level is INFO.
pub fn init() -> LogHandle {
    init_with("info", LogFormat::Text)
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json() -> LogHandle {
    init_with("info", LogFormat::Json)
}

/// Initialize tracing with an explicit level and format.
///
/// RUST_LOG still takes precedence over `level` when set.
pub fn init_with(level: &str, format: LogFormat) -> LogHandle {
    let (filter, handle) = reload::Layer::new(build_filter(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    LogHandle { inner: handle }
}
