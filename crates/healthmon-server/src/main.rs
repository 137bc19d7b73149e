//! healthmon - the health monitoring daemon.
//!
//! # Usage
//!
//! ```text
//! healthmon --config /etc/healthmon/healthmon.yaml
//! healthmon --config ./healthmon.yaml --check
//! ```

use anyhow::Context;
use clap::Parser;
use healthmon_server::{Config, HealthmonServer, YamlConfigLoader};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "healthmon", about = "Health monitoring daemon", version)]
struct Cli {
    /// Master configuration file. Searched in the standard locations when unset.
    #[arg(long, short, env = "HEALTHMON_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Load and validate every config file, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.or_else(Config::find_config_file);
    let config = match &path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .or(config.logging.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let log_handle = common::logging::init_with(&level, config.logging.format);

    match &path {
        Some(path) => tracing::info!(path = %path.display(), "Using configuration file"),
        None => tracing::warn!("No configuration file found, using defaults"),
    }

    let loader = Arc::new(YamlConfigLoader::new(path));

    if cli.check {
        let (_, daemon) = loader.load_config().context("configuration check failed")?;
        let hosts: usize = daemon.host_groups.values().map(|g| g.hosts.len()).sum();
        println!(
            "configuration ok: {} host groups, {} hosts, hash {}",
            daemon.host_groups.len(),
            hosts,
            daemon.hash
        );
        return Ok(());
    }

    let server = HealthmonServer::new(loader, config.to_server_config(), Some(log_handle));
    server.run().await
}
