//! Main healthmon server implementation.

use crate::config::YamlConfigLoader;
use crate::http_server::HttpServer;
use crate::metrics::MetricsRegistry;
use crate::notifier::Notifier;
use crate::types::{ChannelPublisher, Notification, ServerConfig};
use anyhow::Context;
use common::LogHandle;
use healthmon::{Services, StateManager};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

/// Healthmon server
pub struct HealthmonServer {
    loader: Arc<YamlConfigLoader>,
    config: ServerConfig,
    log_handle: Option<LogHandle>,
}

impl HealthmonServer {
    /// Create a new server. `log_handle` lets a reload change the log level.
    pub fn new(loader: Arc<YamlConfigLoader>, config: ServerConfig, log_handle: Option<LogHandle>) -> Self {
        Self {
            loader,
            config,
            log_handle,
        }
    }

    /// Run the server until SIGINT or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting healthmon server");

        let registry = Arc::new(MetricsRegistry::new(
            &self.config.metrics_batch_delay_buckets,
            &self.config.metrics_batch_size_buckets,
        ));

        let (notify_tx, notify_rx) = mpsc::channel::<Notification>(self.config.channel_size);
        let services = Services {
            publisher: Some(Arc::new(ChannelPublisher::new(notify_tx, Some(registry.clone())))),
            ..Services::default()
        };

        // Loading resolves static tables and opens storage, keep it off the runtime
        let loader = self.loader.clone();
        let manager = task::spawn_blocking(move || -> common::Result<StateManager> {
            let manager = StateManager::load_daemon_state(loader, services)?;
            manager.start()?;
            Ok(manager)
        })
        .await
        .context("state loader task panicked")?
        .context("failed to load initial daemon state")?;
        let manager = Arc::new(manager);
        registry.update_engine(&manager.stats());

        let notifier = Notifier::new(
            notify_rx,
            self.config.batch_delay,
            self.config.batch_size,
            Some(registry.clone()),
        );
        let notifier_handle = tokio::spawn(async move {
            notifier.run().await;
        });

        let http_handle = if self.config.http_enabled {
            let server = HttpServer::new(registry.clone(), manager.clone(), self.config.http_listen.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    warn!(error = %e, "HTTP server error");
                }
            }))
        } else {
            info!("HTTP server disabled");
            None
        };

        let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

        let mut commit_timer = interval(self.config.commit_interval);
        commit_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        commit_timer.tick().await; // Skip first immediate tick

        info!("All tasks spawned, server running");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.reload(&manager, &registry).await;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = commit_timer.tick() => {
                    let m = manager.clone();
                    match task::spawn_blocking(move || m.commit()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(error = %e, "Failed to commit results");
                            registry.record_error("commit");
                        }
                        Err(e) => error!(error = %e, "Commit task panicked"),
                    }
                    registry.update_engine(&manager.stats());
                }
            }
        }

        info!("Shutting down");
        if let Some(handle) = http_handle {
            handle.abort();
        }

        let m = manager.clone();
        task::spawn_blocking(move || m.shutdown())
            .await
            .context("shutdown task panicked")?
            .context("failed to shut down scheduling")?;

        // Workers are gone, so the last publisher reference goes with the state
        drop(manager);
        if tokio::time::timeout(self.config.batch_delay * 10, notifier_handle)
            .await
            .is_err()
        {
            warn!("Notifier did not drain before shutdown");
        }

        info!("Healthmon server stopped");
        Ok(())
    }

    /// Reload every config file and splice the new generation in
    async fn reload(&self, manager: &Arc<StateManager>, registry: &Arc<MetricsRegistry>) {
        let m = manager.clone();
        let result = task::spawn_blocking(move || m.reload_daemon_configs()).await;
        let success = match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Reload failed, keeping running configuration");
                false
            }
            Err(e) => {
                error!(error = %e, "Reload task panicked");
                false
            }
        };
        registry.record_reload(success);
        registry.update_engine(&manager.stats());
        if !success {
            return;
        }

        let master = self.loader.master();
        if let (Some(handle), Some(level)) = (&self.log_handle, master.logging.level.as_deref())
            && let Err(e) = handle.set_level(level)
        {
            warn!(level, error = %e, "Failed to apply log level");
        }
        info!(version = manager.config_info().version, "Configuration reloaded");
    }
}
