//! Component orchestration: assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `logbridge-daemon`.
//! It loads configuration, wires the broadcast hub, alert engine, stream
//! manager and HTTP server together, manages startup/shutdown ordering,
//! and runs the main event loop.
//!
//! # Startup Order (consumers before producers)
//!
//! 1. Broadcast Hub (bus relay and heartbeat ready before frames flow)
//! 2. Stream Manager (polling tasks start producing batches)
//! 3. HTTP server (subscribers can join once the hub is live)
//!
//! # Shutdown Order (reverse of startup)
//!
//! 1. HTTP server (stop accepting subscribers)
//! 2. Stream Manager (cancel pollers within the grace period)
//! 3. Broadcast Hub (drain relay and heartbeat tasks)

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use logbridge_broadcast::{BroadcastHub, InMemoryBus};
use logbridge_core::config::LogbridgeConfig;
use logbridge_core::error::LogbridgeError;
use logbridge_core::metrics as metric_names;
use logbridge_core::pipeline::{DynPipeline, HealthStatus, Pipeline};
use logbridge_core::storage::{
    LoggingDispatcher, MemoryAlertStore, MemoryCheckpointStore, MemoryLogStore, MemoryRuleStore,
};
use logbridge_manager::{HttpAdapterProvider, ManagerDeps, PlaintextResolver, StreamManager};
use logbridge_pipeline::alert::AlertEngine;
use logbridge_source::ReqwestTransport;

use crate::metrics_server;
use crate::server::{AppState, StaticTokenAuthorizer, WsServer};

/// Supervised components, in start order. Shared with the health endpoint.
pub type SharedPipelines = Arc<Mutex<Vec<Box<dyn DynPipeline>>>>;

/// Adapts the shared stream manager to the component lifecycle.
///
/// The HTTP layer needs `&self` access to manager operations while the
/// orchestrator needs `&mut` for start/stop, so the manager lives behind
/// an async mutex shared by both.
struct SharedManager(Arc<Mutex<StreamManager>>);

impl Pipeline for SharedManager {
    fn name(&self) -> &str {
        "stream-manager"
    }

    async fn start(&mut self) -> Result<(), LogbridgeError> {
        // Both `Pipeline` and the blanket `DynPipeline` impl are in scope
        // here, so the calls must be qualified
        Pipeline::start(&mut *self.0.lock().await).await
    }

    async fn stop(&mut self) -> Result<(), LogbridgeError> {
        Pipeline::stop(&mut *self.0.lock().await).await
    }

    async fn health_check(&self) -> HealthStatus {
        Pipeline::health_check(&*self.0.lock().await).await
    }
}

/// Aggregated daemon health, reported per component.
#[derive(Debug)]
pub struct DaemonHealth {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub components: Vec<ComponentReport>,
}

/// Health of a single supervised component.
#[derive(Debug)]
pub struct ComponentReport {
    pub name: String,
    pub status: HealthStatus,
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: LogbridgeConfig,
    pipelines: SharedPipelines,
    start_time: Instant,
}

// The supervised components are trait objects, so Debug is hand-written
impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load configuration from disk and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogbridgeConfig::load(config_path)
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// All storage backends are the in-memory implementations; external
    /// database wiring replaces them without touching the components.
    pub async fn build_from_config(config: LogbridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before components record anything
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        tracing::debug!("wiring components");

        let log_store = Arc::new(MemoryLogStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let rule_store = Arc::new(MemoryRuleStore::new());
        let alert_store = Arc::new(MemoryAlertStore::new());

        let bus = Arc::new(InMemoryBus::new(config.broadcast.bus_capacity));
        let hub = BroadcastHub::new(config.broadcast.clone(), bus);
        let hub_handle = hub.handle();

        let alert_engine = Arc::new(AlertEngine::new(
            rule_store,
            alert_store,
            log_store.clone(),
            Arc::new(LoggingDispatcher),
            config.alert.clone(),
        ));

        let transport = Arc::new(
            ReqwestTransport::new(config.manager.call_timeout())
                .map_err(|e| anyhow::anyhow!("failed to build http transport: {}", e))?,
        );
        let manager = Arc::new(Mutex::new(StreamManager::new(
            config.manager.clone(),
            config.processor.clone(),
            ManagerDeps {
                adapters: Arc::new(HttpAdapterProvider::new(transport)),
                resolver: Arc::new(PlaintextResolver),
                checkpoints,
                log_store: log_store.clone(),
                alert_engine,
                hub: hub_handle.clone(),
            },
        )));

        let pipelines: SharedPipelines = Arc::new(Mutex::new(Vec::new()));
        let state = AppState {
            hub: hub_handle,
            log_store,
            manager: manager.clone(),
            pipelines: pipelines.clone(),
            authorizer: Arc::new(StaticTokenAuthorizer::from_config(&config.server)),
            backfill_limit: config.broadcast.backfill_limit,
            heartbeat: std::time::Duration::from_secs(config.broadcast.heartbeat_secs.max(1)),
        };
        let server = WsServer::new(config.server.bind_addr.clone(), state);

        {
            let mut components = pipelines.lock().await;
            components.push(Box::new(hub) as Box<dyn DynPipeline>);
            components.push(Box::new(SharedManager(manager)));
            components.push(Box::new(server));
            tracing::info!(total_components = components.len(), "orchestrator initialized");
        }

        Ok(Self {
            config,
            pipelines,
            start_time: Instant::now(),
        })
    }

    /// Start all components and block until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        // Write PID file if configured
        if !self.config.general.pid_file.is_empty() {
            let path = Path::new(&self.config.general.pid_file);
            write_pid_file(path)?;
        }

        if let Err(e) = self.start_all().await {
            if !self.config.general.pid_file.is_empty() {
                remove_pid_file(Path::new(&self.config.general.pid_file));
            }
            return Err(e);
        }

        // Keep the uptime gauge fresh for Prometheus scrapes
        let uptime_cancel = CancellationToken::new();
        let uptime_task = if self.config.metrics.enabled {
            Some(spawn_uptime_updater(self.start_time, uptime_cancel.clone()))
        } else {
            None
        };

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal, "shutdown signal received");

        uptime_cancel.cancel();
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let result = self.stop_all().await;

        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }
        result
    }

    /// Start components in registration order. A failure rolls back the
    /// already-started components in reverse order.
    async fn start_all(&self) -> Result<()> {
        let mut components = self.pipelines.lock().await;
        for index in 0..components.len() {
            let name = components[index].name().to_string();
            tracing::info!(component = %name, "starting component");
            if let Err(e) = components[index].start().await {
                tracing::error!(component = %name, error = %e, "component failed to start");
                for started in (0..index).rev() {
                    let rollback_name = components[started].name().to_string();
                    if let Err(stop_err) = components[started].stop().await {
                        tracing::error!(
                            component = %rollback_name,
                            error = %stop_err,
                            "rollback stop failed"
                        );
                    }
                }
                return Err(anyhow::anyhow!("failed to start {}: {}", name, e));
            }
        }
        Ok(())
    }

    /// Stop components in reverse order, collecting every failure.
    async fn stop_all(&self) -> Result<()> {
        let mut components = self.pipelines.lock().await;
        let mut first_error = None;
        for component in components.iter_mut().rev() {
            let name = component.name().to_string();
            tracing::info!(component = %name, "stopping component");
            if let Err(e) = component.stop().await {
                tracing::error!(component = %name, error = %e, "component stop failed");
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("failed to stop {}: {}", name, e));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Aggregate health across all supervised components.
    ///
    /// The overall status is the worst component status: any unhealthy
    /// component marks the daemon unhealthy, any degraded one marks it
    /// degraded.
    pub async fn health(&self) -> DaemonHealth {
        let components = self.pipelines.lock().await;
        let mut reports = Vec::with_capacity(components.len());
        let mut degraded = 0usize;
        let mut unhealthy = 0usize;
        for component in components.iter() {
            let status = component.health_check().await;
            match status {
                HealthStatus::Degraded(_) => degraded += 1,
                HealthStatus::Unhealthy(_) => unhealthy += 1,
                HealthStatus::Healthy => {}
            }
            reports.push(ComponentReport {
                name: component.name().to_string(),
                status,
            });
        }

        let status = if unhealthy > 0 {
            HealthStatus::Unhealthy(format!("{} components unhealthy", unhealthy))
        } else if degraded > 0 {
            HealthStatus::Degraded(format!("{} components degraded", degraded))
        } else {
            HealthStatus::Healthy
        };

        DaemonHealth {
            status,
            uptime_secs: self.start_time.elapsed().as_secs(),
            components: reports,
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogbridgeConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances. The file is created
/// atomically (`create_new`) and verified to be a regular file, with
/// 0o600 permissions.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    metrics::gauge!(metric_names::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
