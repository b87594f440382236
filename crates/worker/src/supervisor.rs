//! Owns the active configuration snapshot and the running dispatch loop.
//!
//! Commands arrive through a [`SupervisorHandle`]. A reconfiguration is
//! validated first; only a valid snapshot drains the current loop and
//! replaces it. In-flight jobs always finish under the snapshot they
//! started with.

use std::sync::Arc;

use gridworker_backend::{build_backend, probe_capability, BackendError, InferenceBackend};
use gridworker_core::capability::BackendCapability;
use gridworker_core::config::{ConfigPatch, WorkerConfig};
use gridworker_core::error::ConfigError;
use gridworker_events::{StatusEvent, StatusSender};
use gridworker_grid::{GridApi, GridError, HttpGridClient};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchLoop, DispatchReport, DispatchSettings};
use crate::executor::{ExecutorConfig, JobExecutor};

/// Buffered supervisor commands.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Grid(#[from] GridError),

    /// The supervisor has stopped and accepts no more commands.
    #[error("Worker supervisor is not running")]
    Unavailable,
}

// ---------------------------------------------------------------------------
// ComponentFactory
// ---------------------------------------------------------------------------

/// Builds the outbound clients for a config snapshot.
pub trait ComponentFactory: Send + Sync {
    fn backend(&self, config: &WorkerConfig) -> Result<Arc<dyn InferenceBackend>, BackendError>;

    fn grid(&self, config: &WorkerConfig) -> Result<Arc<dyn GridApi>, GridError>;
}

/// Production clients over HTTP.
pub struct HttpComponents;

impl ComponentFactory for HttpComponents {
    fn backend(&self, config: &WorkerConfig) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        build_backend(config)
    }

    fn grid(&self, config: &WorkerConfig) -> Result<Arc<dyn GridApi>, GridError> {
        Ok(Arc::new(HttpGridClient::new(config)?))
    }
}

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Reconfigure(Arc<WorkerConfig>),
    RefreshCapability,
    Shutdown,
}

/// Cloneable control surface for a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    /// Newest accepted snapshot, possibly not applied yet. Patches build
    /// on it so queued reconfigurations compose in order.
    accepted: Arc<Mutex<Arc<WorkerConfig>>>,
    config: watch::Receiver<Arc<WorkerConfig>>,
    capability: watch::Receiver<Option<Arc<BackendCapability>>>,
    grid: watch::Receiver<Option<Arc<dyn GridApi>>>,
}

impl SupervisorHandle {
    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<WorkerConfig> {
        Arc::clone(&*self.config.borrow())
    }

    /// Capability of the running cycle, if one is running.
    pub fn capability(&self) -> Option<Arc<BackendCapability>> {
        self.capability.borrow().clone()
    }

    /// Grid client of the running cycle, if one is running.
    pub fn grid(&self) -> Option<Arc<dyn GridApi>> {
        self.grid.borrow().clone()
    }

    /// Validate `patch` against the newest accepted snapshot and queue the
    /// swap.
    ///
    /// Returns once the new snapshot is accepted; the drain and restart
    /// happen in the background. Concurrent calls are applied one after
    /// the other, each on top of the previous.
    pub async fn reconfigure(&self, patch: &ConfigPatch) -> Result<(), SupervisorError> {
        let mut accepted = self.accepted.lock().await;
        let next = Arc::new(patch.apply(&accepted)?);
        self.send(Command::Reconfigure(Arc::clone(&next))).await?;
        *accepted = next;
        Ok(())
    }

    /// Re-probe the backend and restart the loop if its capability changed.
    pub async fn refresh_capability(&self) -> Result<(), SupervisorError> {
        self.send(Command::RefreshCapability).await
    }

    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SupervisorError::Unavailable)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Cycle {
    cancel: CancellationToken,
    handle: JoinHandle<DispatchReport>,
    backend: Arc<dyn InferenceBackend>,
    capability: Arc<BackendCapability>,
}

pub struct Supervisor {
    config: Arc<WorkerConfig>,
    status: StatusSender,
    factory: Arc<dyn ComponentFactory>,
    executor_config: ExecutorConfig,
    commands: mpsc::Receiver<Command>,
    config_tx: watch::Sender<Arc<WorkerConfig>>,
    capability_tx: watch::Sender<Option<Arc<BackendCapability>>>,
    grid_tx: watch::Sender<Option<Arc<dyn GridApi>>>,
}

impl Supervisor {
    pub fn new(config: WorkerConfig, status: StatusSender) -> (Self, SupervisorHandle) {
        let config = Arc::new(config);
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (config_tx, config_rx) = watch::channel(Arc::clone(&config));
        let (capability_tx, capability_rx) = watch::channel(None);
        let (grid_tx, grid_rx) = watch::channel(None);

        let supervisor = Self {
            config: Arc::clone(&config),
            status,
            factory: Arc::new(HttpComponents),
            executor_config: ExecutorConfig::default(),
            commands,
            config_tx,
            capability_tx,
            grid_tx,
        };
        let handle = SupervisorHandle {
            commands: commands_tx,
            accepted: Arc::new(Mutex::new(Arc::clone(&config))),
            config: config_rx,
            capability: capability_rx,
            grid: grid_rx,
        };
        (supervisor, handle)
    }

    pub fn with_factory(mut self, factory: Arc<dyn ComponentFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Run until `shutdown` fires or a shutdown command arrives.
    ///
    /// Fails immediately when the initial snapshot is invalid.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        if let Err(e) = self.config.validate() {
            tracing::error!(error = %e, "Invalid worker configuration, refusing to serve work");
            self.status.send(StatusEvent::Error {
                message: format!("invalid configuration: {e}"),
            });
            return Err(e.into());
        }

        let mut cycle = self.start_cycle(&shutdown).await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        tracing::info!("Shutdown requested");
                        break;
                    }
                    Some(Command::Reconfigure(next)) => {
                        if let Err(e) = next.validate() {
                            tracing::warn!(error = %e, "Rejected invalid configuration");
                            continue;
                        }
                        tracing::info!(config = ?next, "Applying new configuration");
                        self.stop_cycle(cycle.take()).await;
                        self.config = next;
                        self.config_tx.send_replace(Arc::clone(&self.config));
                        cycle = self.start_cycle(&shutdown).await;
                    }
                    Some(Command::RefreshCapability) => {
                        cycle = self.refresh(cycle, &shutdown).await;
                    }
                },
                report = wait_cycle(&mut cycle) => {
                    tracing::warn!(?report, "Dispatch loop exited on its own");
                    cycle = None;
                }
            }
        }

        self.stop_cycle(cycle.take()).await;
        self.status.send(StatusEvent::Stopped);
        tracing::info!("Worker supervisor stopped");
        Ok(())
    }

    // ---- private helpers ----

    /// Build clients, probe the backend and spawn a dispatch loop for the
    /// current snapshot. `None` when the clients cannot be built.
    async fn start_cycle(&self, shutdown: &CancellationToken) -> Option<Cycle> {
        let built = self
            .factory
            .backend(&self.config)
            .map_err(SupervisorError::from)
            .and_then(|backend| Ok((backend, self.factory.grid(&self.config)?)));
        let (backend, grid) = match built {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build worker clients");
                self.status.send(StatusEvent::Error {
                    message: e.to_string(),
                });
                return None;
            }
        };

        let capability = Arc::new(probe_capability(backend.as_ref(), &self.config).await);
        Some(self.spawn_cycle(backend, grid, capability, shutdown))
    }

    fn spawn_cycle(
        &self,
        backend: Arc<dyn InferenceBackend>,
        grid: Arc<dyn GridApi>,
        capability: Arc<BackendCapability>,
        shutdown: &CancellationToken,
    ) -> Cycle {
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&backend),
            Arc::clone(&capability),
            self.config.model_name.clone(),
            self.executor_config.clone(),
        ));
        let dispatch = DispatchLoop::new(
            Arc::clone(&grid),
            executor,
            Arc::clone(&capability),
            self.status.clone(),
            DispatchSettings::from_config(&self.config),
        );

        self.capability_tx.send_replace(Some(Arc::clone(&capability)));
        self.grid_tx.send_replace(Some(grid));

        let cancel = shutdown.child_token();
        let handle = tokio::spawn(dispatch.run(cancel.clone()));
        Cycle {
            cancel,
            handle,
            backend,
            capability,
        }
    }

    async fn stop_cycle(&self, cycle: Option<Cycle>) {
        let Some(cycle) = cycle else {
            return;
        };
        cycle.cancel.cancel();
        match cycle.handle.await {
            Ok(report) => tracing::info!(?report, "Dispatch loop drained"),
            Err(e) => tracing::error!(error = %e, "Dispatch loop task failed"),
        }
        self.capability_tx.send_replace(None);
        self.grid_tx.send_replace(None);
    }

    /// Re-probe the running backend; drain and restart only if the
    /// capability changed.
    async fn refresh(&self, cycle: Option<Cycle>, shutdown: &CancellationToken) -> Option<Cycle> {
        let Some(current) = cycle else {
            return self.start_cycle(shutdown).await;
        };

        let probed = probe_capability(current.backend.as_ref(), &self.config).await;
        if probed == *current.capability {
            tracing::info!("Backend capability unchanged");
            return Some(current);
        }

        tracing::info!(
            old_context = current.capability.max_context_length,
            new_context = probed.max_context_length,
            "Backend capability changed, restarting dispatch loop",
        );
        let backend = Arc::clone(&current.backend);
        let grid = self.grid_tx.borrow().clone();
        self.stop_cycle(Some(current)).await;
        match grid {
            Some(grid) => Some(self.spawn_cycle(backend, grid, Arc::new(probed), shutdown)),
            None => self.start_cycle(shutdown).await,
        }
    }
}

/// Resolve when the running loop's task finishes; pending forever when
/// there is none.
async fn wait_cycle(cycle: &mut Option<Cycle>) -> Option<DispatchReport> {
    match cycle {
        Some(cycle) => (&mut cycle.handle).await.ok(),
        None => std::future::pending().await,
    }
}
