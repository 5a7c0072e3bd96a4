mod auto;
mod connections;
mod control;
mod http;
mod output;


use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::args::{ControllerMode, FleetArgs};
use crate::engine::{EngineOptions, ExecutionBudget, ExecutionEngine, StartRequest};
use crate::error::{AppError, AppResult, DistributedError};
use crate::shutdown::ShutdownSender;
use crate::workload::WorkloadParameters;

use self::connections::{ConnectionSettings, accept_workers};
use self::control::{ControlPlane, serve_control};

/// Everything the controller needs, resolved from CLI and config.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub listen: String,
    pub mode: ControllerMode,
    pub control_listen: Option<String>,
    pub hello_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub engine: EngineOptions,
    /// Present in auto mode only.
    pub auto_run: Option<AutoRunSettings>,
}

#[derive(Debug, Clone)]
pub struct AutoRunSettings {
    pub request: StartRequest,
    pub min_workers: usize,
    pub worker_wait_timeout: Duration,
    pub run_timeout: Duration,
    /// Cancels the run after this long.
    pub duration: Option<Duration>,
}

impl ControllerSettings {
    /// # Errors
    ///
    /// Returns an error when the role or mode-specific options are missing.
    pub fn from_args(args: &FleetArgs) -> AppResult<Self> {
        let listen = args
            .controller_listen
            .clone()
            .ok_or_else(|| AppError::distributed(DistributedError::MissingOption {
                option: "--controller-listen",
            }))?;
        let auto_run = match args.controller_mode {
            ControllerMode::Manual => {
                if args.control_listen.is_none() {
                    return Err(AppError::distributed(DistributedError::MissingControlListen));
                }
                None
            }
            ControllerMode::Auto => Some(AutoRunSettings::from_args(args)?),
        };
        Ok(Self {
            listen,
            mode: args.controller_mode,
            control_listen: args.control_listen.clone(),
            hello_timeout: Duration::from_millis(args.hello_timeout_ms.get()),
            heartbeat_timeout: Duration::from_millis(args.heartbeat_timeout_ms.get()),
            engine: EngineOptions {
                reservoir_capacity: args.reservoir_capacity.get(),
                ..EngineOptions::default()
            },
            auto_run,
        })
    }
}

impl AutoRunSettings {
    fn from_args(args: &FleetArgs) -> AppResult<Self> {
        let workload = args
            .workload
            .clone()
            .ok_or_else(|| AppError::distributed(DistributedError::MissingWorkload))?;
        let budget = args
            .total
            .map_or(ExecutionBudget::Unbounded, |total| ExecutionBudget::Total(total.get()));
        let parameters: WorkloadParameters = args.params.iter().cloned().collect();
        Ok(Self {
            request: StartRequest {
                workload,
                concurrency: args.concurrency,
                budget,
                worker_limit: args.worker_limit.map(usize::from),
                parameters,
            },
            min_workers: args.min_workers.get(),
            worker_wait_timeout: Duration::from_millis(args.worker_wait_timeout_ms.get()),
            run_timeout: Duration::from_millis(args.run_timeout_ms.get()),
            duration: args.duration,
        })
    }
}

/// A running controller: the engine plus its listener tasks.
pub struct ControllerHandle {
    engine: Arc<ExecutionEngine>,
    worker_addr: SocketAddr,
    control_addr: Option<SocketAddr>,
    control: Option<Arc<ControlPlane>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    #[must_use]
    pub const fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    #[must_use]
    pub const fn worker_addr(&self) -> SocketAddr {
        self.worker_addr
    }

    #[must_use]
    pub const fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    /// Stops accepting workers and control requests. Connected worker
    /// sessions end when their sockets close.
    pub fn shutdown(mut self) {
        self.abort_tasks();
    }

    fn abort_tasks(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop_background();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Binds the worker listener (and the control plane when configured) and
/// starts serving them.
///
/// # Errors
///
/// Returns an error when a listener cannot be bound.
pub async fn start_controller(settings: &ControllerSettings) -> AppResult<ControllerHandle> {
    let engine = Arc::new(ExecutionEngine::new(settings.engine));
    let worker_listener = bind(&settings.listen).await?;
    let worker_addr = local_addr(&worker_listener, "worker listener address")?;
    info!("Controller listening for workers on {}", worker_addr);

    let mut tasks = vec![tokio::spawn(accept_workers(
        worker_listener,
        Arc::clone(&engine),
        ConnectionSettings {
            hello_timeout: settings.hello_timeout,
            heartbeat_timeout: settings.heartbeat_timeout,
        },
    ))];

    let (control_addr, control) = match settings.control_listen.as_deref() {
        Some(addr) => {
            let listener = bind(addr).await?;
            let bound = local_addr(&listener, "control listener address")?;
            info!("Control plane listening on http://{}", bound);
            let plane = Arc::new(ControlPlane::new(Arc::clone(&engine)));
            tasks.push(tokio::spawn(serve_control(listener, Arc::clone(&plane))));
            (Some(bound), Some(plane))
        }
        None => (None, None),
    };

    Ok(ControllerHandle {
        engine,
        worker_addr,
        control_addr,
        control,
        tasks,
    })
}

/// Controller entry point.
///
/// # Errors
///
/// Returns an error when settings are incomplete, a listener fails to bind,
/// or an auto-mode run cannot be completed.
pub async fn run_controller(args: &FleetArgs, shutdown_tx: &ShutdownSender) -> AppResult<()> {
    let settings = ControllerSettings::from_args(args)?;
    let handle = start_controller(&settings).await?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let outcome = match (settings.mode, settings.auto_run.as_ref()) {
        (ControllerMode::Auto, Some(auto_run)) => {
            tokio::select! {
                result = auto::run_auto(handle.engine(), auto_run) => result,
                _ = shutdown_rx.recv() => {
                    if let Some(run_id) = handle.engine().current_run_id() {
                        info!("Shutdown requested; cancelling run {}", run_id);
                        handle.engine().cancel_run(run_id);
                    }
                    Ok(())
                }
            }
        }
        (ControllerMode::Manual | ControllerMode::Auto, _) => {
            drop(shutdown_rx.recv().await);
            info!("Controller shutting down");
            Ok(())
        }
    };
    handle.shutdown();
    outcome
}

async fn bind(addr: &str) -> AppResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|err| {
        AppError::distributed(DistributedError::Bind {
            addr: addr.to_owned(),
            source: err,
        })
    })
}

fn local_addr(listener: &TcpListener, context: &'static str) -> AppResult<SocketAddr> {
    listener
        .local_addr()
        .map_err(|err| AppError::distributed(DistributedError::Io { context, source: err }))
}
