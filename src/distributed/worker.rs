mod command;
mod run_exec;
mod session;


use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::args::FleetArgs;
use crate::engine::WorkerId;
use crate::error::{AppError, AppResult, DistributedError};
use crate::shutdown::ShutdownSender;
use crate::workload::WorkloadRegistry;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub join: String,
    pub worker_id: WorkerId,
    pub hostname: String,
    pub metadata: BTreeMap<String, String>,
    pub heartbeat_interval: Duration,
    /// Successful samples per progress batch; 1 sends each sample alone.
    pub batch_size: usize,
    pub standby: bool,
    pub reconnect_delay: Duration,
}

impl WorkerSettings {
    /// # Errors
    ///
    /// Returns an error when `--worker-join` is missing.
    pub fn from_args(args: &FleetArgs) -> AppResult<Self> {
        let join = args.worker_join.clone().ok_or_else(|| {
            AppError::distributed(DistributedError::MissingOption {
                option: "--worker-join",
            })
        })?;
        let mut metadata: BTreeMap<String, String> = BTreeMap::new();
        metadata.insert(
            "cpu_cores".to_owned(),
            std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get)
                .to_string(),
        );
        metadata.extend(args.meta.iter().cloned());
        Ok(Self {
            join,
            worker_id: args.worker_id.unwrap_or_else(WorkerId::generate),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_err| "unknown".to_owned()),
            metadata,
            heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms.get()),
            batch_size: args.batch_size.get(),
            standby: args.standby,
            reconnect_delay: Duration::from_millis(args.reconnect_ms.get()),
        })
    }
}

/// Worker entry point with the built-in workloads.
///
/// # Errors
///
/// Returns an error if the worker cannot connect or a session fails while
/// not in standby mode.
pub async fn run_worker(args: &FleetArgs, shutdown_tx: &ShutdownSender) -> AppResult<()> {
    let settings = WorkerSettings::from_args(args)?;
    let registry = WorkloadRegistry::with_builtins().map_err(AppError::workload)?;
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = run_worker_with(&settings, &registry) => result,
        _ = shutdown_rx.recv() => {
            info!("Worker {} shutting down", settings.worker_id);
            Ok(())
        }
    }
}

/// Session loop for an explicit registry. In standby mode sessions are
/// retried forever after `reconnect_delay`.
///
/// # Errors
///
/// Returns the session error when not in standby mode.
pub async fn run_worker_with(settings: &WorkerSettings, registry: &WorkloadRegistry) -> AppResult<()> {
    info!(
        "Worker {} starting (standby={}, reconnect={}ms, workloads={})",
        settings.worker_id,
        settings.standby,
        settings.reconnect_delay.as_millis(),
        registry.len()
    );
    loop {
        match session::run_worker_session(settings, registry).await {
            Ok(()) => {
                if !settings.standby {
                    return Ok(());
                }
            }
            Err(err) => {
                if !settings.standby {
                    return Err(err);
                }
                warn!("Worker session error: {}", err);
            }
        }
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}
