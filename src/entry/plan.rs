use crate::args::FleetArgs;
use crate::error::{AppError, AppResult, DistributedError, ValidationError};
use crate::shutdown::{setup_signal_shutdown_handler, shutdown_channel};

#[derive(Debug)]
pub(super) enum RunPlan {
    Controller(FleetArgs),
    Worker(FleetArgs),
}

impl RunPlan {
    pub(super) const fn role(&self) -> &'static str {
        match self {
            RunPlan::Controller(_) => "controller",
            RunPlan::Worker(_) => "worker",
        }
    }
}

/// Picks the process role from the merged CLI and config values.
pub(super) fn build_plan(args: FleetArgs) -> AppResult<RunPlan> {
    match (args.controller_listen.is_some(), args.worker_join.is_some()) {
        (true, true) => Err(AppError::validation(
            ValidationError::ControllerWorkerConflict,
        )),
        (true, false) => Ok(RunPlan::Controller(args)),
        (false, true) => Ok(RunPlan::Worker(args)),
        (false, false) => Err(AppError::distributed(DistributedError::MissingRole)),
    }
}

pub(super) async fn execute_plan(plan: RunPlan) -> AppResult<()> {
    let (shutdown_tx, _) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);
    tracing::debug!("Starting as {}", plan.role());

    let outcome = match &plan {
        RunPlan::Controller(args) => crate::distributed::run_controller(args, &shutdown_tx).await,
        RunPlan::Worker(args) => crate::distributed::run_worker(args, &shutdown_tx).await,
    };

    signal_handle.abort();
    if let Err(err) = &outcome {
        tracing::error!("{} failed: {}", plan.role(), err);
    }
    outcome
}
