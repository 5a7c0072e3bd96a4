use crate::engine::RunId;
use crate::error::AppError;

use crate::distributed::protocol::{CreateWorkloadMessage, ExecuteMessage};

/// Controller messages as the worker session loop consumes them.
pub(super) enum ControllerCommand {
    CreateWorkload(CreateWorkloadMessage),
    Execute(ExecuteMessage),
    Stop(RunId),
    Teardown(RunId),
    Error(AppError),
    Disconnected(AppError),
}
