use serde::Serialize;

use super::ids::{RunId, WorkerId};
use super::summary::RunCompletion;

/// State changes published by the engine after its lock is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    WorkerConnected { worker_id: WorkerId },
    WorkerDisconnected { worker_id: WorkerId },
    MetadataUpdated { worker_id: WorkerId },
    RunStarted { run_id: RunId, worker_count: usize },
    SetupCompleted { run_id: RunId },
    ExecuteCompleted { run_id: RunId },
    RunCancelled { run_id: RunId },
    RunFinished { run_id: RunId, completion: RunCompletion },
}

/// Latest observable engine state, for callers that wait on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub connected: usize,
    pub active_run: Option<RunId>,
}
