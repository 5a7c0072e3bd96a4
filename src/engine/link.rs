use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EngineError;
use crate::workload::WorkloadParameters;

use super::ids::{RunId, WorkerId};

/// Commands the engine sends to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    CreateWorkloadAndSetup {
        run_id: RunId,
        concurrency: u32,
        workload: String,
        parameters: WorkloadParameters,
    },
    Execute {
        run_id: RunId,
        execute_counts: Vec<u64>,
    },
    Stop {
        run_id: RunId,
    },
    Teardown {
        run_id: RunId,
    },
}

impl WorkerCommand {
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            WorkerCommand::CreateWorkloadAndSetup { run_id, .. }
            | WorkerCommand::Execute { run_id, .. }
            | WorkerCommand::Stop { run_id }
            | WorkerCommand::Teardown { run_id } => *run_id,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            WorkerCommand::CreateWorkloadAndSetup { .. } => "create_workload",
            WorkerCommand::Execute { .. } => "execute",
            WorkerCommand::Stop { .. } => "stop",
            WorkerCommand::Teardown { .. } => "teardown",
        }
    }
}

/// Non-blocking outbound handle to one worker.
///
/// Implementations must never block; the engine calls `send` right after
/// releasing its lock.
pub trait WorkerLink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`EngineError::LinkClosed`] when the worker side is gone.
    fn send(&self, worker_id: WorkerId, command: WorkerCommand) -> Result<(), EngineError>;
}

impl WorkerLink for mpsc::UnboundedSender<WorkerCommand> {
    fn send(&self, worker_id: WorkerId, command: WorkerCommand) -> Result<(), EngineError> {
        mpsc::UnboundedSender::send(self, command).map_err(|_err| EngineError::LinkClosed {
            worker_id: worker_id.to_string(),
        })
    }
}

pub type SharedLink = Arc<dyn WorkerLink>;

/// One command addressed to one worker, delivered after the engine lock is
/// released.
pub(crate) struct Dispatch {
    pub(crate) worker_id: WorkerId,
    pub(crate) link: SharedLink,
    pub(crate) command: WorkerCommand,
}

impl Dispatch {
    /// Returns `false` when the link is closed.
    pub(crate) fn deliver(self) -> bool {
        let name = self.command.name();
        match self.link.send(self.worker_id, self.command) {
            Ok(()) => true,
            Err(err) => {
                warn!("Dropping {} for worker {}: {}", name, self.worker_id, err);
                false
            }
        }
    }
}

/// Fan-out over the links of a run's participants.
#[derive(Clone, Default)]
pub(crate) struct Broadcaster {
    links: BTreeMap<WorkerId, SharedLink>,
}

impl Broadcaster {
    pub(crate) fn new(links: BTreeMap<WorkerId, SharedLink>) -> Self {
        Self { links }
    }

    pub(crate) fn remove(&mut self, worker_id: &WorkerId) {
        self.links.remove(worker_id);
    }

    /// Builds one dispatch per target that still has a link.
    pub(crate) fn to_targets<F>(&self, targets: &[WorkerId], mut build: F) -> Vec<Dispatch>
    where
        F: FnMut(&WorkerId) -> WorkerCommand,
    {
        targets
            .iter()
            .filter_map(|worker_id| {
                self.links.get(worker_id).map(|link| Dispatch {
                    worker_id: *worker_id,
                    link: Arc::clone(link),
                    command: build(worker_id),
                })
            })
            .collect()
    }
}
