use thiserror::Error;

use super::WorkloadError;

/// Failures surfaced by the execution engine to its callers.
///
/// Start-request rejections leave the engine untouched; stale worker
/// messages never produce an error and are only logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A run is already active.")]
    AlreadyRunning,
    #[error("No workers available to start a run.")]
    NoWorkersAvailable,
    #[error("Concurrency must be >= 1.")]
    InvalidConcurrency,
    #[error("Workload '{name}' is not declared by any connected worker.")]
    WorkloadNotFound { name: String },
    #[error("Invalid parameters for workload '{workload}': {source}")]
    InvalidParameters {
        workload: String,
        #[source]
        source: WorkloadError,
    },
    #[error("No run is active.")]
    NotRunning,
    #[error("Timed out after {timeout_ms}ms waiting for {waiting_for}.")]
    Timeout {
        waiting_for: &'static str,
        timeout_ms: u64,
    },
    #[error("Command link to worker {worker_id} is closed.")]
    LinkClosed { worker_id: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
