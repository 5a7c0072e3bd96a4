//! Controller-side execution engine.
//!
//! The engine owns the connected-worker registry and the single active run.
//! Both live behind one mutex; commands to workers and engine events are
//! dispatched only after that mutex is released.
mod accumulator;
mod events;
mod execution;
mod history;
mod ids;
mod link;
mod percentile;
mod phase;
mod plan;
mod registry;
mod summary;

#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::Serializer;

pub use accumulator::{
    BatchedSamples, DEFAULT_RESERVOIR_CAPACITY, ExecutionStatus, ProgressSample,
    ResultAccumulator, WorkerResult, rate_x100,
};
pub use events::{EngineEvent, EngineStatus};
pub use execution::{EngineOptions, ExecutionEngine, StartRequest};
pub use history::{HistoryEntry, HistoryStore};
pub use ids::{RunId, WorkerId};
pub use link::{SharedLink, WorkerCommand, WorkerLink};
pub use percentile::{LatencyPercentiles, percentile};
pub use phase::{Phase, PhaseState, PhaseStateMachine, PhaseTransition};
pub use plan::{ExecutionBudget, RunPlan, WorkerAssignment};
pub use registry::{WorkerConnection, WorkerInfo};
pub use summary::{RunCompletion, RunSummary, RunTotals};

/// Wall-clock milliseconds since the Unix epoch.
#[must_use]
pub fn unix_time_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn serde_micros<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
}

fn serde_micros_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serde_micros(duration, serializer),
        None => serializer.serialize_none(),
    }
}
