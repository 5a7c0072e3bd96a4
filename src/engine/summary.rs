use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workload::WorkloadParameters;

use super::accumulator::WorkerResult;
use super::ids::RunId;
use super::plan::ExecutionBudget;
use super::serde_micros;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCompletion {
    /// Every phase finished.
    Completed,
    /// Stopped by an operator.
    Cancelled,
    /// No participant was left to finish the run.
    Aborted,
}

impl fmt::Display for RunCompletion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunCompletion::Completed => "completed",
            RunCompletion::Cancelled => "cancelled",
            RunCompletion::Aborted => "aborted",
        };
        formatter.write_str(label)
    }
}

/// Aggregates filled in once when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    #[serde(rename = "running_time_us", serialize_with = "serde_micros")]
    pub running_time: Duration,
    pub succeeded_sum: u64,
    pub error_sum: u64,
    pub rps_x100_sum: u64,
    pub completion: RunCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub workload: String,
    pub parameters: WorkloadParameters,
    pub started_at_ms: u64,
    pub worker_count: usize,
    pub concurrency: u32,
    pub budget: ExecutionBudget,
    /// Requested executions after planning (saturates for unbounded runs).
    pub planned_executions: u64,
    pub totals: Option<RunTotals>,
}

impl RunSummary {
    /// Fills the terminal totals from the per-worker results and hands the
    /// summary back for storage. Totals already present are kept.
    #[must_use]
    pub fn finish(mut self, results: &[WorkerResult], completion: RunCompletion) -> Self {
        if self.totals.is_some() {
            return self;
        }
        let running_time = results
            .iter()
            .map(|result| result.running_time)
            .max()
            .unwrap_or(Duration::ZERO);
        let (succeeded_sum, error_sum, rps_x100_sum) = results.iter().fold(
            (0_u64, 0_u64, 0_u64),
            |(succeeded, failed, rps), result| {
                (
                    succeeded.saturating_add(result.succeeded),
                    failed.saturating_add(result.failed),
                    rps.saturating_add(result.rps_x100),
                )
            },
        );
        self.totals = Some(RunTotals {
            running_time,
            succeeded_sum,
            error_sum,
            rps_x100_sum,
            completion,
        });
        self
    }
}
