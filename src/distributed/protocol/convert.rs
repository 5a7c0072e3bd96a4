use std::time::Duration;

use crate::engine::{BatchedSamples, ProgressSample, WorkerCommand};

use super::types::{
    CreateWorkloadMessage, ExecuteMessage, RunMessage, WireBatch, WireMessage, WireSample,
};

const NANOS_PER_TICK: u64 = 100;

pub(in crate::distributed) fn ticks_from_duration(duration: Duration) -> u64 {
    let ticks = duration.as_nanos().checked_div(u128::from(NANOS_PER_TICK));
    ticks
        .and_then(|ticks| u64::try_from(ticks).ok())
        .unwrap_or(u64::MAX)
}

pub(in crate::distributed) const fn duration_from_ticks(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(NANOS_PER_TICK))
}

impl From<WireSample> for ProgressSample {
    fn from(sample: WireSample) -> Self {
        Self {
            slot: sample.slot,
            elapsed: duration_from_ticks(sample.elapsed_ticks),
            sequence: sample.sequence,
            has_error: sample.has_error,
            error_message: sample.error_message,
        }
    }
}

impl From<ProgressSample> for WireSample {
    fn from(sample: ProgressSample) -> Self {
        Self {
            slot: sample.slot,
            elapsed_ticks: ticks_from_duration(sample.elapsed),
            sequence: sample.sequence,
            has_error: sample.has_error,
            error_message: sample.error_message,
        }
    }
}

impl From<WireBatch> for BatchedSamples {
    fn from(batch: WireBatch) -> Self {
        Self {
            slot: batch.slot,
            elapsed: batch
                .elapsed_ticks
                .into_iter()
                .map(duration_from_ticks)
                .collect(),
        }
    }
}

impl From<WorkerCommand> for WireMessage {
    fn from(command: WorkerCommand) -> Self {
        match command {
            WorkerCommand::CreateWorkloadAndSetup {
                run_id,
                concurrency,
                workload,
                parameters,
            } => WireMessage::CreateWorkload(CreateWorkloadMessage {
                run_id,
                concurrency,
                workload,
                parameters,
            }),
            WorkerCommand::Execute {
                run_id,
                execute_counts,
            } => WireMessage::Execute(ExecuteMessage {
                run_id,
                execute_counts,
            }),
            WorkerCommand::Stop { run_id } => WireMessage::Stop(RunMessage { run_id }),
            WorkerCommand::Teardown { run_id } => WireMessage::Teardown(RunMessage { run_id }),
        }
    }
}
