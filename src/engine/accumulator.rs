use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::ids::WorkerId;
use super::percentile::LatencyPercentiles;
use super::{serde_micros, serde_micros_opt};

pub const DEFAULT_RESERVOIR_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

/// One timed execution reported by a worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    pub slot: u32,
    pub elapsed: Duration,
    pub sequence: u64,
    pub has_error: bool,
    pub error_message: Option<String>,
}

/// Successful executions of one slot, sent together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchedSamples {
    pub slot: u32,
    pub elapsed: Vec<Duration>,
}

/// Point-in-time view of one worker's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerResult {
    pub worker_id: WorkerId,
    pub status: ExecutionStatus,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub last_error: Option<String>,
    #[serde(rename = "total_elapsed_us", serialize_with = "serde_micros")]
    pub total_elapsed: Duration,
    #[serde(rename = "min_us", serialize_with = "serde_micros_opt")]
    pub min: Option<Duration>,
    #[serde(rename = "max_us", serialize_with = "serde_micros_opt")]
    pub max: Option<Duration>,
    #[serde(rename = "latest_us", serialize_with = "serde_micros_opt")]
    pub latest: Option<Duration>,
    #[serde(rename = "avg_us", serialize_with = "serde_micros_opt")]
    pub average: Option<Duration>,
    #[serde(rename = "running_time_us", serialize_with = "serde_micros")]
    pub running_time: Duration,
    pub rps_x100: u64,
    pub percentiles: Option<LatencyPercentiles>,
}

/// Online statistics for one worker in one run.
#[derive(Debug)]
pub struct ResultAccumulator {
    worker_id: WorkerId,
    capacity: usize,
    completed: u64,
    succeeded: u64,
    failed: u64,
    last_error: Option<String>,
    total_elapsed: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    latest: Option<Duration>,
    reservoir: VecDeque<Duration>,
    status: ExecutionStatus,
    execute_begin: Option<Instant>,
    execute_end: Option<Instant>,
    percentiles: Option<LatencyPercentiles>,
    finalized: bool,
}

impl ResultAccumulator {
    #[must_use]
    pub fn new(worker_id: WorkerId, capacity: usize) -> Self {
        Self {
            worker_id,
            capacity: capacity.max(1),
            completed: 0,
            succeeded: 0,
            failed: 0,
            last_error: None,
            total_elapsed: Duration::ZERO,
            min: None,
            max: None,
            latest: None,
            reservoir: VecDeque::new(),
            status: ExecutionStatus::Running,
            execute_begin: None,
            execute_end: None,
            percentiles: None,
            finalized: false,
        }
    }

    /// Starts the running-time clock; only the first call counts.
    pub fn begin_execute(&mut self, now: Instant) {
        if self.execute_begin.is_none() {
            self.execute_begin = Some(now);
        }
    }

    /// Failed samples only bump the counters; latency statistics cover
    /// successful executions.
    pub fn add(&mut self, sample: &ProgressSample) {
        if self.finalized {
            return;
        }
        if sample.has_error {
            self.failed = self.failed.saturating_add(1);
            self.completed = self.completed.saturating_add(1);
            if let Some(message) = &sample.error_message {
                self.last_error = Some(message.clone());
            }
        } else {
            self.record_success(sample.elapsed);
        }
    }

    pub fn add_batch(&mut self, batch: &BatchedSamples) {
        if self.finalized {
            return;
        }
        for elapsed in &batch.elapsed {
            self.record_success(*elapsed);
        }
    }

    /// Stops the running-time clock without changing the status.
    pub fn end_execute(&mut self, now: Instant) {
        if self.execute_begin.is_some() && self.execute_end.is_none() {
            self.execute_end = Some(now);
        }
    }

    /// Moves the status away from `Running`; the first terminal status wins.
    pub fn mark(&mut self, status: ExecutionStatus, now: Instant) {
        if self.finalized || self.status != ExecutionStatus::Running {
            return;
        }
        self.status = status;
        if status != ExecutionStatus::Running && self.execute_end.is_none() {
            self.execute_end = Some(now);
        }
    }

    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    #[must_use]
    pub fn running_time(&self, now: Instant) -> Duration {
        match self.execute_begin {
            Some(begin) => self.execute_end.unwrap_or(now).saturating_duration_since(begin),
            None => Duration::ZERO,
        }
    }

    /// Computes percentiles and discards the reservoir. Later calls do
    /// nothing.
    pub fn finalize(&mut self, now: Instant) {
        if self.finalized {
            return;
        }
        if self.status == ExecutionStatus::Running {
            self.status = ExecutionStatus::Succeeded;
        }
        if self.execute_end.is_none() {
            self.execute_end = Some(now);
        }
        let mut samples: Vec<Duration> = self.reservoir.drain(..).collect();
        self.percentiles = LatencyPercentiles::from_samples(&mut samples);
        self.reservoir = VecDeque::new();
        self.finalized = true;
    }

    #[must_use]
    pub fn snapshot(&self, now: Instant) -> WorkerResult {
        let running_time = self.running_time(now);
        let percentiles = if self.finalized {
            self.percentiles
        } else {
            let mut samples: Vec<Duration> = self.reservoir.iter().copied().collect();
            LatencyPercentiles::from_samples(&mut samples)
        };
        WorkerResult {
            worker_id: self.worker_id,
            status: self.status,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
            last_error: self.last_error.clone(),
            total_elapsed: self.total_elapsed,
            min: self.min,
            max: self.max,
            latest: self.latest,
            average: self.average(),
            running_time,
            rps_x100: rate_x100(self.succeeded, running_time),
            percentiles,
        }
    }

    fn average(&self) -> Option<Duration> {
        let nanos = self
            .total_elapsed
            .as_nanos()
            .checked_div(u128::from(self.succeeded))?;
        Some(Duration::from_nanos(
            u64::try_from(nanos).unwrap_or(u64::MAX),
        ))
    }

    fn record_success(&mut self, elapsed: Duration) {
        self.succeeded = self.succeeded.saturating_add(1);
        self.completed = self.completed.saturating_add(1);
        self.total_elapsed = self.total_elapsed.saturating_add(elapsed);
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |max| max.max(elapsed)));
        self.latest = Some(elapsed);
        if self.reservoir.len() >= self.capacity {
            self.reservoir.pop_front();
        }
        self.reservoir.push_back(elapsed);
    }
}

/// `count / running_time` per second, scaled by 100.
#[must_use]
pub fn rate_x100(count: u64, running_time: Duration) -> u64 {
    let micros = running_time.as_micros();
    if micros == 0 {
        return 0;
    }
    let scaled = u128::from(count).saturating_mul(100_000_000);
    u64::try_from(scaled.checked_div(micros).unwrap_or(0)).unwrap_or(u64::MAX)
}
