use serde::{Deserialize, Serialize};

use crate::error::EngineError;

use super::ids::WorkerId;

/// How many executions a run asks for in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExecutionBudget {
    Total(u64),
    /// Every slot repeats until the run is stopped.
    Unbounded,
}

/// Per-slot execution counts for one participating worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerAssignment {
    pub worker_id: WorkerId,
    pub slot_counts: Vec<u64>,
}

impl WorkerAssignment {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.slot_counts
            .iter()
            .fold(0_u64, |sum, count| sum.saturating_add(*count))
    }
}

/// Immutable work distribution for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    concurrency: u32,
    assignments: Vec<WorkerAssignment>,
}

impl RunPlan {
    /// Partitions `budget` over the first `worker_limit` workers (ascending
    /// id) and their `concurrency` slots.
    ///
    /// Slots start at `total / workers / concurrency / concurrency` (at least
    /// one). Remainder unit `i` goes to worker `i % workers`, slot
    /// `(i / workers) % concurrency`, so the sum is
    /// `max(total, workers * concurrency)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoWorkersAvailable`] for an empty worker set or
    /// a zero limit and [`EngineError::InvalidConcurrency`] for zero
    /// concurrency.
    pub fn compute(
        available: &[WorkerId],
        concurrency: u32,
        budget: ExecutionBudget,
        worker_limit: usize,
    ) -> Result<Self, EngineError> {
        if worker_limit == 0 || available.is_empty() {
            return Err(EngineError::NoWorkersAvailable);
        }
        if concurrency == 0 {
            return Err(EngineError::InvalidConcurrency);
        }

        let mut ordered = available.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        ordered.truncate(worker_limit);

        let slots = usize::try_from(concurrency).unwrap_or(usize::MAX);
        let assignments = match budget {
            ExecutionBudget::Unbounded => ordered
                .into_iter()
                .map(|worker_id| WorkerAssignment {
                    worker_id,
                    slot_counts: vec![u64::MAX; slots],
                })
                .collect(),
            ExecutionBudget::Total(total) => distribute(&ordered, concurrency, total),
        };

        Ok(Self {
            concurrency,
            assignments,
        })
    }

    #[must_use]
    pub const fn concurrency(&self) -> u32 {
        self.concurrency
    }

    #[must_use]
    pub fn assignments(&self) -> &[WorkerAssignment] {
        &self.assignments
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.assignments
            .iter()
            .map(|assignment| assignment.worker_id)
            .collect()
    }

    #[must_use]
    pub fn slot_counts(&self, worker_id: &WorkerId) -> Option<&[u64]> {
        self.assignments
            .iter()
            .find(|assignment| &assignment.worker_id == worker_id)
            .map(|assignment| assignment.slot_counts.as_slice())
    }

    /// Sum over every worker and slot, saturating.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.assignments
            .iter()
            .fold(0_u64, |sum, assignment| sum.saturating_add(assignment.total()))
    }
}

fn distribute(workers: &[WorkerId], concurrency: u32, total: u64) -> Vec<WorkerAssignment> {
    let worker_count = u64::try_from(workers.len()).unwrap_or(u64::MAX);
    let slots = u64::from(concurrency);

    let per_worker_base = total
        .checked_div(worker_count)
        .and_then(|value| value.checked_div(slots))
        .unwrap_or(0)
        .max(1);
    let per_slot_base = per_worker_base.checked_div(slots).unwrap_or(0).max(1);

    let units_per_round = worker_count.saturating_mul(slots);
    let assigned = per_slot_base.saturating_mul(units_per_round);
    let remainder = total.saturating_sub(assigned);
    let full_rounds = remainder.checked_div(units_per_round).unwrap_or(0);
    let leftover = remainder.checked_rem(units_per_round).unwrap_or(0);
    let base = per_slot_base.saturating_add(full_rounds);

    workers
        .iter()
        .zip(0_u64..)
        .map(|(worker_id, worker_index)| {
            let slot_counts = (0..slots)
                .map(|slot| {
                    // position of (worker, slot) inside one worker-major round
                    let position = slot
                        .saturating_mul(worker_count)
                        .saturating_add(worker_index);
                    if position < leftover {
                        base.saturating_add(1)
                    } else {
                        base
                    }
                })
                .collect();
            WorkerAssignment {
                worker_id: *worker_id,
                slot_counts,
            }
        })
        .collect()
}
