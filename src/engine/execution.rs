use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::error::EngineError;
use crate::workload::{WorkloadDescriptor, WorkloadParameters};

use super::accumulator::{
    BatchedSamples, DEFAULT_RESERVOIR_CAPACITY, ExecutionStatus, ProgressSample,
    ResultAccumulator, WorkerResult,
};
use super::events::{EngineEvent, EngineStatus};
use super::history::{HistoryEntry, HistoryStore};
use super::ids::{RunId, WorkerId};
use super::link::{Broadcaster, Dispatch, SharedLink, WorkerCommand};
use super::phase::{Phase, PhaseState, PhaseStateMachine, PhaseTransition};
use super::plan::{ExecutionBudget, RunPlan};
use super::registry::{WorkerInfo, WorkerRegistry};
use super::summary::{RunCompletion, RunSummary};
use super::{duration_to_ms, unix_time_ms};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub reservoir_capacity: usize,
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Parameters of one run as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub workload: String,
    pub concurrency: u32,
    pub budget: ExecutionBudget,
    /// `None` uses every connected worker.
    pub worker_limit: Option<usize>,
    pub parameters: WorkloadParameters,
}

struct ActiveRun {
    summary: RunSummary,
    plan: RunPlan,
    phases: PhaseStateMachine,
    broadcaster: Broadcaster,
    results: BTreeMap<WorkerId, Arc<Mutex<ResultAccumulator>>>,
    cancel_requested: bool,
}

impl ActiveRun {
    const fn run_id(&self) -> RunId {
        self.summary.run_id
    }

    fn stop_clocks(&self, now: Instant) {
        for accumulator in self.results.values() {
            lock_accumulator(accumulator).end_execute(now);
        }
    }
}

#[derive(Default)]
struct EngineState {
    registry: WorkerRegistry,
    active: Option<ActiveRun>,
}

impl EngineState {
    fn status(&self) -> EngineStatus {
        EngineStatus {
            connected: self.registry.len(),
            active_run: self.active.as_ref().map(ActiveRun::run_id),
        }
    }

    fn active_for(&mut self, run_id: RunId) -> Option<&mut ActiveRun> {
        self.active
            .as_mut()
            .filter(|active| active.run_id() == run_id)
    }
}

/// Work collected under the lock and performed after it is released.
#[derive(Default)]
struct Outbox {
    dispatches: Vec<Dispatch>,
    events: Vec<EngineEvent>,
}

/// Single source of truth for connected workers and the active run.
pub struct ExecutionEngine {
    options: EngineOptions,
    state: Mutex<EngineState>,
    history: HistoryStore,
    events: broadcast::Sender<EngineEvent>,
    status: watch::Sender<EngineStatus>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (status, _) = watch::channel(EngineStatus::default());
        Self {
            options,
            state: Mutex::new(EngineState::default()),
            history: HistoryStore::new(),
            events,
            status,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    // --- membership ---

    /// Registers a worker. A duplicate id is a protocol violation and is
    /// ignored.
    pub fn add_connection(&self, worker_id: WorkerId, link: SharedLink) -> bool {
        self.register_worker(worker_id, link, Vec::new(), BTreeMap::new())
    }

    /// Registers a worker together with the catalog and metadata from its
    /// hello, so a run can never observe it without its workloads.
    pub fn register_worker(
        &self,
        worker_id: WorkerId,
        link: SharedLink,
        catalog: Vec<WorkloadDescriptor>,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        let mut outbox = Outbox::default();
        let added = {
            let mut state = self.lock_state();
            let added = state.registry.add(worker_id, link, unix_time_ms());
            if added {
                state.registry.set_metadata(&worker_id, catalog, metadata);
                info!(
                    "Worker {} connected ({} total)",
                    worker_id,
                    state.registry.len()
                );
                outbox.events.push(EngineEvent::WorkerConnected { worker_id });
                self.publish_status(&state);
            } else {
                warn!("Worker {} is already connected; ignoring", worker_id);
            }
            added
        };
        self.flush(outbox);
        added
    }

    /// Unregisters a worker and drops it from the active run in the same
    /// critical section.
    pub fn remove_connection(&self, worker_id: &WorkerId) -> Option<WorkerInfo> {
        let mut outbox = Outbox::default();
        let removed = {
            let mut state = self.lock_state();
            let removed = state.registry.remove(worker_id);
            if removed.is_some() {
                info!(
                    "Worker {} disconnected ({} remaining)",
                    worker_id,
                    state.registry.len()
                );
                outbox
                    .events
                    .push(EngineEvent::WorkerDisconnected { worker_id: *worker_id });
                self.detach_worker(&mut state, worker_id, &mut outbox);
                if state.registry.len() == 0 {
                    self.force_done(&mut state, &mut outbox);
                }
                self.publish_status(&state);
            }
            removed.as_ref().map(WorkerInfo::from)
        };
        self.flush(outbox);
        removed
    }

    /// Drops a worker from the active run while keeping it registered.
    pub fn handle_worker_disconnected(&self, worker_id: &WorkerId) -> bool {
        let mut outbox = Outbox::default();
        let detached = {
            let mut state = self.lock_state();
            let detached = self.detach_worker(&mut state, worker_id, &mut outbox);
            self.publish_status(&state);
            detached
        };
        self.flush(outbox);
        detached
    }

    /// Replaces a worker's declared catalog and metadata.
    pub fn set_metadata(
        &self,
        worker_id: &WorkerId,
        catalog: Vec<WorkloadDescriptor>,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        let updated = self
            .lock_state()
            .registry
            .set_metadata(worker_id, catalog, metadata);
        if updated {
            debug!("Worker {} updated its metadata", worker_id);
            self.emit(EngineEvent::MetadataUpdated {
                worker_id: *worker_id,
            });
        } else {
            debug!("Metadata from unknown worker {} ignored", worker_id);
        }
        updated
    }

    // --- run lifecycle ---

    /// Plans a run over the connected workers and sends them the setup
    /// command.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`], [`EngineError::NoWorkersAvailable`],
    /// [`EngineError::InvalidConcurrency`], [`EngineError::WorkloadNotFound`] or
    /// [`EngineError::InvalidParameters`]; the engine is left untouched.
    pub fn start_run(&self, request: StartRequest) -> Result<RunId, EngineError> {
        let mut outbox = Outbox::default();
        let run_id = {
            let mut state = self.lock_state();
            if state.active.is_some() {
                return Err(EngineError::AlreadyRunning);
            }

            let snapshot = state.registry.snapshot();
            let available: Vec<WorkerId> = snapshot
                .iter()
                .map(|connection| connection.worker_id)
                .collect();
            let plan = RunPlan::compute(
                &available,
                request.concurrency,
                request.budget,
                request.worker_limit.unwrap_or(usize::MAX),
            )?;

            let catalog = state.registry.workload_catalog();
            let descriptor =
                catalog
                    .get(&request.workload)
                    .ok_or_else(|| EngineError::WorkloadNotFound {
                        name: request.workload.clone(),
                    })?;
            let parameters = descriptor.resolve(&request.parameters).map_err(|err| {
                EngineError::InvalidParameters {
                    workload: request.workload.clone(),
                    source: err,
                }
            })?;

            let run_id = RunId::generate();
            let participants = plan.worker_ids();
            let links = snapshot
                .into_iter()
                .filter(|connection| participants.contains(&connection.worker_id))
                .map(|connection| (connection.worker_id, connection.link))
                .collect();
            let broadcaster = Broadcaster::new(links);
            let results = participants
                .iter()
                .map(|worker_id| {
                    let accumulator =
                        ResultAccumulator::new(*worker_id, self.options.reservoir_capacity);
                    (*worker_id, Arc::new(Mutex::new(accumulator)))
                })
                .collect();

            let summary = RunSummary {
                run_id,
                workload: request.workload.clone(),
                parameters: parameters.clone(),
                started_at_ms: unix_time_ms(),
                worker_count: plan.worker_count(),
                concurrency: request.concurrency,
                budget: request.budget,
                planned_executions: plan.total(),
                totals: None,
            };
            let setup = WorkerCommand::CreateWorkloadAndSetup {
                run_id,
                concurrency: request.concurrency,
                workload: request.workload.clone(),
                parameters,
            };
            outbox.dispatches = broadcaster.to_targets(&participants, |_| setup.clone());
            outbox.events.push(EngineEvent::RunStarted {
                run_id,
                worker_count: participants.len(),
            });

            info!(
                "Run {} started: workload={}, workers={}/{}, concurrency={}, planned={}",
                run_id,
                request.workload,
                participants.len(),
                available.len(),
                request.concurrency,
                summary.planned_executions
            );
            state.active = Some(ActiveRun {
                summary,
                phases: PhaseStateMachine::new(participants),
                plan,
                broadcaster,
                results,
                cancel_requested: false,
            });
            self.publish_status(&state);
            run_id
        };
        self.flush(outbox);
        Ok(run_id)
    }

    pub fn report_setup_complete(&self, worker_id: &WorkerId, run_id: RunId) -> bool {
        self.report_phase(worker_id, run_id, Phase::Setup)
    }

    /// Also marks the worker's statistics as succeeded.
    pub fn report_execute_complete(&self, worker_id: &WorkerId, run_id: RunId) -> bool {
        self.report_phase(worker_id, run_id, Phase::Execute)
    }

    pub fn report_teardown_complete(&self, worker_id: &WorkerId, run_id: RunId) -> bool {
        self.report_phase(worker_id, run_id, Phase::Teardown)
    }

    pub fn report_progress(
        &self,
        worker_id: &WorkerId,
        run_id: RunId,
        sample: &ProgressSample,
    ) -> bool {
        self.with_accumulator(worker_id, run_id, |accumulator| accumulator.add(sample))
    }

    pub fn report_progress_batch(
        &self,
        worker_id: &WorkerId,
        run_id: RunId,
        batch: &BatchedSamples,
    ) -> bool {
        self.with_accumulator(worker_id, run_id, |accumulator| {
            accumulator.add_batch(batch);
        })
    }

    /// Cancels whatever run is active.
    ///
    /// The first call stops execution and starts teardown; the run finishes
    /// once teardown reports (or disconnects) arrive. Calling it again for
    /// the same run finishes it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRunning`] when no run is active.
    pub fn cancel(&self) -> Result<RunId, EngineError> {
        let mut outbox = Outbox::default();
        let run_id = {
            let mut state = self.lock_state();
            let run_id = state
                .active
                .as_ref()
                .map(ActiveRun::run_id)
                .ok_or(EngineError::NotRunning)?;
            self.cancel_active(&mut state, &mut outbox);
            self.publish_status(&state);
            run_id
        };
        self.flush(outbox);
        Ok(run_id)
    }

    /// Cancels `run_id` only if it is still the active run.
    pub fn cancel_run(&self, run_id: RunId) -> bool {
        let mut outbox = Outbox::default();
        let cancelled = {
            let mut state = self.lock_state();
            if state.active_for(run_id).is_none() {
                debug!("Cancel for inactive run {} ignored", run_id);
                false
            } else {
                self.cancel_active(&mut state, &mut outbox);
                self.publish_status(&state);
                true
            }
        };
        self.flush(outbox);
        cancelled
    }

    // --- reads ---

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_state().active.is_some()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.lock_state().registry.len()
    }

    #[must_use]
    pub fn current_run_id(&self) -> Option<RunId> {
        self.lock_state().active.as_ref().map(ActiveRun::run_id)
    }

    #[must_use]
    pub fn phase_state(&self) -> Option<PhaseState> {
        self.lock_state()
            .active
            .as_ref()
            .map(|active| active.phases.state())
    }

    #[must_use]
    pub fn is_connected(&self, worker_id: &WorkerId) -> bool {
        self.lock_state().registry.contains(worker_id)
    }

    #[must_use]
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.lock_state().registry.infos()
    }

    #[must_use]
    pub fn workload_catalog(&self) -> Vec<WorkloadDescriptor> {
        self.lock_state()
            .registry
            .workload_catalog()
            .into_values()
            .collect()
    }

    /// Live view of the active run, or the most recent finished run.
    #[must_use]
    ///
    /// Live snapshots are built after the engine lock is released.
    pub fn latest_result(&self) -> Option<Arc<HistoryEntry>> {
        let live = self.lock_state().active.as_ref().map(|active| {
            let accumulators: Vec<Arc<Mutex<ResultAccumulator>>> =
                active.results.values().cloned().collect();
            (active.summary.clone(), accumulators)
        });
        let Some((summary, accumulators)) = live else {
            return self.history.latest();
        };
        let now = Instant::now();
        let results = accumulators
            .iter()
            .map(|accumulator| lock_accumulator(accumulator).snapshot(now))
            .collect();
        Some(Arc::new(HistoryEntry { summary, results }))
    }

    #[must_use]
    pub fn history_list(&self) -> Vec<RunSummary> {
        self.history
            .list()
            .iter()
            .map(|entry| entry.summary.clone())
            .collect()
    }

    #[must_use]
    pub fn history_count(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn history_result(&self, run_id: &RunId) -> Option<Arc<HistoryEntry>> {
        self.history.get(run_id)
    }

    // --- waits ---

    /// Waits until at least `min_workers` are connected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] when `timeout` elapses first.
    pub async fn wait_for_workers(
        &self,
        min_workers: usize,
        timeout: Duration,
    ) -> Result<usize, EngineError> {
        let mut status = self.status.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            status
                .wait_for(|status| status.connected >= min_workers)
                .await
                .map(|status| status.connected)
        })
        .await;
        match waited {
            Ok(Ok(connected)) => Ok(connected),
            Ok(Err(_)) | Err(_) => Err(EngineError::Timeout {
                waiting_for: "workers",
                timeout_ms: duration_to_ms(timeout),
            }),
        }
    }

    /// Waits until no run is active.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] when `timeout` elapses first.
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), EngineError> {
        let mut status = self.status.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            status
                .wait_for(|status| status.active_run.is_none())
                .await
                .map(drop)
        })
        .await;
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(EngineError::Timeout {
                waiting_for: "run completion",
                timeout_ms: duration_to_ms(timeout),
            }),
        }
    }

    /// Waits for `run_id` to finish and returns its history entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] when `timeout` elapses first and
    /// [`EngineError::NotRunning`] if the run never reached the history.
    pub async fn wait_for_run(
        &self,
        run_id: RunId,
        timeout: Duration,
    ) -> Result<Arc<HistoryEntry>, EngineError> {
        let mut status = self.status.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            status
                .wait_for(|status| status.active_run != Some(run_id))
                .await
                .map(drop)
        })
        .await;
        match waited {
            Ok(Ok(())) => self.history.get(&run_id).ok_or(EngineError::NotRunning),
            Ok(Err(_)) | Err(_) => Err(EngineError::Timeout {
                waiting_for: "run completion",
                timeout_ms: duration_to_ms(timeout),
            }),
        }
    }

    // --- internals ---

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_status(&self, state: &EngineState) {
        let next = state.status();
        self.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            trace!("No engine event subscribers");
        }
    }

    fn flush(&self, outbox: Outbox) {
        let mut closed = Vec::new();
        for dispatch in outbox.dispatches {
            let worker_id = dispatch.worker_id;
            if !dispatch.deliver() {
                closed.push(worker_id);
            }
        }
        for event in outbox.events {
            self.emit(event);
        }
        for worker_id in closed {
            self.handle_worker_disconnected(&worker_id);
        }
    }

    fn with_accumulator<F>(&self, worker_id: &WorkerId, run_id: RunId, apply: F) -> bool
    where
        F: FnOnce(&mut ResultAccumulator),
    {
        let accumulator = self
            .lock_state()
            .active_for(run_id)
            .and_then(|active| active.results.get(worker_id).cloned());
        match accumulator {
            Some(accumulator) => {
                apply(&mut lock_accumulator(&accumulator));
                true
            }
            None => {
                trace!(
                    "Dropping stale progress from worker {} for run {}",
                    worker_id, run_id
                );
                false
            }
        }
    }

    fn report_phase(&self, worker_id: &WorkerId, run_id: RunId, phase: Phase) -> bool {
        let mut outbox = Outbox::default();
        let accepted = {
            let mut state = self.lock_state();
            let transition = match state.active_for(run_id) {
                Some(active) if active.phases.awaits(worker_id, phase) => {
                    if phase == Phase::Execute
                        && let Some(accumulator) = active.results.get(worker_id)
                    {
                        lock_accumulator(accumulator)
                            .mark(ExecutionStatus::Succeeded, Instant::now());
                    }
                    debug!(
                        "Worker {} completed {:?} for run {}",
                        worker_id, phase, run_id
                    );
                    Some(active.phases.report_phase_complete(worker_id, phase))
                }
                Some(_) | None => None,
            };
            match transition {
                Some(transition) => {
                    self.apply_transition(&mut state, transition, &mut outbox);
                    self.publish_status(&state);
                    true
                }
                None => {
                    debug!(
                        "Ignoring stale {:?} report from worker {} for run {}",
                        phase, worker_id, run_id
                    );
                    false
                }
            }
        };
        self.flush(outbox);
        accepted
    }

    fn detach_worker(
        &self,
        state: &mut EngineState,
        worker_id: &WorkerId,
        outbox: &mut Outbox,
    ) -> bool {
        let Some(active) = state.active.as_mut() else {
            return false;
        };
        if !active.phases.is_participant(worker_id) {
            return false;
        }
        active.broadcaster.remove(worker_id);
        if let Some(accumulator) = active.results.get(worker_id) {
            lock_accumulator(accumulator).mark(ExecutionStatus::Failed, Instant::now());
        }
        warn!(
            "Worker {} left run {} during {:?}",
            worker_id,
            active.run_id(),
            active.phases.state()
        );
        let transition = active.phases.remove_worker(worker_id);
        self.apply_transition(state, transition, outbox);
        true
    }

    fn cancel_active(&self, state: &mut EngineState, outbox: &mut Outbox) {
        let Some(active) = state.active.as_mut() else {
            return;
        };
        let run_id = active.run_id();
        if active.cancel_requested {
            info!("Run {} cancelled again; finishing now", run_id);
            self.force_done(state, outbox);
            return;
        }

        active.cancel_requested = true;
        active.stop_clocks(Instant::now());
        let participants = active.phases.participants();
        let stop = WorkerCommand::Stop { run_id };
        outbox
            .dispatches
            .extend(active.broadcaster.to_targets(&participants, |_| stop.clone()));
        if let PhaseTransition::BeginTeardown { targets } = active.phases.cancel() {
            let teardown = WorkerCommand::Teardown { run_id };
            outbox
                .dispatches
                .extend(active.broadcaster.to_targets(&targets, |_| teardown.clone()));
        }
        outbox.events.push(EngineEvent::RunCancelled { run_id });
        info!("Run {} cancelled; waiting for teardown", run_id);
    }

    fn force_done(&self, state: &mut EngineState, outbox: &mut Outbox) {
        let transition = match state.active.as_mut() {
            Some(active) => active.phases.force_complete(),
            None => return,
        };
        self.apply_transition(state, transition, outbox);
    }

    fn apply_transition(
        &self,
        state: &mut EngineState,
        transition: PhaseTransition,
        outbox: &mut Outbox,
    ) {
        match transition {
            PhaseTransition::None => {}
            PhaseTransition::BeginExecute { targets } => {
                let Some(active) = state.active.as_mut() else {
                    return;
                };
                let run_id = active.run_id();
                let now = Instant::now();
                for worker_id in &targets {
                    if let Some(accumulator) = active.results.get(worker_id) {
                        lock_accumulator(accumulator).begin_execute(now);
                    }
                }
                let plan = &active.plan;
                outbox
                    .dispatches
                    .extend(active.broadcaster.to_targets(&targets, |worker_id| {
                        WorkerCommand::Execute {
                            run_id,
                            execute_counts: plan
                                .slot_counts(worker_id)
                                .map(<[u64]>::to_vec)
                                .unwrap_or_default(),
                        }
                    }));
                outbox.events.push(EngineEvent::SetupCompleted { run_id });
                info!("Run {} setup complete; executing on {} workers", run_id, targets.len());
            }
            PhaseTransition::BeginTeardown { targets } => {
                let Some(active) = state.active.as_mut() else {
                    return;
                };
                let run_id = active.run_id();
                let teardown = WorkerCommand::Teardown { run_id };
                outbox
                    .dispatches
                    .extend(active.broadcaster.to_targets(&targets, |_| teardown.clone()));
                outbox.events.push(EngineEvent::ExecuteCompleted { run_id });
                info!("Run {} execution complete; tearing down", run_id);
            }
            PhaseTransition::Done => self.finalize_active(state, outbox),
        }
    }

    fn finalize_active(&self, state: &mut EngineState, outbox: &mut Outbox) {
        let Some(active) = state.active.take() else {
            return;
        };
        let now = Instant::now();
        let completion = if active.phases.participants().is_empty() {
            RunCompletion::Aborted
        } else if active.cancel_requested {
            RunCompletion::Cancelled
        } else {
            RunCompletion::Completed
        };

        let results: Vec<WorkerResult> = active
            .results
            .values()
            .map(|accumulator| {
                let mut accumulator = lock_accumulator(accumulator);
                accumulator.finalize(now);
                accumulator.snapshot(now)
            })
            .collect();
        let summary = active.summary.finish(&results, completion);
        let run_id = summary.run_id;
        if let Some(totals) = summary.totals.as_ref() {
            info!(
                "Run {} {}: succeeded={}, errors={}, running_time={}ms",
                run_id,
                completion,
                totals.succeeded_sum,
                totals.error_sum,
                duration_to_ms(totals.running_time)
            );
        }
        self.history.push(HistoryEntry { summary, results });
        outbox
            .events
            .push(EngineEvent::RunFinished { run_id, completion });
    }
}

fn lock_accumulator(
    accumulator: &Mutex<ResultAccumulator>,
) -> MutexGuard<'_, ResultAccumulator> {
    accumulator.lock().unwrap_or_else(PoisonError::into_inner)
}
