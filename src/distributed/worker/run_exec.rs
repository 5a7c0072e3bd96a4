use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{RunId, WorkerId};
use crate::error::{AppError, AppResult};
use crate::workload::{Workload, WorkloadContext, WorkloadRegistry};

use crate::distributed::protocol::{
    CreateWorkloadMessage, ProgressBatchMessage, ProgressMessage, RunMessage, WireBatch,
    WireMessage, WireSample, ticks_from_duration,
};

type Instances = Vec<Box<dyn Workload>>;

/// Workload instances of one run on this worker, from setup to teardown.
pub(super) struct PreparedRun {
    run_id: RunId,
    worker_id: WorkerId,
    idle: Instances,
    stop_tx: watch::Sender<bool>,
    execution: Option<JoinHandle<Instances>>,
}

impl PreparedRun {
    /// Creates one instance per concurrency slot and runs each setup.
    pub(super) async fn create(
        registry: &WorkloadRegistry,
        worker_id: WorkerId,
        message: &CreateWorkloadMessage,
    ) -> AppResult<Self> {
        let mut idle: Instances = Vec::new();
        for slot in 0..message.concurrency {
            let mut instance = registry
                .create(&message.workload, &message.parameters)
                .map_err(AppError::workload)?;
            let context = WorkloadContext {
                worker_id,
                run_id: message.run_id,
                slot,
            };
            instance.setup(&context).await.map_err(AppError::workload)?;
            idle.push(instance);
        }
        info!(
            "Run {}: {} instance(s) of '{}' ready",
            message.run_id,
            idle.len(),
            message.workload
        );
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            run_id: message.run_id,
            worker_id,
            idle,
            stop_tx,
            execution: None,
        })
    }

    pub(super) const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Starts every slot with its execution count. `u64::MAX` runs until
    /// stopped. Returns false when execution was already started.
    pub(super) fn start_execute(
        &mut self,
        execute_counts: &[u64],
        out_tx: &mpsc::UnboundedSender<WireMessage>,
        batch_size: usize,
    ) -> bool {
        if self.execution.is_some() {
            warn!("Run {}: duplicate execute ignored", self.run_id);
            return false;
        }
        let instances = std::mem::take(&mut self.idle);
        if execute_counts.len() != instances.len() {
            warn!(
                "Run {}: {} execute counts for {} slots",
                self.run_id,
                execute_counts.len(),
                instances.len()
            );
        }

        let mut slots = Vec::with_capacity(instances.len());
        for (index, instance) in instances.into_iter().enumerate() {
            let slot = u32::try_from(index).unwrap_or(u32::MAX);
            let count = execute_counts.get(index).copied().unwrap_or(0);
            let context = WorkloadContext {
                worker_id: self.worker_id,
                run_id: self.run_id,
                slot,
            };
            let sink = ProgressSink::new(self.run_id, slot, batch_size, out_tx.clone());
            slots.push(tokio::spawn(run_slot(
                instance,
                context,
                count,
                self.stop_tx.subscribe(),
                sink,
            )));
        }

        let run_id = self.run_id;
        let stop_rx = self.stop_tx.subscribe();
        let out_tx = out_tx.clone();
        self.execution = Some(tokio::spawn(async move {
            let mut finished: Instances = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot.await {
                    Ok(instance) => finished.push(instance),
                    Err(err) => warn!("Run {}: slot task failed: {}", run_id, err),
                }
            }
            if *stop_rx.borrow() {
                debug!("Run {}: execution stopped", run_id);
            } else if out_tx
                .send(WireMessage::ExecuteComplete(RunMessage { run_id }))
                .is_err()
            {
                debug!("Run {}: controller gone before execute_complete", run_id);
            } else {
                info!("Run {}: execution complete", run_id);
            }
            finished
        }));
        true
    }

    pub(super) fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Run {}: stopping execution", self.run_id);
        }
    }

    /// Stops execution if needed, waits for it, then tears every instance
    /// down. Teardown failures are logged; they do not fail the run.
    pub(super) async fn teardown(mut self) {
        self.stop();
        let instances = match self.execution.take() {
            Some(execution) => execution.await.unwrap_or_else(|err| {
                warn!("Run {}: execution task failed: {}", self.run_id, err);
                Vec::new()
            }),
            None => std::mem::take(&mut self.idle),
        };
        for (index, mut instance) in instances.into_iter().enumerate() {
            let context = WorkloadContext {
                worker_id: self.worker_id,
                run_id: self.run_id,
                slot: u32::try_from(index).unwrap_or(u32::MAX),
            };
            if let Err(err) = instance.teardown(&context).await {
                warn!("Run {}: teardown of slot {} failed: {}", self.run_id, index, err);
            }
        }
        info!("Run {}: teardown complete", self.run_id);
    }

    /// Drops the run without teardown, e.g. when the controller has moved on.
    pub(super) fn abandon(mut self) {
        self.stop();
        if let Some(execution) = self.execution.take() {
            execution.abort();
        }
    }
}

async fn run_slot(
    mut workload: Box<dyn Workload>,
    context: WorkloadContext,
    count: u64,
    mut stop_rx: watch::Receiver<bool>,
    mut sink: ProgressSink,
) -> Box<dyn Workload> {
    let mut executed: u64 = 0;
    while executed < count && !*stop_rx.borrow() {
        let started = Instant::now();
        let result = tokio::select! {
            result = workload.execute(&context) => result,
            _ = stop_rx.changed() => break,
        };
        let elapsed = started.elapsed();
        executed = executed.saturating_add(1);
        let delivered = match result {
            Ok(()) => sink.success(elapsed, executed),
            Err(err) => sink.failure(elapsed, executed, err.to_string()),
        };
        if !delivered {
            break;
        }
    }
    sink.flush();
    workload
}

/// Sends failures one by one and batches successes per slot.
pub(super) struct ProgressSink {
    run_id: RunId,
    slot: u32,
    batch_size: usize,
    pending: Vec<u64>,
    out_tx: mpsc::UnboundedSender<WireMessage>,
}

impl ProgressSink {
    pub(super) fn new(
        run_id: RunId,
        slot: u32,
        batch_size: usize,
        out_tx: mpsc::UnboundedSender<WireMessage>,
    ) -> Self {
        Self {
            run_id,
            slot,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            out_tx,
        }
    }

    /// Returns false once the controller link is gone.
    pub(super) fn success(&mut self, elapsed: Duration, sequence: u64) -> bool {
        if self.batch_size == 1 {
            return self.send_sample(elapsed, sequence, None);
        }
        self.pending.push(ticks_from_duration(elapsed));
        if self.pending.len() >= self.batch_size {
            self.flush()
        } else {
            true
        }
    }

    pub(super) fn failure(&mut self, elapsed: Duration, sequence: u64, message: String) -> bool {
        self.send_sample(elapsed, sequence, Some(message))
    }

    pub(super) fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let elapsed_ticks = std::mem::take(&mut self.pending);
        self.out_tx
            .send(WireMessage::ProgressBatch(ProgressBatchMessage {
                run_id: self.run_id,
                batch: WireBatch {
                    slot: self.slot,
                    elapsed_ticks,
                },
            }))
            .is_ok()
    }

    fn send_sample(&self, elapsed: Duration, sequence: u64, error: Option<String>) -> bool {
        self.out_tx
            .send(WireMessage::Progress(ProgressMessage {
                run_id: self.run_id,
                sample: WireSample {
                    slot: self.slot,
                    elapsed_ticks: ticks_from_duration(elapsed),
                    sequence,
                    has_error: error.is_some(),
                    error_message: error,
                },
            }))
            .is_ok()
    }
}
