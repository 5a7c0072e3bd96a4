use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::run_async_test;
use crate::engine::{
    BatchedSamples, EngineEvent, EngineOptions, ExecutionBudget, ExecutionEngine,
    ExecutionStatus, PhaseState, ProgressSample, RunCompletion, RunId, StartRequest,
    WorkerCommand, WorkerId,
};
use crate::error::{AppError, AppResult, EngineError};
use crate::workload::{ParameterKind, ParameterSpec, WorkloadDescriptor};

struct TestWorker {
    id: WorkerId,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
}

impl TestWorker {
    fn drain(&mut self) -> Vec<WorkerCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }
}

fn echo_catalog() -> Vec<WorkloadDescriptor> {
    vec![
        WorkloadDescriptor::new("Echo").with_parameter(
            ParameterSpec::new("delay_ms", ParameterKind::UInt).with_default("0"),
        ),
    ]
}

fn connect_workers(engine: &ExecutionEngine, count: usize) -> Vec<TestWorker> {
    let mut workers: Vec<TestWorker> = (0..count)
        .map(|_| {
            let id = WorkerId::generate();
            let (tx, rx) = mpsc::unbounded_channel();
            engine.add_connection(id, Arc::new(tx));
            engine.set_metadata(&id, echo_catalog(), BTreeMap::new());
            TestWorker { id, commands: rx }
        })
        .collect();
    workers.sort_by_key(|worker| worker.id);
    workers
}

fn echo_request(concurrency: u32, budget: ExecutionBudget) -> StartRequest {
    StartRequest {
        workload: "Echo".to_owned(),
        concurrency,
        budget,
        worker_limit: None,
        parameters: BTreeMap::new(),
    }
}

fn expect_command_names(
    worker: &mut TestWorker,
    expected: &[&str],
) -> AppResult<Vec<WorkerCommand>> {
    let commands = worker.drain();
    let names: Vec<&str> = commands.iter().map(WorkerCommand::name).collect();
    if names != expected {
        return Err(AppError::engine(format!(
            "Worker {} got {:?}, expected {:?}",
            worker.id, names, expected
        )));
    }
    Ok(commands)
}

#[test]
fn echo_run_across_four_workers_completes_with_forty_executions() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut workers = connect_workers(&engine, 4);
    let mut request = echo_request(2, ExecutionBudget::Total(40));
    request.worker_limit = Some(4);
    let run_id = engine.start_run(request)?;

    for worker in &mut workers {
        expect_command_names(worker, &["create_workload"])?;
    }
    // setup reports in reverse order
    for worker in workers.iter().rev() {
        engine.report_setup_complete(&worker.id, run_id);
    }

    for worker in &mut workers {
        let commands = expect_command_names(worker, &["execute"])?;
        let counts = match commands.first() {
            Some(WorkerCommand::Execute { execute_counts, .. }) => execute_counts.clone(),
            _ => return Err(AppError::engine("Expected execute command")),
        };
        if counts != [5, 5] {
            return Err(AppError::engine(format!("Unexpected counts {:?}", counts)));
        }
        for (slot, count) in (0_u32..).zip(counts) {
            let elapsed = (0..count).map(|_| Duration::from_millis(2)).collect();
            engine.report_progress_batch(&worker.id, run_id, &BatchedSamples { slot, elapsed });
        }
    }

    let (first, rest) = workers
        .split_first_mut()
        .ok_or_else(|| AppError::engine("no workers"))?;
    engine.report_progress(
        &first.id,
        run_id,
        &ProgressSample {
            slot: 0,
            elapsed: Duration::from_millis(3),
            sequence: 5,
            has_error: true,
            error_message: Some("boom".to_owned()),
        },
    );
    for worker in rest.iter() {
        engine.report_execute_complete(&worker.id, run_id);
    }
    engine.report_execute_complete(&first.id, run_id);

    for worker in &mut workers {
        expect_command_names(worker, &["teardown"])?;
        engine.report_teardown_complete(&worker.id, run_id);
    }

    if engine.is_running() {
        return Err(AppError::engine("Run should be finished"));
    }
    if engine.history_count() != 1 {
        return Err(AppError::engine("Expected exactly one history entry"));
    }
    let entry = engine
        .history_result(&run_id)
        .ok_or_else(|| AppError::engine("Missing history entry"))?;
    let totals = entry
        .summary
        .totals
        .as_ref()
        .ok_or_else(|| AppError::engine("Missing totals"))?;
    if totals.succeeded_sum != 40 || totals.error_sum != 1 {
        return Err(AppError::engine(format!(
            "Unexpected sums {} + {}",
            totals.succeeded_sum, totals.error_sum
        )));
    }
    if totals.completion != RunCompletion::Completed {
        return Err(AppError::engine("Expected completed run"));
    }
    if entry
        .results
        .iter()
        .any(|result| result.status != ExecutionStatus::Succeeded || result.percentiles.is_none())
    {
        return Err(AppError::engine("Every worker should finalize as succeeded"));
    }
    Ok(())
}

#[test]
fn duplicate_execute_complete_sends_one_teardown() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut workers = connect_workers(&engine, 2);
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(4)))?;
    for worker in &workers {
        engine.report_setup_complete(&worker.id, run_id);
    }
    let ids: Vec<WorkerId> = workers.iter().map(|worker| worker.id).collect();
    for id in ids.iter().chain(ids.iter()) {
        engine.report_execute_complete(id, run_id);
    }
    for worker in &mut workers {
        expect_command_names(worker, &["create_workload", "execute", "teardown"])?;
    }
    let first = ids
        .first()
        .ok_or_else(|| AppError::engine("no workers"))?;
    if engine.report_execute_complete(first, run_id) {
        return Err(AppError::engine("Late execute report must be rejected"));
    }
    Ok(())
}

#[test]
fn cancel_stops_and_tears_down_without_execute_reports() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut workers = connect_workers(&engine, 3);
    let run_id = engine.start_run(echo_request(2, ExecutionBudget::Unbounded))?;
    for worker in &workers {
        engine.report_setup_complete(&worker.id, run_id);
    }
    for worker in &mut workers {
        let commands = expect_command_names(worker, &["create_workload", "execute"])?;
        if !commands.iter().any(|command| {
            matches!(command, WorkerCommand::Execute { execute_counts, .. }
                if execute_counts.iter().all(|count| *count == u64::MAX))
        }) {
            return Err(AppError::engine("Unbounded run should execute until stopped"));
        }
    }

    if engine.cancel()? != run_id {
        return Err(AppError::engine("Cancel returned another run id"));
    }
    if engine.phase_state() != Some(PhaseState::AwaitingTeardownComplete) {
        return Err(AppError::engine("Cancel should move to teardown"));
    }
    for worker in &mut workers {
        expect_command_names(worker, &["stop", "teardown"])?;
    }
    if !engine.is_running() {
        return Err(AppError::engine("Run must wait for teardown reports"));
    }
    for worker in &workers {
        engine.report_teardown_complete(&worker.id, run_id);
    }
    if engine.is_running() {
        return Err(AppError::engine("Teardown reports should finish the run"));
    }
    let completion = engine
        .history_result(&run_id)
        .and_then(|entry| entry.summary.totals.as_ref().map(|totals| totals.completion));
    if completion != Some(RunCompletion::Cancelled) {
        return Err(AppError::engine(format!(
            "Expected cancelled run, got {:?}",
            completion
        )));
    }
    Ok(())
}

#[test]
fn second_cancel_finishes_immediately() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let _workers = connect_workers(&engine, 2);
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Unbounded))?;
    if !engine.cancel_run(run_id) {
        return Err(AppError::engine("First cancel should apply"));
    }
    if !engine.is_running() {
        return Err(AppError::engine("First cancel must wait for teardown"));
    }
    if !engine.cancel_run(run_id) || engine.is_running() {
        return Err(AppError::engine("Second cancel should finish the run"));
    }
    if engine.cancel_run(run_id) {
        return Err(AppError::engine("Cancel of a finished run must be ignored"));
    }
    if !matches!(engine.cancel(), Err(EngineError::NotRunning)) {
        return Err(AppError::engine("Expected NotRunning"));
    }
    Ok(())
}

#[test]
fn start_run_rejects_invalid_requests() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    if !matches!(
        engine.start_run(echo_request(1, ExecutionBudget::Total(1))),
        Err(EngineError::NoWorkersAvailable)
    ) {
        return Err(AppError::engine("Expected NoWorkersAvailable"));
    }

    let _workers = connect_workers(&engine, 2);
    let mut limited = echo_request(1, ExecutionBudget::Total(1));
    limited.worker_limit = Some(0);
    if !matches!(engine.start_run(limited), Err(EngineError::NoWorkersAvailable)) {
        return Err(AppError::engine("Expected NoWorkersAvailable for zero limit"));
    }
    if !matches!(
        engine.start_run(echo_request(0, ExecutionBudget::Total(1))),
        Err(EngineError::InvalidConcurrency)
    ) {
        return Err(AppError::engine("Expected InvalidConcurrency"));
    }
    let mut unknown = echo_request(1, ExecutionBudget::Total(1));
    unknown.workload = "Missing".to_owned();
    if !matches!(engine.start_run(unknown), Err(EngineError::WorkloadNotFound { .. })) {
        return Err(AppError::engine("Expected WorkloadNotFound"));
    }
    let mut bad_parameters = echo_request(1, ExecutionBudget::Total(1));
    bad_parameters
        .parameters
        .insert("delay_ms".to_owned(), "soon".to_owned());
    if !matches!(
        engine.start_run(bad_parameters),
        Err(EngineError::InvalidParameters { .. })
    ) {
        return Err(AppError::engine("Expected InvalidParameters"));
    }
    if engine.is_running() {
        return Err(AppError::engine("Rejected starts must not leave a run"));
    }

    engine.start_run(echo_request(1, ExecutionBudget::Total(1)))?;
    if !matches!(
        engine.start_run(echo_request(1, ExecutionBudget::Total(1))),
        Err(EngineError::AlreadyRunning)
    ) {
        return Err(AppError::engine("Expected AlreadyRunning"));
    }
    Ok(())
}

#[test]
fn stale_reports_are_ignored() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let workers = connect_workers(&engine, 1);
    let worker = workers
        .first()
        .ok_or_else(|| AppError::engine("no workers"))?;
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(1)))?;
    let stale = RunId::generate();

    if engine.report_setup_complete(&worker.id, stale) {
        return Err(AppError::engine("Report for another run must be ignored"));
    }
    if engine.report_progress_batch(
        &worker.id,
        stale,
        &BatchedSamples {
            slot: 0,
            elapsed: vec![Duration::from_millis(1)],
        },
    ) {
        return Err(AppError::engine("Progress for another run must be dropped"));
    }
    if engine.report_setup_complete(&WorkerId::generate(), run_id) {
        return Err(AppError::engine("Non-participant report must be ignored"));
    }
    if !engine.report_setup_complete(&worker.id, run_id) {
        return Err(AppError::engine("Matching report should be accepted"));
    }
    if engine.phase_state() != Some(PhaseState::AwaitingExecuteComplete) {
        return Err(AppError::engine("Expected execute phase"));
    }
    Ok(())
}

#[test]
fn worker_limit_selects_lowest_ids() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut workers = connect_workers(&engine, 3);
    let mut request = echo_request(1, ExecutionBudget::Total(10));
    request.worker_limit = Some(2);
    engine.start_run(request)?;

    let received: Vec<bool> = workers
        .iter_mut()
        .map(|worker| !worker.drain().is_empty())
        .collect();
    if received != [true, true, false] {
        return Err(AppError::engine(format!(
            "Unexpected participants {:?}",
            received
        )));
    }
    let latest = engine
        .latest_result()
        .ok_or_else(|| AppError::engine("Expected live result"))?;
    if latest.summary.worker_count != 2 || latest.results.len() != 2 {
        return Err(AppError::engine("Live view should cover two workers"));
    }
    Ok(())
}

#[test]
fn disconnect_during_setup_lets_the_rest_continue() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut workers = connect_workers(&engine, 3);
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(30)))?;
    let leaving = workers
        .pop()
        .ok_or_else(|| AppError::engine("no workers"))?;
    for worker in &workers {
        engine.report_setup_complete(&worker.id, run_id);
    }
    if engine.phase_state() != Some(PhaseState::AwaitingSetupComplete) {
        return Err(AppError::engine("Still waiting for the third worker"));
    }
    engine.remove_connection(&leaving.id);
    if engine.phase_state() != Some(PhaseState::AwaitingExecuteComplete) {
        return Err(AppError::engine("Disconnect should complete setup"));
    }
    for worker in &mut workers {
        expect_command_names(worker, &["create_workload", "execute"])?;
        engine.report_execute_complete(&worker.id, run_id);
    }
    for worker in &workers {
        engine.report_teardown_complete(&worker.id, run_id);
    }

    let entry = engine
        .history_result(&run_id)
        .ok_or_else(|| AppError::engine("Missing history entry"))?;
    let left = entry
        .results
        .iter()
        .find(|result| result.worker_id == leaving.id)
        .ok_or_else(|| AppError::engine("Missing result of the leaving worker"))?;
    if left.status != ExecutionStatus::Failed {
        return Err(AppError::engine("Disconnected worker should be failed"));
    }
    Ok(())
}

#[test]
fn losing_every_worker_aborts_the_run() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let workers = connect_workers(&engine, 2);
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(10)))?;
    for worker in &workers {
        engine.report_setup_complete(&worker.id, run_id);
    }
    for worker in &workers {
        engine.remove_connection(&worker.id);
    }
    if engine.is_running() || engine.connected_count() != 0 {
        return Err(AppError::engine("Run should be finished with no workers"));
    }
    let completion = engine
        .history_result(&run_id)
        .and_then(|entry| entry.summary.totals.as_ref().map(|totals| totals.completion));
    if completion != Some(RunCompletion::Aborted) {
        return Err(AppError::engine(format!(
            "Expected aborted run, got {:?}",
            completion
        )));
    }
    Ok(())
}

#[test]
fn closed_link_counts_as_disconnect() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let id = WorkerId::generate();
    let (tx, rx) = mpsc::unbounded_channel();
    engine.add_connection(id, Arc::new(tx));
    engine.set_metadata(&id, echo_catalog(), BTreeMap::new());
    drop(rx);

    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(1)))?;
    if engine.is_running() {
        return Err(AppError::engine("Run with only closed links should abort"));
    }
    if engine.history_result(&run_id).is_none() {
        return Err(AppError::engine("Aborted run should be stored"));
    }
    if !engine.is_connected(&id) {
        return Err(AppError::engine("Registry membership follows the transport"));
    }
    Ok(())
}

#[test]
fn duplicate_connection_is_ignored_and_catalog_merges() -> AppResult<()> {
    let engine = ExecutionEngine::new(EngineOptions::default());
    let workers = connect_workers(&engine, 1);
    let worker = workers
        .first()
        .ok_or_else(|| AppError::engine("no workers"))?;
    let (tx, _rx) = mpsc::unbounded_channel();
    if engine.add_connection(worker.id, Arc::new(tx)) {
        return Err(AppError::engine("Duplicate id must be rejected"));
    }

    let other = WorkerId::generate();
    let (tx, _other_rx) = mpsc::unbounded_channel();
    engine.add_connection(other, Arc::new(tx));
    engine.set_metadata(
        &other,
        vec![WorkloadDescriptor::new("Echo"), WorkloadDescriptor::new("Http")],
        BTreeMap::from([("region".to_owned(), "eu".to_owned())]),
    );
    let catalog = engine.workload_catalog();
    let echo = catalog
        .iter()
        .find(|descriptor| descriptor.name == "Echo")
        .ok_or_else(|| AppError::engine("Missing Echo"))?;
    if catalog.len() != 2 || !echo.parameters.is_empty() {
        return Err(AppError::engine(
            "Most recently connected worker should win name collisions",
        ));
    }
    if engine.connected_count() != 2 || engine.workers().len() != 2 {
        return Err(AppError::engine("Expected two workers"));
    }
    Ok(())
}

#[test]
fn events_are_published_in_order() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let mut events = engine.subscribe();
    let workers = connect_workers(&engine, 1);
    let worker = workers
        .first()
        .ok_or_else(|| AppError::engine("no workers"))?;
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(1)))?;
    engine.report_setup_complete(&worker.id, run_id);
    engine.report_execute_complete(&worker.id, run_id);
    engine.report_teardown_complete(&worker.id, run_id);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let expected = vec![
        EngineEvent::WorkerConnected { worker_id: worker.id },
        EngineEvent::MetadataUpdated { worker_id: worker.id },
        EngineEvent::RunStarted {
            run_id,
            worker_count: 1,
        },
        EngineEvent::SetupCompleted { run_id },
        EngineEvent::ExecuteCompleted { run_id },
        EngineEvent::RunFinished {
            run_id,
            completion: RunCompletion::Completed,
        },
    ];
    if seen != expected {
        return Err(AppError::engine(format!("Unexpected events {:?}", seen)));
    }
    Ok(())
}

#[test]
fn waits_time_out_and_resolve() -> AppResult<()> {
    run_async_test(async {
        let engine = ExecutionEngine::default();
        match engine.wait_for_workers(1, Duration::from_millis(20)).await {
            Err(EngineError::Timeout { waiting_for, .. }) if waiting_for == "workers" => {}
            other => {
                return Err(AppError::engine(format!("Expected timeout, got {:?}", other)));
            }
        }

        let workers = connect_workers(&engine, 1);
        let worker = workers
            .first()
            .ok_or_else(|| AppError::engine("no workers"))?;
        if engine.wait_for_workers(1, Duration::from_millis(20)).await? != 1 {
            return Err(AppError::engine("Expected one worker"));
        }

        let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(1)))?;
        if engine.wait_for_idle(Duration::from_millis(20)).await.is_ok() {
            return Err(AppError::engine("Active run must block idle wait"));
        }
        engine.report_setup_complete(&worker.id, run_id);
        engine.report_execute_complete(&worker.id, run_id);
        engine.report_teardown_complete(&worker.id, run_id);
        let entry = engine.wait_for_run(run_id, Duration::from_millis(20)).await?;
        if entry.summary.run_id != run_id {
            return Err(AppError::engine("Wrong history entry"));
        }
        engine.wait_for_idle(Duration::from_millis(20)).await?;
        Ok(())
    })
}

/// Runs `report` on `copies` threads per worker and joins them all.
fn run_on_threads<F>(
    engine: &Arc<ExecutionEngine>,
    ids: &[WorkerId],
    copies: usize,
    report: F,
) -> AppResult<()>
where
    F: Fn(&ExecutionEngine, &WorkerId) + Send + Sync + 'static,
{
    let report = Arc::new(report);
    let handles: Vec<std::thread::JoinHandle<()>> = ids
        .iter()
        .flat_map(|id| std::iter::repeat_n(*id, copies))
        .map(|id| {
            let engine = Arc::clone(engine);
            let report = Arc::clone(&report);
            std::thread::spawn(move || report(&engine, &id))
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_err| AppError::engine("Reporter thread panicked"))?;
    }
    Ok(())
}

#[test]
fn concurrent_duplicate_reports_advance_each_phase_once() -> AppResult<()> {
    const WORKERS: usize = 16;
    const ROUNDS: usize = 10;
    let engine = Arc::new(ExecutionEngine::default());
    let mut workers = connect_workers(&engine, WORKERS);
    let ids: Vec<WorkerId> = workers.iter().map(|worker| worker.id).collect();

    for round in 0..ROUNDS {
        let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(64)))?;
        run_on_threads(&engine, &ids, 2, move |engine, id| {
            engine.report_setup_complete(id, run_id);
        })?;
        run_on_threads(&engine, &ids, 2, move |engine, id| {
            engine.report_progress_batch(
                id,
                run_id,
                &BatchedSamples {
                    slot: 0,
                    elapsed: vec![Duration::from_millis(1)],
                },
            );
            drop(engine.latest_result());
            engine.report_execute_complete(id, run_id);
        })?;
        run_on_threads(&engine, &ids, 2, move |engine, id| {
            engine.report_teardown_complete(id, run_id);
        })?;

        for worker in &mut workers {
            expect_command_names(worker, &["create_workload", "execute", "teardown"])?;
        }
        if engine.is_running() || engine.history_count() != round.saturating_add(1) {
            return Err(AppError::engine(format!("Round {} did not finish once", round)));
        }
        let totals = engine
            .history_result(&run_id)
            .and_then(|entry| entry.summary.totals.clone())
            .ok_or_else(|| AppError::engine("Missing totals"))?;
        if totals.completion != RunCompletion::Completed || totals.succeeded_sum != 32 {
            return Err(AppError::engine(format!(
                "Round {}: {:?} with {} succeeded",
                round, totals.completion, totals.succeeded_sum
            )));
        }
    }
    Ok(())
}

#[test]
fn concurrent_disconnects_and_reports_leave_survivors_consistent() -> AppResult<()> {
    const WORKERS: usize = 12;
    const LEAVING: usize = 6;
    const ROUNDS: usize = 10;
    for round in 0..ROUNDS {
        let engine = Arc::new(ExecutionEngine::default());
        let mut workers = connect_workers(&engine, WORKERS);
        let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(24)))?;
        let (leaving, staying) = workers.split_at_mut(LEAVING);
        let leaving_ids: Vec<WorkerId> = leaving.iter().map(|worker| worker.id).collect();
        let staying_ids: Vec<WorkerId> = staying.iter().map(|worker| worker.id).collect();

        let setup = {
            let engine = Arc::clone(&engine);
            let staying_ids = staying_ids.clone();
            std::thread::spawn(move || {
                run_on_threads(&engine, &staying_ids, 2, move |engine, id| {
                    engine.report_setup_complete(id, run_id);
                })
            })
        };
        run_on_threads(&engine, &leaving_ids, 1, |engine, id| {
            drop(engine.remove_connection(id));
        })?;
        setup
            .join()
            .map_err(|_err| AppError::engine("Setup thread panicked"))??;

        if engine.phase_state() != Some(PhaseState::AwaitingExecuteComplete) {
            return Err(AppError::engine(format!(
                "Round {}: setup should be complete, got {:?}",
                round,
                engine.phase_state()
            )));
        }
        run_on_threads(&engine, &staying_ids, 2, move |engine, id| {
            engine.report_execute_complete(id, run_id);
        })?;
        run_on_threads(&engine, &staying_ids, 2, move |engine, id| {
            engine.report_teardown_complete(id, run_id);
        })?;

        for worker in staying.iter_mut() {
            expect_command_names(worker, &["create_workload", "execute", "teardown"])?;
        }
        for worker in leaving.iter_mut() {
            let names: Vec<&str> = worker.drain().iter().map(WorkerCommand::name).collect();
            if names != ["create_workload"] && names != ["create_workload", "execute"] {
                return Err(AppError::engine(format!(
                    "Round {}: leaving worker got {:?}",
                    round, names
                )));
            }
        }

        let entry = engine
            .history_result(&run_id)
            .ok_or_else(|| AppError::engine("Missing history entry"))?;
        let completion = entry.summary.totals.as_ref().map(|totals| totals.completion);
        if completion != Some(RunCompletion::Completed)
            || engine.connected_count() != staying_ids.len()
        {
            return Err(AppError::engine(format!(
                "Round {}: unexpected completion {:?}",
                round, completion
            )));
        }
        let failed = entry
            .results
            .iter()
            .filter(|result| result.status == ExecutionStatus::Failed)
            .count();
        if failed != leaving_ids.len() {
            return Err(AppError::engine(format!(
                "Round {}: expected {} failed workers, got {}",
                round,
                leaving_ids.len(),
                failed
            )));
        }
    }
    Ok(())
}

#[test]
fn latest_result_reports_live_progress_of_the_active_run() -> AppResult<()> {
    let engine = ExecutionEngine::default();
    let workers = connect_workers(&engine, 2);
    let run_id = engine.start_run(echo_request(1, ExecutionBudget::Total(10)))?;
    for worker in &workers {
        engine.report_setup_complete(&worker.id, run_id);
        engine.report_progress_batch(
            &worker.id,
            run_id,
            &BatchedSamples {
                slot: 0,
                elapsed: vec![Duration::from_millis(4); 3],
            },
        );
    }

    let live = engine
        .latest_result()
        .ok_or_else(|| AppError::engine("Expected a live result"))?;
    if live.summary.run_id != run_id || live.summary.totals.is_some() {
        return Err(AppError::engine("Live view must belong to the unfinished run"));
    }
    let succeeded: u64 = live.results.iter().map(|result| result.succeeded).sum();
    if live.results.len() != 2 || succeeded != 6 {
        return Err(AppError::engine(format!(
            "Unexpected live results: {} workers, {} succeeded",
            live.results.len(),
            succeeded
        )));
    }
    if live
        .results
        .iter()
        .any(|result| result.status != ExecutionStatus::Running || result.percentiles.is_none())
    {
        return Err(AppError::engine("Live results should be running with percentiles"));
    }
    if engine.history_count() != 0 {
        return Err(AppError::engine("Live view must not be stored in history"));
    }
    Ok(())
}
