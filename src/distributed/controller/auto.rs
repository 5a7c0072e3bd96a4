use std::sync::Arc;

use tracing::info;

use crate::engine::{ExecutionEngine, HistoryEntry, RunCompletion};
use crate::error::{AppError, AppResult, DistributedError};

use super::AutoRunSettings;
use super::output::print_summary;

/// Waits for the fleet, runs once, prints the summary.
///
/// An aborted run is an error so the process exits non-zero.
pub(super) async fn run_auto(
    engine: &Arc<ExecutionEngine>,
    settings: &AutoRunSettings,
) -> AppResult<()> {
    let entry = execute_auto_run(engine, settings).await?;
    print_summary(&entry);
    match entry.summary.totals.as_ref().map(|totals| totals.completion) {
        Some(RunCompletion::Completed | RunCompletion::Cancelled) => Ok(()),
        Some(RunCompletion::Aborted) | None => {
            Err(AppError::distributed(DistributedError::RunNotCompleted {
                run_id: entry.summary.run_id.to_string(),
                completion: entry
                    .summary
                    .totals
                    .as_ref()
                    .map_or_else(|| "unfinished".to_owned(), |totals| totals.completion.to_string()),
            }))
        }
    }
}

pub(super) async fn execute_auto_run(
    engine: &Arc<ExecutionEngine>,
    settings: &AutoRunSettings,
) -> AppResult<Arc<HistoryEntry>> {
    info!(
        "Waiting for {} worker(s) (timeout {}ms)",
        settings.min_workers,
        settings.worker_wait_timeout.as_millis()
    );
    let connected = engine
        .wait_for_workers(settings.min_workers, settings.worker_wait_timeout)
        .await?;
    info!("{} worker(s) connected; starting run", connected);

    let run_id = engine.start_run(settings.request.clone())?;
    let timer = settings.duration.map(|duration| {
        let engine = Arc::clone(engine);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if engine.cancel_run(run_id) {
                info!("Run {} reached its duration", run_id);
            }
        })
    });

    let waited = engine.wait_for_run(run_id, settings.run_timeout).await;
    if let Some(timer) = timer {
        timer.abort();
    }
    match waited {
        Ok(entry) => Ok(entry),
        Err(err) => {
            engine.cancel_run(run_id);
            Err(AppError::engine(err))
        }
    }
}
