mod execution;

use std::future::Future;

use crate::error::{AppError, AppResult};

use super::WorkerId;

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::engine(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

/// `count` worker ids in ascending order.
fn sorted_ids(count: usize) -> Vec<WorkerId> {
    let mut ids: Vec<WorkerId> = (0..count).map(|_| WorkerId::generate()).collect();
    ids.sort_unstable();
    ids
}
