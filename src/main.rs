mod args;
mod config;
mod distributed;
mod engine;
mod entry;
mod error;
mod logger;
mod shutdown;
mod workload;

use error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
