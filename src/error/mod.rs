mod app;
mod config;
mod distributed;
mod engine;
mod validation;
mod workload;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use distributed::DistributedError;
pub use engine::EngineError;
pub use validation::ValidationError;
pub use workload::WorkloadError;
