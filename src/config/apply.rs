use std::time::Duration;

use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::parsers::parse_duration_arg;
use crate::args::{FleetArgs, PositiveU64, PositiveUsize};
use crate::engine::WorkerId;
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

use super::types::{ConfigFile, ControllerConfig, DurationValue, RunConfig, WorkerConfig};

/// Applies configuration values to CLI arguments.
///
/// Values given on the command line always win over the file.
///
/// # Errors
///
/// Returns an error when config values are invalid or conflict with each other.
pub fn apply_config(
    args: &mut FleetArgs,
    matches: &ArgMatches,
    config: &ConfigFile,
) -> AppResult<()> {
    if !is_cli(matches, "verbose")
        && let Some(verbose) = config.verbose
    {
        args.verbose = verbose;
    }
    if !is_cli(matches, "no_color")
        && let Some(no_color) = config.no_color
    {
        args.no_color = no_color;
    }

    let listen_from_file = !is_cli(matches, "controller_listen")
        && config
            .controller
            .as_ref()
            .is_some_and(|controller| controller.listen.is_some());
    let join_from_file = !is_cli(matches, "worker_join")
        && config
            .worker
            .as_ref()
            .is_some_and(|worker| worker.join.is_some());
    if listen_from_file && join_from_file {
        return Err(AppError::config(ConfigError::Conflict {
            left: "controller.listen",
            right: "worker.join",
        }));
    }

    if let Some(controller) = config.controller.as_ref() {
        apply_controller_config(args, matches, controller)?;
    }
    if let Some(run) = config.run.as_ref() {
        apply_run_config(args, matches, run)?;
    }
    if let Some(worker) = config.worker.as_ref() {
        apply_worker_config(args, matches, worker)?;
    }
    Ok(())
}

fn apply_controller_config(
    args: &mut FleetArgs,
    matches: &ArgMatches,
    config: &ControllerConfig,
) -> AppResult<()> {
    if !is_cli(matches, "controller_listen")
        && let Some(listen) = config.listen.clone()
    {
        args.controller_listen = Some(listen);
    }
    if !is_cli(matches, "controller_mode")
        && let Some(mode) = config.mode
    {
        args.controller_mode = mode;
    }
    if !is_cli(matches, "control_listen")
        && let Some(listen) = config.control_listen.clone()
    {
        args.control_listen = Some(listen);
    }
    if !is_cli(matches, "min_workers")
        && let Some(value) = config.min_workers
    {
        args.min_workers = ensure_positive_usize(value, "controller.min_workers")?;
    }
    if !is_cli(matches, "worker_wait_timeout_ms")
        && let Some(value) = config.worker_wait_timeout_ms
    {
        args.worker_wait_timeout_ms =
            ensure_positive_u64(value, "controller.worker_wait_timeout_ms")?;
    }
    if !is_cli(matches, "run_timeout_ms")
        && let Some(value) = config.run_timeout_ms
    {
        args.run_timeout_ms = ensure_positive_u64(value, "controller.run_timeout_ms")?;
    }
    if !is_cli(matches, "hello_timeout_ms")
        && let Some(value) = config.hello_timeout_ms
    {
        args.hello_timeout_ms = ensure_positive_u64(value, "controller.hello_timeout_ms")?;
    }
    if !is_cli(matches, "heartbeat_timeout_ms")
        && let Some(value) = config.heartbeat_timeout_ms
    {
        args.heartbeat_timeout_ms = ensure_positive_u64(value, "controller.heartbeat_timeout_ms")?;
    }
    if !is_cli(matches, "reservoir_capacity")
        && let Some(value) = config.reservoir_capacity
    {
        args.reservoir_capacity = ensure_positive_usize(value, "controller.reservoir_capacity")?;
    }
    Ok(())
}

fn apply_run_config(args: &mut FleetArgs, matches: &ArgMatches, config: &RunConfig) -> AppResult<()> {
    if !is_cli(matches, "workload")
        && let Some(workload) = config.workload.clone()
    {
        args.workload = Some(workload);
    }
    if !is_cli(matches, "concurrency")
        && let Some(concurrency) = config.concurrency
    {
        if concurrency == 0 {
            return Err(AppError::config(ConfigError::FieldMustBePositive {
                field: "run.concurrency",
                source: ValidationError::ValueTooSmall { min: 1 },
            }));
        }
        args.concurrency = concurrency;
    }
    if !is_cli(matches, "total")
        && let Some(total) = config.total
    {
        args.total = Some(ensure_positive_u64(total, "run.total")?);
    }
    if !is_cli(matches, "worker_limit")
        && let Some(limit) = config.worker_limit
    {
        args.worker_limit = Some(ensure_positive_usize(limit, "run.worker_limit")?);
    }
    if !is_cli(matches, "duration")
        && let Some(duration) = config.duration.as_ref()
    {
        args.duration = Some(to_duration(duration, "run.duration")?);
    }
    if !is_cli(matches, "params")
        && let Some(parameters) = config.parameters.as_ref()
    {
        args.params = parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();
    }
    Ok(())
}

fn apply_worker_config(
    args: &mut FleetArgs,
    matches: &ArgMatches,
    config: &WorkerConfig,
) -> AppResult<()> {
    if !is_cli(matches, "worker_join")
        && let Some(join) = config.join.clone()
    {
        args.worker_join = Some(join);
    }
    if !is_cli(matches, "worker_id")
        && let Some(id) = config.id.as_deref()
    {
        let worker_id = id.trim().parse::<WorkerId>().map_err(|err| {
            AppError::config(ConfigError::InvalidField {
                field: "worker.id",
                source: ValidationError::InvalidWorkerId {
                    value: id.to_owned(),
                    source: err,
                },
            })
        })?;
        args.worker_id = Some(worker_id);
    }
    if !is_cli(matches, "standby")
        && let Some(standby) = config.standby
    {
        args.standby = standby;
    }
    if !is_cli(matches, "reconnect_ms")
        && let Some(value) = config.reconnect_ms
    {
        args.reconnect_ms = ensure_positive_u64(value, "worker.reconnect_ms")?;
    }
    if !is_cli(matches, "heartbeat_interval_ms")
        && let Some(value) = config.heartbeat_interval_ms
    {
        args.heartbeat_interval_ms = ensure_positive_u64(value, "worker.heartbeat_interval_ms")?;
    }
    if !is_cli(matches, "batch_size")
        && let Some(value) = config.batch_size
    {
        args.batch_size = ensure_positive_usize(value, "worker.batch_size")?;
    }
    if !is_cli(matches, "meta")
        && let Some(metadata) = config.metadata.as_ref()
    {
        args.meta = metadata
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
    }
    Ok(())
}

fn is_cli(matches: &ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(ValueSource::CommandLine)
}

fn to_duration(value: &DurationValue, field: &'static str) -> AppResult<Duration> {
    let parsed = match value {
        DurationValue::Seconds(secs) => parse_duration_arg(&secs.to_string()),
        DurationValue::Text(text) => parse_duration_arg(text),
    };
    parsed.map_err(|_err| {
        let value = match value {
            DurationValue::Seconds(secs) => secs.to_string(),
            DurationValue::Text(text) => text.clone(),
        };
        AppError::config(ConfigError::InvalidDuration { field, value })
    })
}

fn ensure_positive_u64(value: u64, field: &'static str) -> AppResult<PositiveU64> {
    PositiveU64::try_from(value)
        .map_err(|err| AppError::config(ConfigError::FieldMustBePositive { field, source: err }))
}

fn ensure_positive_usize(value: usize, field: &'static str) -> AppResult<PositiveUsize> {
    PositiveUsize::try_from(value)
        .map_err(|err| AppError::config(ConfigError::FieldMustBePositive { field, source: err }))
}
