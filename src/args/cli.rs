use clap::Parser;
use std::time::Duration;

use super::parsers::{
    parse_bool_env, parse_duration_arg, parse_key_value, parse_positive_u64,
    parse_positive_usize, parse_worker_id,
};
use super::types::{ControllerMode, PositiveU64, PositiveUsize};
use crate::engine::WorkerId;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "fleetload",
    version,
    about = "Distributed load testing: one controller drives a fleet of workers."
)]
pub struct FleetArgs {
    /// Listen address for workers; runs this process as the controller (e.g. 0.0.0.0:7300)
    #[arg(long = "controller-listen")]
    pub controller_listen: Option<String>,

    /// Controller mode (manual or auto)
    #[arg(long = "controller-mode", default_value = "manual", value_enum)]
    pub controller_mode: ControllerMode,

    /// Listen address for the HTTP control plane (manual mode)
    #[arg(long = "control-listen")]
    pub control_listen: Option<String>,

    /// Controller address to join; runs this process as a worker (e.g. 10.0.0.5:7300)
    #[arg(long = "worker-join")]
    pub worker_join: Option<String>,

    /// Workload to run in auto mode
    #[arg(long = "workload", short = 'w')]
    pub workload: Option<String>,

    /// Workload parameter as key=value (repeatable)
    #[arg(long = "param", short = 'P', value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Workload instances per worker
    #[arg(long = "concurrency", short = 'c', default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// Total executions across the fleet (omit for a run that lasts until cancelled)
    #[arg(long = "total", short = 'n', value_parser = parse_positive_u64)]
    pub total: Option<PositiveU64>,

    /// Maximum number of workers taking part in a run
    #[arg(long = "worker-limit", value_parser = parse_positive_usize)]
    pub worker_limit: Option<PositiveUsize>,

    /// Cancel the auto-mode run after this long (e.g. 500ms, 30s, 5m, 1h)
    #[arg(long = "duration", short = 'd', value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Minimum connected workers before the auto-mode run starts
    #[arg(long = "min-workers", default_value = "1", value_parser = parse_positive_usize)]
    pub min_workers: PositiveUsize,

    /// Max time to wait for --min-workers (milliseconds)
    #[arg(long = "worker-wait-timeout-ms", default_value = "30000", value_parser = parse_positive_u64)]
    pub worker_wait_timeout_ms: PositiveU64,

    /// Max time to wait for the auto-mode run to finish (milliseconds)
    #[arg(long = "run-timeout-ms", default_value = "3600000", value_parser = parse_positive_u64)]
    pub run_timeout_ms: PositiveU64,

    /// Latency samples kept per worker for percentiles
    #[arg(long = "reservoir-capacity", default_value = "100000", value_parser = parse_positive_usize)]
    pub reservoir_capacity: PositiveUsize,

    /// Max time to wait for a worker hello after it connects (milliseconds)
    #[arg(long = "hello-timeout-ms", default_value = "10000", value_parser = parse_positive_u64)]
    pub hello_timeout_ms: PositiveU64,

    /// Drop a worker after this long without any message (milliseconds)
    #[arg(long = "heartbeat-timeout-ms", default_value = "30000", value_parser = parse_positive_u64)]
    pub heartbeat_timeout_ms: PositiveU64,

    /// Heartbeat interval for workers (milliseconds)
    #[arg(long = "heartbeat-interval-ms", default_value = "1000", value_parser = parse_positive_u64)]
    pub heartbeat_interval_ms: PositiveU64,

    /// Explicit worker id (uuid, optional)
    #[arg(long = "worker-id", value_parser = parse_worker_id)]
    pub worker_id: Option<WorkerId>,

    /// Worker metadata tag as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_key_value)]
    pub meta: Vec<(String, String)>,

    /// Successful samples per progress batch (1 sends every sample on its own)
    #[arg(long = "batch-size", default_value = "100", value_parser = parse_positive_usize)]
    pub batch_size: PositiveUsize,

    /// Keep the worker around and reconnect when the session ends
    #[arg(long = "standby")]
    pub standby: bool,

    /// Reconnect interval for standby workers (milliseconds)
    #[arg(long = "reconnect-ms", default_value = "1000", value_parser = parse_positive_u64)]
    pub reconnect_ms: PositiveU64,

    /// Config file path (TOML or JSON); defaults to fleetload.toml or fleetload.json
    #[arg(long = "config")]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Disable color output
    #[arg(long = "no-color", env = "NO_COLOR", value_parser = parse_bool_env)]
    pub no_color: bool,
}
