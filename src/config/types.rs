use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::args::ControllerMode;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub verbose: Option<bool>,
    pub no_color: Option<bool>,
    pub controller: Option<ControllerConfig>,
    pub run: Option<RunConfig>,
    pub worker: Option<WorkerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    pub listen: Option<String>,
    pub mode: Option<ControllerMode>,
    pub control_listen: Option<String>,
    pub min_workers: Option<usize>,
    pub worker_wait_timeout_ms: Option<u64>,
    pub run_timeout_ms: Option<u64>,
    pub hello_timeout_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub reservoir_capacity: Option<usize>,
}

/// The run started by an auto-mode controller.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub workload: Option<String>,
    pub concurrency: Option<u32>,
    pub total: Option<u64>,
    pub worker_limit: Option<usize>,
    pub duration: Option<DurationValue>,
    pub parameters: Option<BTreeMap<String, ParameterValue>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub join: Option<String>,
    pub id: Option<String>,
    pub standby: Option<bool>,
    pub reconnect_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// A duration given either as whole seconds or as text such as `"500ms"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

/// Workload parameters travel as strings; config files may use bare scalars.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(value) => write!(f, "{value}"),
            ParameterValue::Integer(value) => write!(f, "{value}"),
            ParameterValue::Text(value) => f.write_str(value),
        }
    }
}
