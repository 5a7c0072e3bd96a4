use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::{RunId, WorkerId};
use crate::workload::{WorkloadDescriptor, WorkloadParameters};

/// Every message on the controller/worker link, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(in crate::distributed) enum WireMessage {
    // worker -> controller
    Hello(HelloMessage),
    Metadata(MetadataMessage),
    SetupComplete(RunMessage),
    Progress(ProgressMessage),
    ProgressBatch(ProgressBatchMessage),
    ExecuteComplete(RunMessage),
    TeardownComplete(RunMessage),
    Heartbeat(HeartbeatMessage),
    // controller -> worker
    CreateWorkload(CreateWorkloadMessage),
    Execute(ExecuteMessage),
    Stop(RunMessage),
    Teardown(RunMessage),
    // both directions
    Error(ErrorMessage),
}

impl WireMessage {
    pub(in crate::distributed) const fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::Metadata(_) => "metadata",
            WireMessage::SetupComplete(_) => "setup_complete",
            WireMessage::Progress(_) => "progress",
            WireMessage::ProgressBatch(_) => "progress_batch",
            WireMessage::ExecuteComplete(_) => "execute_complete",
            WireMessage::TeardownComplete(_) => "teardown_complete",
            WireMessage::Heartbeat(_) => "heartbeat",
            WireMessage::CreateWorkload(_) => "create_workload",
            WireMessage::Execute(_) => "execute",
            WireMessage::Stop(_) => "stop",
            WireMessage::Teardown(_) => "teardown",
            WireMessage::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct HelloMessage {
    pub(in crate::distributed) worker_id: WorkerId,
    pub(in crate::distributed) hostname: String,
    #[serde(default)]
    pub(in crate::distributed) workloads: Vec<WorkloadDescriptor>,
    #[serde(default)]
    pub(in crate::distributed) metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct MetadataMessage {
    #[serde(default)]
    pub(in crate::distributed) workloads: Vec<WorkloadDescriptor>,
    #[serde(default)]
    pub(in crate::distributed) metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct RunMessage {
    pub(in crate::distributed) run_id: RunId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct HeartbeatMessage {
    pub(in crate::distributed) sent_at_ms: u64,
}

/// One execution; `elapsed_ticks` counts 100 ns units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct WireSample {
    pub(in crate::distributed) slot: u32,
    pub(in crate::distributed) elapsed_ticks: u64,
    pub(in crate::distributed) sequence: u64,
    pub(in crate::distributed) has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(in crate::distributed) error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct WireBatch {
    pub(in crate::distributed) slot: u32,
    pub(in crate::distributed) elapsed_ticks: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct ProgressMessage {
    pub(in crate::distributed) run_id: RunId,
    pub(in crate::distributed) sample: WireSample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct ProgressBatchMessage {
    pub(in crate::distributed) run_id: RunId,
    pub(in crate::distributed) batch: WireBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct CreateWorkloadMessage {
    pub(in crate::distributed) run_id: RunId,
    pub(in crate::distributed) concurrency: u32,
    pub(in crate::distributed) workload: String,
    #[serde(default)]
    pub(in crate::distributed) parameters: WorkloadParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct ExecuteMessage {
    pub(in crate::distributed) run_id: RunId,
    pub(in crate::distributed) execute_counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(in crate::distributed) struct ErrorMessage {
    pub(in crate::distributed) message: String,
}
