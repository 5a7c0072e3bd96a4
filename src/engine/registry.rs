use std::collections::BTreeMap;

use serde::Serialize;

use crate::workload::WorkloadDescriptor;

use super::ids::WorkerId;
use super::link::SharedLink;

/// Connected worker as held by the registry.
#[derive(Clone)]
pub struct WorkerConnection {
    pub worker_id: WorkerId,
    pub link: SharedLink,
    pub catalog: Vec<WorkloadDescriptor>,
    pub metadata: BTreeMap<String, String>,
    pub connected_at_ms: u64,
    sequence: u64,
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkerConnection")
            .field("worker_id", &self.worker_id)
            .field("catalog", &self.catalog)
            .field("metadata", &self.metadata)
            .field("connected_at_ms", &self.connected_at_ms)
            .finish_non_exhaustive()
    }
}

/// Link-free view of a connected worker for the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub connected_at_ms: u64,
    pub metadata: BTreeMap<String, String>,
    pub workloads: Vec<String>,
}

impl From<&WorkerConnection> for WorkerInfo {
    fn from(connection: &WorkerConnection) -> Self {
        Self {
            worker_id: connection.worker_id,
            connected_at_ms: connection.connected_at_ms,
            metadata: connection.metadata.clone(),
            workloads: connection
                .catalog
                .iter()
                .map(|descriptor| descriptor.name.clone())
                .collect(),
        }
    }
}

/// Set of connected workers keyed by id. Not synchronized on its own; the
/// engine keeps it behind its lock.
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerConnection>,
    next_sequence: u64,
}

impl WorkerRegistry {
    pub(crate) fn add(
        &mut self,
        worker_id: WorkerId,
        link: SharedLink,
        connected_at_ms: u64,
    ) -> bool {
        if self.workers.contains_key(&worker_id) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.workers.insert(
            worker_id,
            WorkerConnection {
                worker_id,
                link,
                catalog: Vec::new(),
                metadata: BTreeMap::new(),
                connected_at_ms,
                sequence,
            },
        );
        true
    }

    pub(crate) fn remove(&mut self, worker_id: &WorkerId) -> Option<WorkerConnection> {
        self.workers.remove(worker_id)
    }

    pub(crate) fn set_metadata(
        &mut self,
        worker_id: &WorkerId,
        catalog: Vec<WorkloadDescriptor>,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(connection) => {
                connection.catalog = catalog;
                connection.metadata = metadata;
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerConnection> {
        self.workers.values().cloned().collect()
    }

    pub(crate) fn infos(&self) -> Vec<WorkerInfo> {
        self.workers.values().map(WorkerInfo::from).collect()
    }

    /// Merged catalog; on name collisions the most recently connected
    /// worker's descriptor wins.
    pub(crate) fn workload_catalog(&self) -> BTreeMap<String, WorkloadDescriptor> {
        let mut by_age: Vec<&WorkerConnection> = self.workers.values().collect();
        by_age.sort_by_key(|connection| connection.sequence);
        let mut merged = BTreeMap::new();
        for connection in by_age {
            for descriptor in &connection.catalog {
                merged.insert(descriptor.name.clone(), descriptor.clone());
            }
        }
        merged
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn contains(&self, worker_id: &WorkerId) -> bool {
        self.workers.contains_key(worker_id)
    }
}
