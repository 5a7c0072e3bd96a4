use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{RunId, WorkerId};
use crate::error::WorkloadError;

use super::catalog::{WorkloadDescriptor, WorkloadParameters};

/// Context handed to every workload call on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadContext {
    pub worker_id: WorkerId,
    pub run_id: RunId,
    pub slot: u32,
}

/// One workload instance; a worker creates one per concurrency slot.
#[async_trait]
pub trait Workload: Send {
    /// # Errors
    ///
    /// Returns an error when the instance cannot be prepared.
    async fn setup(&mut self, _context: &WorkloadContext) -> Result<(), WorkloadError> {
        Ok(())
    }

    /// Runs one unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error when this execution failed; the failure is reported
    /// as an error sample and the slot keeps going.
    async fn execute(&mut self, context: &WorkloadContext) -> Result<(), WorkloadError>;

    /// # Errors
    ///
    /// Returns an error when the instance cannot release its resources.
    async fn teardown(&mut self, _context: &WorkloadContext) -> Result<(), WorkloadError> {
        Ok(())
    }
}

pub type WorkloadFactory =
    Arc<dyn Fn(&WorkloadParameters) -> Result<Box<dyn Workload>, WorkloadError> + Send + Sync>;

#[derive(Clone)]
struct RegisteredWorkload {
    descriptor: WorkloadDescriptor,
    factory: WorkloadFactory,
}

/// Name -> (schema, factory) table populated by explicit registration.
#[derive(Clone, Default)]
pub struct WorkloadRegistry {
    entries: BTreeMap<String, RegisteredWorkload>,
}

impl std::fmt::Debug for WorkloadRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkloadRegistry")
            .field("workloads", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkloadRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry pre-populated with the `echo` and `http` workloads.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in name collides, which only happens when
    /// the built-in table itself is inconsistent.
    pub fn with_builtins() -> Result<Self, WorkloadError> {
        let mut registry = Self::new();
        super::builtins::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// # Errors
    ///
    /// Returns [`WorkloadError::DuplicateWorkload`] when the name is taken.
    pub fn register<F>(
        &mut self,
        descriptor: WorkloadDescriptor,
        factory: F,
    ) -> Result<(), WorkloadError>
    where
        F: Fn(&WorkloadParameters) -> Result<Box<dyn Workload>, WorkloadError>
            + Send
            + Sync
            + 'static,
    {
        if self.entries.contains_key(&descriptor.name) {
            return Err(WorkloadError::DuplicateWorkload {
                name: descriptor.name,
            });
        }
        self.entries.insert(
            descriptor.name.clone(),
            RegisteredWorkload {
                descriptor,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> Vec<WorkloadDescriptor> {
        self.entries
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&WorkloadDescriptor> {
        self.entries.get(name).map(|entry| &entry.descriptor)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves `parameters` against the schema and builds one instance.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown workloads, invalid parameters or a
    /// failing factory.
    pub fn create(
        &self,
        name: &str,
        parameters: &WorkloadParameters,
    ) -> Result<Box<dyn Workload>, WorkloadError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| WorkloadError::UnknownWorkload {
                name: name.to_owned(),
            })?;
        let resolved = entry.descriptor.resolve(parameters)?;
        (entry.factory)(&resolved)
    }
}
