//! Workload catalog, parameter schemas and the explicit workload registry.
//!
//! Workers declare the workloads they can run as a list of
//! [`WorkloadDescriptor`]s. The controller validates start requests against
//! that catalog; the worker instantiates workloads through a
//! [`WorkloadRegistry`] populated by explicit `register` calls.
mod builtins;
mod catalog;
mod registry;

#[cfg(test)]
mod tests;

pub use builtins::{ECHO_WORKLOAD, HTTP_WORKLOAD, register_builtins};
pub use catalog::{
    ParameterKind, ParameterSpec, WorkloadDescriptor, WorkloadParameters, parameter_bool,
    parameter_u64,
};
pub use registry::{Workload, WorkloadContext, WorkloadFactory, WorkloadRegistry};
