//! Network layer: the controller's worker transport and control plane,
//! the worker agent, and the wire protocol between them.
mod controller;
mod protocol;
mod worker;

pub use controller::{
    AutoRunSettings, ControllerHandle, ControllerSettings, run_controller, start_controller,
};
pub use worker::{WorkerSettings, run_worker, run_worker_with};
