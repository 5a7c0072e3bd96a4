//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;


pub use cli::FleetArgs;
pub use types::{ControllerMode, PositiveU64, PositiveUsize};
