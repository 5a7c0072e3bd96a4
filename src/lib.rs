//! Core library for the `fleetload` CLI.
//!
//! A controller coordinates a fleet of workers over TCP: it plans how many
//! executions each worker slot runs, drives every run through setup,
//! execute and teardown, and aggregates the latency samples the workers
//! stream back. The binary is the primary interface; the library exposes
//! the same pieces for embedding and integration tests.
pub mod args;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod logger;
pub mod shutdown;
pub mod workload;
