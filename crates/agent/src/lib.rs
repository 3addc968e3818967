//! `burnin-agent` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod backend;
pub mod commands;
pub mod config;
pub mod io_bench;
pub mod kernel;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod transfer;
pub mod worker;
