//! `burnin-core` -- pure domain logic for the GPU burn-in harness.
//!
//! Nothing in this crate touches a device, a process or the filesystem.
//! The agent crate feeds it telemetry text, step timings and worker
//! outcomes; this crate turns them into peaks, throughput, verdicts and
//! report text so all of it can be tested in isolation.

pub mod device;
pub mod error;
pub mod outcome;
pub mod report;
pub mod telemetry;
pub mod threshold_validation;
pub mod transfer;
pub mod verdict;
pub mod workload;
