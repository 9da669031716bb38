//! Orchestration of one solver sweep.
//!
//! A sweep takes a single network data file and a list of (solver, model)
//! combinations, runs each combination as an isolated background session with
//! a wall-clock budget, and aggregates the per-combination outcomes into one
//! best result. The flow is strictly single-threaded: one control loop admits
//! jobs in batches, polls their sessions, interrupts overruns gracefully and
//! finally writes the run's report files.

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod descriptor;
pub mod monitor;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod solver;
pub mod state;

pub type SweepResult<T> = anyhow::Result<T>;
