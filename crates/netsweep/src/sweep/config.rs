//! Immutable per-run configuration.
//!
//! Built once from the CLI and passed by reference to every component. There
//! is no mutable global settings object; anything derived (job descriptors,
//! engine options) is computed from this struct on demand.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use crate::common::cli::RootOptions;
use crate::sweep::descriptor::model_file_name;
use crate::sweep::solver::SolverFamily;

/// Top-level directory holding every run's output.
pub const DEFAULT_OUTPUT_ROOT: &str = "./NetworkResults";
/// Shared directory solver scratch files are harvested into after a run.
pub const SOLUTION_DATA_DIR: &str = "SolutionData";
/// Directory holding the AMPL model files.
pub const DEFAULT_MODELS_DIR: &str = "./Files/Models";
/// Session names start with this followed by the orchestrator pid.
pub const SESSION_PREFIX_BASE: &str = "NS_";

/// Every sleep/poll interval of the orchestration loops. Production uses the
/// defaults; tests shrink them to zero so nothing actually waits.
#[derive(Debug, Clone)]
pub struct Intervals {
    /// Pause between consecutive launches (debounce against launch spikes).
    pub launch_debounce: Duration,
    /// Poll interval while waiting for a launch's liveness token.
    pub liveness_poll: Duration,
    /// How many liveness polls before a launch counts as failed.
    pub liveness_attempts: u32,
    /// Pause between blocking monitor passes.
    pub monitor_poll: Duration,
    /// Pause after delivering a graceful-stop signal; process-tree lookups on
    /// a session mid-teardown are not idempotent.
    pub signal_settle: Duration,
    /// Tick of the global-budget wait loop.
    pub budget_tick: Duration,
    /// One increment of the extra-time grant.
    pub extra_time_step: Duration,
    /// Cap on the total extra time granted to the first batch.
    pub extra_time_cap: Duration,
    /// Grace period before aborting on an all-dead first batch, letting
    /// backends flush partial error output.
    pub launch_error_grace: Duration,
    /// Poll interval while waiting for interrupted sessions to truly exit.
    pub straggler_poll: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Intervals {
            launch_debounce: Duration::from_millis(200),
            liveness_poll: Duration::from_secs(1),
            liveness_attempts: 60,
            monitor_poll: Duration::from_secs(2),
            signal_settle: Duration::from_secs(2),
            budget_tick: Duration::from_secs(5),
            extra_time_step: Duration::from_secs(30),
            extra_time_cap: Duration::from_secs(300),
            launch_error_grace: Duration::from_secs(20),
            straggler_poll: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_file: PathBuf,
    pub data_file_hash: String,
    /// User-supplied disambiguator appended to the run directory name.
    pub run_tag: String,
    /// Unique per-invocation session prefix, e.g. `NS_12345_`.
    pub session_prefix: String,
    /// Per-job wall-clock limit and global budget. Zero disables timeout
    /// enforcement entirely.
    pub time_limit: Duration,
    pub threads_per_solver: u32,
    pub max_parallel: usize,
    /// Canonical (solver, model-file) expansion input, in CLI order.
    pub combinations: Vec<(SolverFamily, String)>,
    pub models_dir: PathBuf,
    pub output_root: PathBuf,
    pub solution_data_dir: PathBuf,
    /// Per-network run directory: `<output-root>/<data-hash><run-tag>`.
    pub run_dir: PathBuf,
    pub intervals: Intervals,
}

impl RunConfig {
    pub fn from_options(opts: &RootOptions) -> anyhow::Result<RunConfig> {
        anyhow::ensure!(
            opts.path.exists(),
            "Cannot access '{}': No such file or directory",
            opts.path.display()
        );
        let data_file_hash = hash_file(&opts.path)?;

        let mut combinations = Vec::new();
        for entry in &opts.solver_models {
            for model_id in &entry.models {
                let model = model_file_name(*model_id)
                    .ok_or_else(|| anyhow::anyhow!("unknown model number {model_id}"))?;
                combinations.push((entry.solver, model.to_string()));
            }
        }

        let max_parallel = match opts.jobs {
            0 => combinations.len(),
            -1 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n as usize,
        };
        if max_parallel < combinations.len() {
            log::warn!(
                "Only {max_parallel} of {} combinations will run in parallel; \
                 the sweep may take longer than one time limit",
                combinations.len()
            );
        }

        let output_root = PathBuf::from(DEFAULT_OUTPUT_ROOT);
        let solution_data_dir = output_root.join(SOLUTION_DATA_DIR);
        let run_dir = output_root.join(format!("{data_file_hash}{}", opts.prefix));

        Ok(RunConfig {
            data_file: opts.path.clone(),
            data_file_hash,
            run_tag: opts.prefix.clone(),
            session_prefix: format!("{}{}_", SESSION_PREFIX_BASE, std::process::id()),
            time_limit: opts.time,
            threads_per_solver: opts.threads_per_solver_instance,
            max_parallel,
            combinations,
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            output_root,
            solution_data_dir,
            run_dir,
            intervals: Intervals::default(),
        })
    }

    pub fn timeout_enforced(&self) -> bool {
        !self.time_limit.is_zero()
    }
}

/// SHA-256 of the data file, hex encoded. Streams the file in 8 KiB chunks.
pub fn hash_file(path: &Path) -> anyhow::Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open '{}' for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
