//! Run report files.
//!
//! Every run directory carries a small set of `0_`-prefixed files consumed by
//! the calling pipeline: a status file advancing `running` to exactly one
//! terminal marker, a fixed-order result file, a per-combination summary, a
//! JSON metadata snapshot and a hardlink to the input data file. Boolean lines
//! use `True`/`False` spellings for compatibility with existing consumers.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::common::error::NetError;

use crate::sweep::SweepResult;
use crate::sweep::aggregate::ResultRecord;
use crate::sweep::config::RunConfig;

pub const STATUS_FILE: &str = "0_status";
pub const RESULT_FILE: &str = "0_result.txt";
pub const SUMMARY_FILE: &str = "0_result_summary.txt";
pub const METADATA_FILE: &str = "0_metadata";
pub const DATA_LINK_FILE: &str = "0_graph_network_data_testcase.R";

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_LAUNCH_ERROR: &str = "launch_error";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FINISHED_NO_SOLUTION: &str =
    "finished:Either some unknown error, or NO feasible solution found";

fn python_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// The run's status file. Once a terminal marker is written, later terminal
/// writes are ignored so the first reported outcome sticks.
pub struct StatusFile {
    path: PathBuf,
    terminal: bool,
}

impl StatusFile {
    pub fn new(run_dir: &Path) -> StatusFile {
        StatusFile {
            path: run_dir.join(STATUS_FILE),
            terminal: false,
        }
    }

    pub fn mark_running(&mut self) -> SweepResult<()> {
        std::fs::write(&self.path, format!("{STATUS_RUNNING}\n"))
            .with_context(|| format!("Cannot write '{}'", self.path.display()))?;
        Ok(())
    }

    pub fn mark_terminal(&mut self, value: &str) -> SweepResult<()> {
        if self.terminal {
            log::warn!("Status is already terminal, ignoring transition to '{value}'");
            return Ok(());
        }
        std::fs::write(&self.path, format!("{value}\n"))
            .with_context(|| format!("Cannot write '{}'", self.path.display()))?;
        self.terminal = true;
        Ok(())
    }

    /// Appends one combination's diagnostic message below the status marker.
    pub fn append_diagnostic(&self, solver: &str, model: &str, message: &str) -> SweepResult<()> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open '{}' for appending", self.path.display()))?;
        write!(file, "\n---+++---\n\n{solver}, {model}\n\n{message}\n")
            .with_context(|| format!("Cannot append to '{}'", self.path.display()))?;
        Ok(())
    }
}

/// Renames a result file left over from a previous run to the lowest unused
/// `0_result_<i>.txt` name so it is never overwritten.
pub fn rotate_existing_result(run_dir: &Path) -> SweepResult<()> {
    let current = run_dir.join(RESULT_FILE);
    if !current.exists() {
        return Ok(());
    }
    for i in 1..10_000_000u32 {
        let candidate = run_dir.join(format!("0_result_{i:07}.txt"));
        if !candidate.exists() {
            std::fs::rename(&current, &candidate).with_context(|| {
                format!(
                    "Cannot rename '{}' to '{}'",
                    current.display(),
                    candidate.display()
                )
            })?;
            log::info!(
                "Old result renamed from '{RESULT_FILE}' to '{}'",
                candidate.file_name().unwrap_or_default().to_string_lossy()
            );
            return Ok(());
        }
    }
    anyhow::bail!("No free rotation name for '{}'", current.display())
}

/// Fixed line order: status, solver, model, transcript path, objective.
pub fn write_success_result(run_dir: &Path, best: &ResultRecord) -> SweepResult<()> {
    let path = run_dir.join(RESULT_FILE);
    let content = format!(
        "{}\n{}\n{}\n{}\n{}\n",
        python_bool(true),
        best.solver.name(),
        best.short_model_name,
        best.transcript_path.display(),
        best.objective
    );
    std::fs::write(&path, content)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}

pub fn write_failure_result(run_dir: &Path) -> SweepResult<()> {
    let path = run_dir.join(RESULT_FILE);
    std::fs::write(&path, format!("{}\n", python_bool(false)))
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}

/// One summary line per combination, in canonical order.
pub fn write_summary(run_dir: &Path, records: &[ResultRecord]) -> SweepResult<()> {
    let path = run_dir.join(SUMMARY_FILE);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;
    for record in records {
        writeln!(
            file,
            "solver={}, model={}, ok={}, res={}",
            record.solver.name(),
            record.short_model_name,
            python_bool(record.found),
            record.objective
        )
        .with_context(|| format!("Cannot append to '{}'", path.display()))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct RunMetadata {
    unique_prefix: String,
    hostname: String,
    start_time: String,
    start_timestamp: f64,
    solver_execution_time_limit_in_seconds: u64,
    solver_cpu_cores: u32,
}

pub fn write_metadata(config: &RunConfig) -> SweepResult<()> {
    let now = chrono::Local::now();
    let metadata = RunMetadata {
        unique_prefix: config.session_prefix.clone(),
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        start_time: now.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        start_timestamp: now.timestamp_micros() as f64 / 1e6,
        solver_execution_time_limit_in_seconds: config.time_limit.as_secs(),
        solver_cpu_cores: config.threads_per_solver,
    };
    let path = config.run_dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(&metadata).map_err(NetError::from)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}

/// Hardlinks the input data file into the run directory so the run stays
/// self-describing even if the input moves. An existing link is kept.
pub fn hardlink_data_file(config: &RunConfig) -> SweepResult<()> {
    let link = config.run_dir.join(DATA_LINK_FILE);
    match std::fs::hard_link(&config.data_file, &link) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            // A cross-device input cannot be hardlinked; the run still works.
            log::warn!(
                "Cannot hardlink '{}' to '{}': {e}",
                config.data_file.display(),
                link.display()
            );
            Ok(())
        }
    }
}
