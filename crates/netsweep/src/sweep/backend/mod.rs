//! Execution backends.
//!
//! A backend launches one job as an isolated tmux session and returns a
//! liveness handle. Two flavors exist: the interactive AMPL session (Baron,
//! Octeract) and the batch GAMS submission (AlphaECP). Both create the job's
//! output directory and transcript before launching, and both conclude launch
//! failure only after the liveness-token wait budget is exhausted.

pub mod ampl;
pub mod gams;

use std::future::Future;
use std::pin::Pin;

use anyhow::Context;
use tokio::process::Command;

use crate::sweep::SweepResult;
use crate::sweep::config::Intervals;
use crate::sweep::descriptor::JobDescriptor;
use crate::sweep::session::check_command_output;
use crate::sweep::state::ExecutionHandle;

pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = SweepResult<ExecutionHandle>> + 'a>>;

pub trait ExecutionBackend {
    /// Launches the job in the background and waits for its liveness token.
    /// Returns the null handle when the token never appears; an `Err` means
    /// the launch could not even be issued.
    fn launch<'a>(&'a self, job: &'a JobDescriptor) -> LaunchFuture<'a>;
}

/// Creates the job's output directory and an empty transcript, a prerequisite
/// of every launch.
pub(crate) fn prepare_output_dir(job: &JobDescriptor) -> SweepResult<()> {
    std::fs::create_dir_all(&job.output_dir)
        .with_context(|| format!("Cannot create '{}'", job.output_dir.display()))?;
    std::fs::write(&job.transcript_path, "")
        .with_context(|| format!("Cannot create '{}'", job.transcript_path.display()))?;
    Ok(())
}

/// Starts a detached tmux session running `script` under bash.
pub(crate) async fn spawn_tmux_session(session_name: &str, script: &str) -> SweepResult<()> {
    log::debug!("Starting tmux session '{session_name}'");
    let output = Command::new("tmux")
        .args(["new-session", "-d", "-s", session_name, "bash", "-c", script])
        .output()
        .await
        .with_context(|| format!("Cannot start tmux session '{session_name}'"))?;
    check_command_output(output)
        .with_context(|| format!("tmux session '{session_name}' failed to start"))?;
    Ok(())
}

/// Polls for the pid file the session writes as its liveness token. The wait
/// budget is bounded; exhausting it yields the null handle.
pub(crate) async fn wait_for_liveness(
    job: &JobDescriptor,
    intervals: &Intervals,
) -> SweepResult<ExecutionHandle> {
    for _ in 0..intervals.liveness_attempts {
        if job.pid_file_path.exists() {
            let content = std::fs::read_to_string(&job.pid_file_path)
                .with_context(|| format!("Cannot read '{}'", job.pid_file_path.display()))?;
            let pid = content.trim().parse::<u32>().with_context(|| {
                format!("Invalid liveness token in '{}'", job.pid_file_path.display())
            })?;
            return Ok(ExecutionHandle::new(pid));
        }
        log::debug!(
            "Liveness token for '{}' not generated yet, sleeping",
            job.combination
        );
        tokio::time::sleep(intervals.liveness_poll).await;
    }
    log::error!("Liveness token never appeared for '{}'", job.combination);
    Ok(ExecutionHandle::null())
}
