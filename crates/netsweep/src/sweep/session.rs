//! Narrow session/process-tree query surface.
//!
//! The monitor and scheduler only ever need four operations: count live
//! sessions under the run prefix, check one session's liveness, locate a named
//! worker process inside a session's tree, and deliver an interrupt. Keeping
//! them behind a trait means the shell round-trips (`tmux ls`, `pstree`, `ps`)
//! can be replaced by a native process-group API without touching the
//! orchestration logic, and lets tests substitute a mock.

use std::future::Future;
use std::pin::Pin;
use std::process::Output;

use anyhow::Context;
use bstr::ByteSlice;
use tokio::process::Command;

use crate::sweep::SweepResult;

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = SweepResult<T>> + 'a>>;

pub trait SessionQuery {
    /// Number of live sessions whose name starts with `prefix`.
    fn live_session_count<'a>(&'a self, prefix: &'a str) -> SessionFuture<'a, usize>;

    /// Whether the session's root process is still alive.
    fn session_alive(&self, pid: u32) -> SessionFuture<'_, bool>;

    /// Pid of the first process named `name` within the session's tree, if the
    /// tree still exists.
    fn find_worker_process<'a>(&'a self, pid: u32, name: &'a str) -> SessionFuture<'a, Option<u32>>;

    /// Delivers SIGINT (not a hard kill) so the solver can flush its
    /// best-found solution before exiting.
    fn interrupt(&self, pid: u32) -> SweepResult<()>;
}

pub fn check_command_output(output: Output) -> SweepResult<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

/// Extracts the pid of the first `name,<pid>` entry in `pstree -ap` output.
/// Guards against matching the suffix of a longer process name.
pub(crate) fn find_named_pid(tree: &str, name: &str) -> Option<u32> {
    for (start, _) in tree.match_indices(name) {
        // `pstree -ap` prefixes entries with connectors like `|-` and `` `- ``,
        // so a single leading dash is fine; a dash glued to an alphanumeric
        // character means this is the tail of a longer name.
        let mut before = tree[..start].chars().rev();
        match before.next() {
            Some(c) if c.is_alphanumeric() || c == '_' => continue,
            Some('-') => {
                if matches!(before.next(), Some(c) if c.is_alphanumeric()) {
                    continue;
                }
            }
            _ => {}
        }
        let tail = &tree[start + name.len()..];
        let Some(digits) = tail.strip_prefix(',') else {
            continue;
        };
        let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        if let Ok(pid) = digits.parse::<u32>() {
            return Some(pid);
        }
    }
    None
}

/// Production implementation backed by tmux/pstree/ps.
pub struct TmuxSessionQuery;

impl SessionQuery for TmuxSessionQuery {
    fn live_session_count<'a>(&'a self, prefix: &'a str) -> SessionFuture<'a, usize> {
        Box::pin(async move {
            let output = Command::new("tmux")
                .arg("ls")
                .output()
                .await
                .context("Cannot run `tmux ls`")?;
            // tmux exits non-zero when no server is running, which simply
            // means zero sessions.
            if !output.status.success() {
                return Ok(0);
            }
            let stdout = output.stdout.to_str_lossy();
            Ok(stdout
                .lines()
                .filter(|line| {
                    line.split(':')
                        .next()
                        .map(|name| name.starts_with(prefix))
                        .unwrap_or(false)
                })
                .count())
        })
    }

    fn session_alive(&self, pid: u32) -> SessionFuture<'_, bool> {
        Box::pin(async move {
            let output = Command::new("ps")
                .args(["-p", &pid.to_string()])
                .output()
                .await
                .context("Cannot run `ps`")?;
            Ok(output.status.success())
        })
    }

    fn find_worker_process<'a>(&'a self, pid: u32, name: &'a str) -> SessionFuture<'a, Option<u32>> {
        Box::pin(async move {
            let output = Command::new("pstree")
                .args(["-ap", &pid.to_string()])
                .output()
                .await
                .context("Cannot run `pstree`")?;
            if !output.status.success() {
                // The tree is already gone; the session finished on its own.
                return Ok(None);
            }
            let stdout = output.stdout.to_str_lossy();
            Ok(find_named_pid(&stdout, name))
        })
    }

    fn interrupt(&self, pid: u32) -> SweepResult<()> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGINT,
        )
        .with_context(|| format!("Cannot send SIGINT to pid {pid}"))?;
        Ok(())
    }
}
