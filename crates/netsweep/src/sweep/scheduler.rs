//! The sweep control loop.
//!
//! One run proceeds through fixed phases: report-file initialization, the
//! first batch of launches, an error sweep that retires sessions which died
//! right after starting, an optional extra-time grant when nothing has found a
//! solution yet, capacity-gated backfill of the remaining combinations, the
//! global budget wait, a full drain of the monitored set, the scratch-file
//! harvest and finally aggregation into the run's result files. Everything
//! runs on one task; concurrency lives in the background sessions, not here.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;

use crate::common::error::NetError;
use crate::common::timeutils::now_monotonic;
use crate::sweep::SweepResult;
use crate::sweep::aggregate::{ResultRecord, collect_records, select_best};
use crate::sweep::backend::ExecutionBackend;
use crate::sweep::config::RunConfig;
use crate::sweep::descriptor::{JobDescriptor, expand_combinations};
use crate::sweep::monitor::{Monitor, PollMode};
use crate::sweep::report::{self, StatusFile};
use crate::sweep::session::SessionQuery;
use crate::sweep::solver::{check_errors_for, solution_found_for};
use crate::sweep::state::{JobState, SweepState};

/// Where solvers leave their scratch files.
const SCRATCH_DIR: &str = "/tmp";

#[derive(Debug)]
pub struct RunVerdict {
    pub best: Option<ResultRecord>,
    pub records: Vec<ResultRecord>,
}

pub struct SweepRun<'a> {
    config: &'a RunConfig,
    interactive: &'a dyn ExecutionBackend,
    batch: &'a dyn ExecutionBackend,
    sessions: &'a dyn SessionQuery,
}

impl<'a> SweepRun<'a> {
    pub fn new(
        config: &'a RunConfig,
        interactive: &'a dyn ExecutionBackend,
        batch: &'a dyn ExecutionBackend,
        sessions: &'a dyn SessionQuery,
    ) -> Self {
        SweepRun {
            config,
            interactive,
            batch,
            sessions,
        }
    }

    pub async fn execute(&self) -> SweepResult<RunVerdict> {
        self.prepare_directories()?;
        report::write_metadata(self.config)?;
        report::hardlink_data_file(self.config)?;
        let mut status = StatusFile::new(&self.config.run_dir);
        status.mark_running()?;

        let jobs = expand_combinations(self.config);
        log::info!(
            "Sweeping {} combinations, at most {} in parallel",
            jobs.len(),
            self.config.max_parallel
        );
        let mut state = SweepState::new(jobs);
        let monitor = Monitor::new(self.sessions, &self.config.intervals);
        let sweep_started = now_monotonic();

        let first_batch = self.config.max_parallel.min(state.total());
        log::info!("Starting the first batch of {first_batch} sessions");
        for _ in 0..first_batch {
            let Some(job) = state.pop_pending() else {
                break;
            };
            self.launch(&mut state, job).await;
        }

        self.initial_error_sweep(&mut state).await?;
        if state.monitored_is_empty() {
            self.abort_all_launches_failed(&mut status, &state).await?;
            return Err(NetError::AllLaunchesFailed.into());
        }

        self.grant_extra_time(&state, sweep_started).await;
        self.backfill(&mut state, &monitor).await?;
        self.await_global_deadline(&mut state, &monitor, sweep_started)
            .await?;
        self.log_error_sweep(&state, 2);
        monitor.poll(&mut state, PollMode::UntilEmpty).await?;
        self.log_error_sweep(&state, 3);
        self.wait_for_sessions_to_end().await?;
        harvest_scratch(Path::new(SCRATCH_DIR), &self.config.solution_data_dir)?;

        self.finalize(&mut status, &state)
    }

    fn prepare_directories(&self) -> SweepResult<()> {
        for dir in [
            &self.config.output_root,
            &self.config.solution_data_dir,
            &self.config.run_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        }
        Ok(())
    }

    fn backend_for(&self, job: &JobDescriptor) -> &dyn ExecutionBackend {
        if job.solver.uses_batch_submission() {
            self.batch
        } else {
            self.interactive
        }
    }

    async fn launch(&self, state: &mut SweepState, job: JobDescriptor) {
        log::debug!("Launching '{}'", job.combination);
        match self.backend_for(&job).launch(&job).await {
            Ok(handle) => match handle.pid() {
                Some(pid) => {
                    log::info!("Session '{}' started with pid {pid}", job.session_name);
                    state.add_monitored(job, pid, now_monotonic());
                }
                None => {
                    log::error!("Launch of '{}' produced no liveness token", job.combination);
                    state.fail_launch(job);
                }
            },
            Err(error) => {
                log::error!("Cannot launch '{}': {error:?}", job.combination);
                state.fail_launch(job);
            }
        }
        tokio::time::sleep(self.config.intervals.launch_debounce).await;
    }

    /// Round 1 of error checking: retires sessions that already died right
    /// after launch, logging whatever diagnosis their transcript offers.
    async fn initial_error_sweep(&self, state: &mut SweepState) -> SweepResult<()> {
        log::info!("Error checking, round 1");
        let mut index = 0;
        while index < state.monitored_len() {
            let (pid, job) = {
                let entry = &state.monitored()[index];
                (entry.pid, entry.job.clone())
            };
            if self.sessions.session_alive(pid).await? {
                index += 1;
                continue;
            }
            let (_, message) = check_errors_for(&job);
            log::warn!("'{}' died right after launch: {message}", job.combination);
            state.retire(index, JobState::Finished);
        }
        Ok(())
    }

    /// Every session of the first batch died immediately. Writes the terminal
    /// launch-error status with per-combination diagnostics.
    async fn abort_all_launches_failed(
        &self,
        status: &mut StatusFile,
        state: &SweepState,
    ) -> SweepResult<()> {
        log::error!("Failed to start any solver session");
        // Give AMPL and the solvers time to finish writing their error output.
        tokio::time::sleep(self.config.intervals.launch_error_grace).await;
        status.mark_terminal(report::STATUS_LAUNCH_ERROR)?;
        for entry in state.completed() {
            let (ok, message) = check_errors_for(&entry.job);
            if ok {
                continue;
            }
            status.append_diagnostic(
                entry.job.solver.name(),
                &entry.job.short_model_name,
                &message,
            )?;
        }
        Ok(())
    }

    /// When no first-batch session has found a solution yet, grants extra time
    /// in fixed steps, bounded by both the cap and the remaining global budget.
    async fn grant_extra_time(&self, state: &SweepState, sweep_started: Instant) {
        let intervals = &self.config.intervals;
        let mut granted = std::time::Duration::ZERO;
        while !state.monitored_is_empty() && !self.any_solution_found(state) {
            if granted >= intervals.extra_time_cap {
                log::info!("Extra time limit reached");
                break;
            }
            if self.config.timeout_enforced() {
                let elapsed = now_monotonic().saturating_duration_since(sweep_started);
                if elapsed + intervals.extra_time_step > self.config.time_limit {
                    log::info!("No room left in the global budget for extra time");
                    break;
                }
            }
            granted += intervals.extra_time_step;
            log::info!(
                "Extra time given = {} of {} seconds",
                granted.as_secs(),
                intervals.extra_time_cap.as_secs()
            );
            tokio::time::sleep(intervals.extra_time_step).await;
        }
    }

    fn any_solution_found(&self, state: &SweepState) -> bool {
        state
            .monitored()
            .iter()
            .any(|entry| solution_found_for(&entry.job))
    }

    /// Launches the remaining combinations, admitting each one only once the
    /// number of live sessions drops below the parallelism cap.
    async fn backfill(&self, state: &mut SweepState, monitor: &Monitor<'_>) -> SweepResult<()> {
        if state.pending_len() == 0 {
            return Ok(());
        }
        log::info!("Starting the remaining {} combinations", state.pending_len());
        while state.pending_len() > 0 {
            loop {
                let live = self
                    .sessions
                    .live_session_count(&self.config.session_prefix)
                    .await?;
                if live < self.config.max_parallel {
                    break;
                }
                let retired = monitor.poll(state, PollMode::UntilChange).await?;
                if retired == 0 {
                    // Interrupted sessions can linger while the solver flushes.
                    tokio::time::sleep(self.config.intervals.straggler_poll).await;
                }
            }
            // A job waiting for a slot stays in the pending set; the monitor
            // retires jobs during the wait and the three sets must keep
            // partitioning the full combination list.
            let Some(job) = state.pop_pending() else {
                break;
            };
            self.launch(state, job).await;
        }
        Ok(())
    }

    /// Waits out the global wall-clock budget, polling the monitor each tick.
    /// Ends early when no session is running anymore.
    async fn await_global_deadline(
        &self,
        state: &mut SweepState,
        monitor: &Monitor<'_>,
        sweep_started: Instant,
    ) -> SweepResult<()> {
        if !self.config.timeout_enforced() {
            return Ok(());
        }
        loop {
            let elapsed = now_monotonic().saturating_duration_since(sweep_started);
            if elapsed >= self.config.time_limit {
                log::info!(
                    "Global time budget of {}s is spent",
                    self.config.time_limit.as_secs()
                );
                return Ok(());
            }
            if self
                .sessions
                .live_session_count(&self.config.session_prefix)
                .await?
                == 0
            {
                log::info!("No session is running anymore, skipping the rest of the wait");
                return Ok(());
            }
            monitor.poll(state, PollMode::NonBlocking).await?;
            tokio::time::sleep(self.config.intervals.budget_tick).await;
        }
    }

    /// Rounds 2 and 3 of error checking only log; retiring is left to the
    /// monitor.
    fn log_error_sweep(&self, state: &SweepState, round: u32) {
        log::info!("Error checking, round {round}");
        let monitored = state.monitored().iter().map(|entry| &entry.job);
        let completed = state.completed().iter().map(|entry| &entry.job);
        for job in monitored.chain(completed) {
            let (ok, message) = check_errors_for(job);
            if !ok {
                log::error!("'{}': {message}", job.combination);
            }
        }
    }

    /// Interrupted solvers only begin their shutdown on SIGINT; wait until
    /// every session under the run prefix is truly gone, otherwise transcripts
    /// may still be missing their final display block.
    async fn wait_for_sessions_to_end(&self) -> SweepResult<()> {
        while self
            .sessions
            .live_session_count(&self.config.session_prefix)
            .await?
            > 0
        {
            log::info!("Waiting for sessions to stop (a solver has probably not terminated yet)");
            tokio::time::sleep(self.config.intervals.straggler_poll).await;
        }
        Ok(())
    }

    fn finalize(&self, status: &mut StatusFile, state: &SweepState) -> SweepResult<RunVerdict> {
        let completed = state.completed_in_canonical_order();
        let records = collect_records(&completed);
        report::write_summary(&self.config.run_dir, &records)?;
        report::rotate_existing_result(&self.config.run_dir)?;

        let best = select_best(&records).cloned();
        match &best {
            Some(record) => {
                log::info!(
                    "Best solution {} found by solver={}, model={}",
                    record.objective,
                    record.solver.name(),
                    record.short_model_name
                );
                status.mark_terminal(report::STATUS_SUCCESS)?;
                report::write_success_result(&self.config.run_dir, record)?;
            }
            None => {
                log::error!("No feasible solution found by any combination");
                report::write_failure_result(&self.config.run_dir)?;
                status.mark_terminal(report::STATUS_FINISHED_NO_SOLUTION)?;
                for record in &records {
                    if !record.ok {
                        status.append_diagnostic(
                            record.solver.name(),
                            &record.short_model_name,
                            &record.error,
                        )?;
                    }
                }
            }
        }
        Ok(RunVerdict { best, records })
    }
}

/// Copies the solution scratch files solvers leave behind (`at*octsol` from
/// Octeract, `baron_tmp*` from Baron) into the shared solution-data directory.
/// Never fails the run; a missed scratch file only loses auxiliary data.
pub(crate) fn harvest_scratch(scratch_dir: &Path, dest: &Path) -> SweepResult<()> {
    log::info!(
        "Copying solver scratch files from '{}' to '{}'",
        scratch_dir.display(),
        dest.display()
    );
    let entries = match std::fs::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(error) => {
            log::warn!("Cannot read '{}': {error}", scratch_dir.display());
            return Ok(());
        }
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let wanted =
            (name.starts_with("at") && name.ends_with("octsol")) || name.starts_with("baron_tmp");
        if !wanted {
            continue;
        }
        if let Err(error) = copy_recursively(&entry.path(), &dest.join(&file_name)) {
            log::warn!("Cannot copy scratch '{}': {error}", entry.path().display());
        }
    }
    Ok(())
}

fn copy_recursively(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}
