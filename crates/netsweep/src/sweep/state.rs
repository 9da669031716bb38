//! Job bookkeeping for one run.
//!
//! Every job lives in exactly one of three disjoint sets: pending (not yet
//! launched), monitored (launched, being polled) or completed (terminal).
//! Transitions are monotonic; a job never returns to pending. The sets are
//! mutated only by the single orchestrating control flow, so there is no
//! locking anywhere.

use std::collections::VecDeque;
use std::time::Instant;

use crate::sweep::descriptor::JobDescriptor;

/// Terminal state of a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Gracefully interrupted after exceeding its wall-clock limit.
    TimedOut,
    /// Session exited on its own before the limit.
    Finished,
    /// The liveness token never appeared within the wait budget.
    LaunchFailed,
}

/// Opaque backend-assigned liveness identifier. The null value signals a
/// failed launch.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pid: Option<u32>,
}

impl ExecutionHandle {
    pub fn new(pid: u32) -> Self {
        ExecutionHandle { pid: Some(pid) }
    }

    pub fn null() -> Self {
        ExecutionHandle { pid: None }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[derive(Debug)]
pub struct MonitoredJob {
    pub job: JobDescriptor,
    pub pid: u32,
    pub launched_at: Instant,
}

#[derive(Debug)]
pub struct CompletedJob {
    pub job: JobDescriptor,
    pub state: JobState,
}

pub struct SweepState {
    pending: VecDeque<JobDescriptor>,
    monitored: Vec<MonitoredJob>,
    completed: Vec<CompletedJob>,
    total: usize,
}

impl SweepState {
    pub fn new(jobs: Vec<JobDescriptor>) -> Self {
        let total = jobs.len();
        SweepState {
            pending: jobs.into(),
            monitored: Vec::new(),
            completed: Vec::new(),
            total,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn monitored_len(&self) -> usize {
        self.monitored.len()
    }

    pub fn monitored_is_empty(&self) -> bool {
        self.monitored.is_empty()
    }

    pub fn pop_pending(&mut self) -> Option<JobDescriptor> {
        self.pending.pop_front()
    }

    pub fn add_monitored(&mut self, job: JobDescriptor, pid: u32, launched_at: Instant) {
        self.monitored.push(MonitoredJob {
            job,
            pid,
            launched_at,
        });
        self.check_partition();
    }

    /// Records a job whose launch never produced a liveness token.
    pub fn fail_launch(&mut self, job: JobDescriptor) {
        self.completed.push(CompletedJob {
            job,
            state: JobState::LaunchFailed,
        });
        self.check_partition();
    }

    pub fn monitored(&self) -> &[MonitoredJob] {
        &self.monitored
    }

    /// Moves `monitored[index]` to the completed set with the given terminal
    /// state.
    pub fn retire(&mut self, index: usize, state: JobState) {
        debug_assert!(matches!(state, JobState::TimedOut | JobState::Finished));
        let entry = self.monitored.remove(index);
        self.completed.push(CompletedJob {
            job: entry.job,
            state,
        });
        self.check_partition();
    }

    pub fn completed(&self) -> &[CompletedJob] {
        &self.completed
    }

    /// Completed jobs sorted back into canonical combination order.
    pub fn completed_in_canonical_order(&self) -> Vec<&CompletedJob> {
        let mut completed: Vec<&CompletedJob> = self.completed.iter().collect();
        completed.sort_by_key(|c| c.job.index);
        completed
    }

    fn check_partition(&self) {
        debug_assert_eq!(
            self.pending.len() + self.monitored.len() + self.completed.len(),
            self.total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::config::test_util::test_config;
    use crate::sweep::descriptor::expand_combinations;
    use crate::sweep::solver::SolverFamily;

    fn three_jobs() -> Vec<JobDescriptor> {
        let config = test_config(
            vec![
                (SolverFamily::Baron, "m1_basic.R".to_string()),
                (SolverFamily::Baron, "m2_basic2_v2.R".to_string()),
                (SolverFamily::Octeract, "m1_basic.R".to_string()),
            ],
            3,
        );
        expand_combinations(&config)
    }

    #[test]
    fn sets_partition_all_jobs() {
        let mut state = SweepState::new(three_jobs());
        assert_eq!(state.pending_len(), 3);

        let job = state.pop_pending().unwrap();
        state.add_monitored(job, 100, Instant::now());
        let job = state.pop_pending().unwrap();
        state.fail_launch(job);

        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.monitored_len(), 1);
        assert_eq!(state.completed().len(), 1);

        state.retire(0, JobState::Finished);
        assert!(state.monitored_is_empty());
        assert_eq!(state.completed().len(), 2);
        assert_eq!(state.total(), 3);
    }

    #[test]
    fn canonical_order_restored_after_out_of_order_completion() {
        let mut state = SweepState::new(three_jobs());
        for pid in 0..3 {
            let job = state.pop_pending().unwrap();
            state.add_monitored(job, pid, Instant::now());
        }
        state.retire(2, JobState::Finished);
        state.retire(0, JobState::TimedOut);
        state.retire(0, JobState::Finished);

        let ordered = state.completed_in_canonical_order();
        assert_eq!(
            ordered.iter().map(|c| c.job.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
