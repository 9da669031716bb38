//! Polling monitor with graceful timeout enforcement.
//!
//! One pass walks the monitored set: sessions that exited on their own retire
//! as finished, sessions past their wall-clock limit get their solver process
//! interrupted with SIGINT and retire as timed out. A zero limit disables
//! timeout enforcement entirely, sessions then run until they exit on their
//! own.

use crate::common::timeutils::now_monotonic;
use crate::sweep::SweepResult;
use crate::sweep::config::Intervals;
use crate::sweep::session::SessionQuery;
use crate::sweep::state::{JobState, SweepState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// One pass over the monitored set, then return.
    NonBlocking,
    /// Poll until at least one job retires or none are left.
    UntilChange,
    /// Poll until the monitored set is empty.
    UntilEmpty,
}

pub struct Monitor<'a> {
    sessions: &'a dyn SessionQuery,
    intervals: &'a Intervals,
}

impl<'a> Monitor<'a> {
    pub fn new(sessions: &'a dyn SessionQuery, intervals: &'a Intervals) -> Self {
        Monitor {
            sessions,
            intervals,
        }
    }

    /// Polls the monitored set according to `mode`. Returns the number of jobs
    /// that retired.
    pub async fn poll(&self, state: &mut SweepState, mode: PollMode) -> SweepResult<usize> {
        let mut retired_total = 0;
        loop {
            retired_total += self.poll_pass(state).await?;
            let done = match mode {
                PollMode::NonBlocking => true,
                PollMode::UntilChange => retired_total > 0 || state.monitored_is_empty(),
                PollMode::UntilEmpty => state.monitored_is_empty(),
            };
            if done {
                return Ok(retired_total);
            }
            tokio::time::sleep(self.intervals.monitor_poll).await;
        }
    }

    async fn poll_pass(&self, state: &mut SweepState) -> SweepResult<usize> {
        let mut retired = 0;
        let mut index = 0;
        while index < state.monitored_len() {
            let (pid, limit, launched_at, worker_name, combination) = {
                let entry = &state.monitored()[index];
                (
                    entry.pid,
                    entry.job.time_limit,
                    entry.launched_at,
                    entry.job.solver.worker_process_name(entry.job.threads),
                    entry.job.combination.clone(),
                )
            };

            if !self.sessions.session_alive(pid).await? {
                log::info!("Session of '{combination}' exited on its own");
                state.retire(index, JobState::Finished);
                retired += 1;
                continue;
            }

            let elapsed = now_monotonic().saturating_duration_since(launched_at);
            if !limit.is_zero() && elapsed >= limit {
                log::info!(
                    "'{combination}' exceeded its limit of {}s (running for {}s), stopping it",
                    limit.as_secs(),
                    elapsed.as_secs()
                );
                match self.sessions.find_worker_process(pid, worker_name).await? {
                    Some(worker_pid) => {
                        if let Err(error) = self.sessions.interrupt(worker_pid) {
                            log::warn!(
                                "Cannot interrupt '{worker_name}' (pid {worker_pid}): {error:?}"
                            );
                        } else {
                            log::debug!("Interrupted '{worker_name}' (pid {worker_pid})");
                        }
                    }
                    None => log::info!(
                        "No '{worker_name}' process under pid {pid}, \
                         probably the solver already finished"
                    ),
                }
                state.retire(index, JobState::TimedOut);
                retired += 1;
                // Let the session tear down before the next process lookup.
                tokio::time::sleep(self.intervals.signal_settle).await;
                continue;
            }

            index += 1;
        }
        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::common::timeutils::mock_time::MockTime;
    use crate::sweep::config::test_util::{instant_intervals, test_config};
    use crate::sweep::descriptor::expand_combinations;
    use crate::sweep::session::SessionFuture;
    use crate::sweep::solver::SolverFamily;

    #[derive(Default)]
    struct MockSessions {
        alive: RefCell<HashSet<u32>>,
        /// session pid -> worker pid
        workers: RefCell<HashMap<u32, u32>>,
        interrupted: RefCell<Vec<u32>>,
    }

    impl MockSessions {
        fn spawn(&self, pid: u32, worker_pid: u32) {
            self.alive.borrow_mut().insert(pid);
            self.workers.borrow_mut().insert(pid, worker_pid);
        }

        fn kill(&self, pid: u32) {
            self.alive.borrow_mut().remove(&pid);
            self.workers.borrow_mut().remove(&pid);
        }
    }

    impl SessionQuery for MockSessions {
        fn live_session_count<'a>(&'a self, _prefix: &'a str) -> SessionFuture<'a, usize> {
            Box::pin(async move { Ok(self.alive.borrow().len()) })
        }

        fn session_alive(&self, pid: u32) -> SessionFuture<'_, bool> {
            Box::pin(async move { Ok(self.alive.borrow().contains(&pid)) })
        }

        fn find_worker_process<'a>(
            &'a self,
            pid: u32,
            _name: &'a str,
        ) -> SessionFuture<'a, Option<u32>> {
            Box::pin(async move { Ok(self.workers.borrow().get(&pid).copied()) })
        }

        fn interrupt(&self, pid: u32) -> SweepResult<()> {
            self.interrupted.borrow_mut().push(pid);
            // An interrupted solver flushes and exits, taking its session down.
            let session = self
                .workers
                .borrow()
                .iter()
                .find(|(_, worker)| **worker == pid)
                .map(|(session, _)| *session);
            if let Some(session) = session {
                self.kill(session);
            }
            Ok(())
        }
    }

    fn monitored_state(combinations: Vec<(SolverFamily, String)>) -> SweepState {
        let config = test_config(combinations, 8);
        let mut state = SweepState::new(expand_combinations(&config));
        let mut pid = 100;
        while let Some(job) = state.pop_pending() {
            state.add_monitored(job, pid, Instant::now());
            pid += 100;
        }
        state
    }

    #[tokio::test]
    async fn dead_session_retires_as_finished() {
        let sessions = MockSessions::default();
        sessions.spawn(100, 101);
        let intervals = instant_intervals();
        let monitor = Monitor::new(&sessions, &intervals);
        let mut state = monitored_state(vec![(SolverFamily::Baron, "m1_basic.R".to_string())]);

        assert_eq!(monitor.poll(&mut state, PollMode::NonBlocking).await.unwrap(), 0);

        sessions.kill(100);
        assert_eq!(monitor.poll(&mut state, PollMode::NonBlocking).await.unwrap(), 1);
        assert_eq!(state.completed()[0].state, JobState::Finished);
        assert!(sessions.interrupted.borrow().is_empty());
    }

    #[tokio::test]
    async fn overrunning_job_gets_interrupted() {
        let sessions = MockSessions::default();
        sessions.spawn(100, 101);
        let intervals = instant_intervals();
        let monitor = Monitor::new(&sessions, &intervals);
        let mut state = monitored_state(vec![(SolverFamily::Baron, "m1_basic.R".to_string())]);

        // test_config uses a 300 s limit; jump past it.
        let _mock = MockTime::mock(Instant::now() + Duration::from_secs(301));
        assert_eq!(monitor.poll(&mut state, PollMode::NonBlocking).await.unwrap(), 1);
        assert_eq!(state.completed()[0].state, JobState::TimedOut);
        assert_eq!(*sessions.interrupted.borrow(), vec![101]);
        assert!(sessions.alive.borrow().is_empty());
    }

    #[tokio::test]
    async fn timed_out_job_without_worker_still_retires() {
        let sessions = MockSessions::default();
        sessions.spawn(100, 101);
        // The solver exited but its session shell lingers.
        sessions.workers.borrow_mut().remove(&100);
        let intervals = instant_intervals();
        let monitor = Monitor::new(&sessions, &intervals);
        let mut state = monitored_state(vec![(SolverFamily::Octeract, "m1_basic.R".to_string())]);

        let _mock = MockTime::mock(Instant::now() + Duration::from_secs(400));
        assert_eq!(monitor.poll(&mut state, PollMode::NonBlocking).await.unwrap(), 1);
        assert_eq!(state.completed()[0].state, JobState::TimedOut);
        assert!(sessions.interrupted.borrow().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_disables_timeouts() {
        let sessions = MockSessions::default();
        sessions.spawn(100, 101);
        let config = test_config(vec![(SolverFamily::Baron, "m1_basic.R".to_string())], 1);
        let mut jobs = expand_combinations(&config);
        jobs[0].time_limit = Duration::ZERO;
        let mut state = SweepState::new(jobs);
        let job = state.pop_pending().unwrap();
        state.add_monitored(job, 100, Instant::now());

        let intervals = instant_intervals();
        let monitor = Monitor::new(&sessions, &intervals);
        let _mock = MockTime::mock(Instant::now() + Duration::from_secs(100_000));
        assert_eq!(monitor.poll(&mut state, PollMode::NonBlocking).await.unwrap(), 0);
        assert_eq!(state.monitored_len(), 1);
    }

    #[tokio::test]
    async fn until_empty_drains_the_monitored_set() {
        let sessions = MockSessions::default();
        sessions.spawn(100, 101);
        sessions.spawn(200, 201);
        let intervals = instant_intervals();
        let monitor = Monitor::new(&sessions, &intervals);
        let mut state = monitored_state(vec![
            (SolverFamily::Baron, "m1_basic.R".to_string()),
            (SolverFamily::Octeract, "m2_basic2_v2.R".to_string()),
        ]);

        let _mock = MockTime::mock(Instant::now() + Duration::from_secs(301));
        assert_eq!(monitor.poll(&mut state, PollMode::UntilEmpty).await.unwrap(), 2);
        assert!(state.monitored_is_empty());
        assert_eq!(state.completed().len(), 2);
    }
}
