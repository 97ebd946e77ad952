//! Shared job-control state and the foreground controller.
//!
//! The job table is written by two actors: the main loop (launch, `fg`, `bg`)
//! and the reaper thread (stop, termination). Both go through
//! [`JobControl::lock`], and every read-then-write sequence on the table holds
//! one guard from start to end. Changes are announced on a condition variable,
//! which is what the foreground waits sleep on.

use crate::jobs::{JobState, JobTable};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A pipeline currently running in the foreground.
///
/// Pipelines are not part of the job table; the shell only needs to know
/// which stages are still alive and which process group they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundPipeline {
    pub pgid: Pid,
    pub pending: Vec<Pid>,
}

/// Everything protected by the job-control lock.
#[derive(Default)]
pub struct Shared {
    pub table: JobTable,
    pub pipeline: Option<ForegroundPipeline>,
}

impl Shared {
    /// Forgets a reaped pipeline stage. Returns `true` if `pid` was one.
    pub fn finish_pipeline_stage(&mut self, pid: Pid) -> bool {
        match self.pipeline.as_mut() {
            Some(pipeline) => {
                let before = pipeline.pending.len();
                pipeline.pending.retain(|stage| *stage != pid);
                pipeline.pending.len() != before
            }
            None => false,
        }
    }
}

pub struct JobControl {
    shared: Mutex<Shared>,
    changed: Condvar,
}

impl JobControl {
    pub fn new(table: JobTable) -> Self {
        Self {
            shared: Mutex::new(Shared {
                table,
                pipeline: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Enters the critical section.
    ///
    /// The table only holds plain data, so a panic on another thread cannot
    /// leave it half-updated; a poisoned lock is simply reclaimed.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes every thread blocked in one of the waits below.
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Blocks until `pid` no longer holds the foreground.
    ///
    /// Returns when the job terminates, stops, or is moved to the background.
    /// There is no timeout.
    pub fn wait_for_foreground_clear(&self, pid: Pid) {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_while(guard, |shared| shared.table.foreground_pid() == Some(pid))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks until every stage of the running pipeline has been reaped,
    /// then clears the pipeline record.
    pub fn wait_for_pipeline(&self) {
        let guard = self.lock();
        let mut guard = self
            .changed
            .wait_while(guard, |shared| {
                shared
                    .pipeline
                    .as_ref()
                    .is_some_and(|pipeline| !pipeline.pending.is_empty())
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.pipeline = None;
    }

    /// Sends SIGINT to the foreground process group.
    ///
    /// Targets the foreground job if there is one, otherwise a running
    /// pipeline. Does nothing when neither exists.
    pub fn forward_interrupt(&self) -> Option<Pid> {
        let target = {
            let shared = self.lock();
            shared
                .table
                .foreground_pid()
                .or_else(|| shared.pipeline.as_ref().map(|pipeline| pipeline.pgid))
        };
        target.inspect(|pgid| signal_group(*pgid, Signal::SIGINT))
    }

    /// Sends SIGTSTP to the foreground job's process group, if there is one.
    ///
    /// Pipelines are never stopped: they could not be resumed with `fg`/`bg`.
    pub fn forward_stop(&self) -> Option<Pid> {
        let target = self.lock().table.foreground_pid();
        target.inspect(|pgid| signal_group(*pgid, Signal::SIGTSTP))
    }

    /// Number of jobs currently in `state`.
    pub fn count_in_state(&self, state: JobState) -> usize {
        self.lock()
            .table
            .list()
            .filter(|job| job.state == state)
            .count()
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new(JobTable::default())
    }
}

/// Delivers `signal` to every process in group `pgid`.
///
/// A group that vanished in the meantime is not an error: its leader has
/// exited and the reaper will clean up.
pub fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => tracing::debug!(pgid = pgid.as_raw(), ?signal, "signal forwarded"),
        Err(Errno::ESRCH) => {
            tracing::debug!(pgid = pgid.as_raw(), ?signal, "process group already gone")
        }
        Err(e) => tracing::warn!(pgid = pgid.as_raw(), ?signal, error = %e, "killpg failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::Command;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_immediately_without_foreground_job() {
        let control = JobControl::default();
        control.wait_for_foreground_clear(Pid::from_raw(12345));
    }

    #[test]
    fn test_wait_unblocks_when_job_is_removed() {
        let control = Arc::new(JobControl::default());
        let pid = Pid::from_raw(4242);
        control
            .lock()
            .table
            .add(pid, JobState::Foreground, "sleep 1\n")
            .unwrap();

        let reaper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                control.lock().table.remove(pid).unwrap();
                control.notify();
            })
        };

        control.wait_for_foreground_clear(pid);
        assert!(control.lock().table.find_by_pid(pid).is_none());
        reaper.join().unwrap();
    }

    #[test]
    fn test_wait_unblocks_when_job_stops_and_keeps_record() {
        let control = Arc::new(JobControl::default());
        let pid = Pid::from_raw(4243);
        control
            .lock()
            .table
            .add(pid, JobState::Foreground, "vi\n")
            .unwrap();

        let reaper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                control.lock().table.set_state(pid, JobState::Stopped).unwrap();
                control.notify();
            })
        };

        control.wait_for_foreground_clear(pid);
        assert_eq!(control.count_in_state(JobState::Stopped), 1);
        assert_eq!(control.count_in_state(JobState::Foreground), 0);
        reaper.join().unwrap();
    }

    #[test]
    fn test_wait_for_pipeline_until_all_stages_finish() {
        let control = Arc::new(JobControl::default());
        let stages = vec![Pid::from_raw(501), Pid::from_raw(502)];
        control.lock().pipeline = Some(ForegroundPipeline {
            pgid: stages[0],
            pending: stages.clone(),
        });

        let reaper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                for pid in stages {
                    thread::sleep(Duration::from_millis(20));
                    assert!(control.lock().finish_pipeline_stage(pid));
                    control.notify();
                }
            })
        };

        control.wait_for_pipeline();
        assert!(control.lock().pipeline.is_none());
        reaper.join().unwrap();
    }

    #[test]
    fn test_forwarding_without_foreground_is_a_no_op() {
        let control = JobControl::default();
        control
            .lock()
            .table
            .add(Pid::from_raw(999_999), JobState::Background, "x &\n")
            .unwrap();
        assert_eq!(control.forward_interrupt(), None);
        assert_eq!(control.forward_stop(), None);
    }

    #[test]
    fn test_interrupt_reaches_whole_process_group() {
        let mut leader = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("spawn sleep");
        let pgid = Pid::from_raw(leader.id() as i32);
        let mut member = Command::new("sleep")
            .arg("30")
            .process_group(pgid.as_raw())
            .spawn()
            .expect("spawn second sleep");

        let control = JobControl::default();
        control
            .lock()
            .table
            .add(pgid, JobState::Foreground, "sleep 30\n")
            .unwrap();

        assert_eq!(control.forward_interrupt(), Some(pgid));

        let leader_status = leader.wait().unwrap();
        let member_status = member.wait().unwrap();
        assert_eq!(leader_status.signal(), Some(Signal::SIGINT as i32));
        assert_eq!(member_status.signal(), Some(Signal::SIGINT as i32));

        // forwarding never touches the table; removal is the reaper's job
        assert!(control.lock().table.find_by_pid(pgid).is_some());
    }
}
