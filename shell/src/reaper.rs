//! Signal handling: child reaping and forwarding of terminal signals.
//!
//! Signals are received by a dedicated thread through `signal_hook`, so none of
//! this code runs in an async-signal context and it may lock, allocate and print.

use crate::control::{JobControl, Shared};
use crate::jobs::{JobNumber, JobState};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGCHLD, SIGINT, SIGQUIT, SIGTSTP};
use signal_hook::iterator::Signals;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A state change worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Stopped {
        jid: JobNumber,
        pid: Pid,
        signal: Signal,
    },
    Terminated {
        jid: JobNumber,
        pid: Pid,
        signal: Signal,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Stopped { jid, pid, signal } => {
                write!(f, "Job [{jid}] ({pid}) stopped by signal {}", *signal as i32)
            }
            Notice::Terminated { jid, pid, signal } => {
                write!(f, "Job [{jid}] ({pid}) terminated by signal {}", *signal as i32)
            }
        }
    }
}

/// Applies one collected wait status to the shared state.
///
/// Statuses for pids the table does not know (already removed, or pipeline
/// stages) produce no notice.
pub fn apply_status(shared: &mut Shared, status: WaitStatus) -> Option<Notice> {
    match status {
        WaitStatus::Stopped(pid, signal) => {
            let job = shared.table.find_by_pid_mut(pid)?;
            job.state = JobState::Stopped;
            tracing::debug!(jid = job.jid, pid = pid.as_raw(), ?signal, "job stopped");
            Some(Notice::Stopped {
                jid: job.jid,
                pid,
                signal,
            })
        }
        WaitStatus::Signaled(pid, signal, _) => {
            if shared.finish_pipeline_stage(pid) {
                tracing::debug!(pid = pid.as_raw(), ?signal, "pipeline stage killed");
                return None;
            }
            let job = shared.table.remove(pid).ok()?;
            Some(Notice::Terminated {
                jid: job.jid,
                pid,
                signal,
            })
        }
        WaitStatus::Exited(pid, code) => {
            if shared.finish_pipeline_stage(pid) {
                tracing::debug!(pid = pid.as_raw(), code, "pipeline stage exited");
            } else if shared.table.remove(pid).is_ok() {
                tracing::debug!(pid = pid.as_raw(), code, "job exited");
            }
            None
        }
        other => {
            tracing::trace!(?other, "ignored wait status");
            None
        }
    }
}

/// Collects every child whose state changed, without blocking.
///
/// Each `waitpid` call and the application of its status form one critical
/// section, so nothing is collected while the main flow is forking and
/// registering. Waiters are woken after each status. Running out of children
/// is the normal way out.
pub fn reap_children(control: &JobControl, out: &mut dyn Write) {
    loop {
        {
            let mut shared = control.lock();
            let status = match waitpid(
                Pid::from_raw(-1),
                Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED),
            ) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed");
                    break;
                }
                Ok(status) => status,
            };
            if let Some(notice) = apply_status(&mut shared, status) {
                // a broken stdout must not stop reaping
                let _ = writeln!(out, "{notice}");
                let _ = out.flush();
            }
        }
        control.notify();
    }
}

/// Installs the shell's signal handling and starts the thread serving it.
///
/// SIGCHLD reaps, SIGINT and SIGTSTP are forwarded to the foreground process
/// group, SIGQUIT terminates the shell.
pub fn spawn(control: Arc<JobControl>) -> std::io::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTSTP, SIGQUIT])?;
    thread::Builder::new()
        .name("reaper".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGCHLD => reap_children(&control, &mut std::io::stdout()),
                    SIGINT => {
                        control.forward_interrupt();
                    }
                    SIGTSTP => {
                        control.forward_stop();
                    }
                    SIGQUIT => {
                        println!("Terminating after receipt of SIGQUIT signal");
                        std::process::exit(1);
                    }
                    other => tracing::trace!(signal = other, "unregistered signal ignored"),
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ForegroundPipeline;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn shared_with(jobs: &[(i32, JobState)]) -> Shared {
        let mut shared = Shared::default();
        for (raw, state) in jobs {
            shared.table.add(pid(*raw), *state, "cmd\n").unwrap();
        }
        shared
    }

    #[test]
    fn test_stopped_child_keeps_record() {
        let mut shared = shared_with(&[(10, JobState::Foreground)]);
        let notice = apply_status(&mut shared, WaitStatus::Stopped(pid(10), Signal::SIGTSTP));

        assert_eq!(
            notice,
            Some(Notice::Stopped {
                jid: 1,
                pid: pid(10),
                signal: Signal::SIGTSTP
            })
        );
        assert_eq!(
            shared.table.find_by_pid(pid(10)).unwrap().state,
            JobState::Stopped
        );
        assert_eq!(shared.table.foreground_pid(), None);
    }

    #[test]
    fn test_signaled_child_is_removed_with_notice() {
        let mut shared = shared_with(&[(10, JobState::Background), (11, JobState::Foreground)]);
        let notice = apply_status(
            &mut shared,
            WaitStatus::Signaled(pid(11), Signal::SIGINT, false),
        )
        .unwrap();

        assert_eq!(notice.to_string(), "Job [2] (11) terminated by signal 2");
        assert!(shared.table.find_by_pid(pid(11)).is_none());
        assert!(shared.table.find_by_pid(pid(10)).is_some());
    }

    #[test]
    fn test_exited_child_is_removed_silently() {
        let mut shared = shared_with(&[(10, JobState::Foreground)]);
        assert_eq!(apply_status(&mut shared, WaitStatus::Exited(pid(10), 1)), None);
        assert!(shared.table.is_empty());
    }

    #[test]
    fn test_unknown_pid_is_ignored() {
        let mut shared = shared_with(&[(10, JobState::Background)]);
        assert_eq!(apply_status(&mut shared, WaitStatus::Exited(pid(77), 0)), None);
        assert_eq!(
            apply_status(&mut shared, WaitStatus::Signaled(pid(77), Signal::SIGKILL, false)),
            None
        );
        assert_eq!(
            apply_status(&mut shared, WaitStatus::Stopped(pid(77), Signal::SIGSTOP)),
            None
        );
        assert_eq!(shared.table.len(), 1);
    }

    #[test]
    fn test_pipeline_stages_are_tracked_outside_the_table() {
        let mut shared = Shared::default();
        shared.pipeline = Some(ForegroundPipeline {
            pgid: pid(20),
            pending: vec![pid(20), pid(21)],
        });

        assert_eq!(apply_status(&mut shared, WaitStatus::Exited(pid(20), 0)), None);
        assert_eq!(
            apply_status(&mut shared, WaitStatus::Signaled(pid(21), Signal::SIGINT, false)),
            None
        );
        assert!(shared.pipeline.as_ref().unwrap().pending.is_empty());
        assert!(shared.table.is_empty());
    }

    #[test]
    fn test_stop_notice_format() {
        let notice = Notice::Stopped {
            jid: 3,
            pid: pid(1234),
            signal: Signal::SIGTSTP,
        };
        assert_eq!(notice.to_string(), "Job [3] (1234) stopped by signal 20");
    }
}
