//! Launching a single command as a job.

use crate::command::CommandSpec;
use crate::control::JobControl;
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::external::{ExecImage, StageWiring};
use crate::jobs::{JobState, JobTableError};
use nix::unistd::{ForkResult, Pid, fork, setpgid};
use std::io::Write;

/// Runs `spec` in a new process group and registers it in the job table.
///
/// The capacity check, the fork and the registration happen inside one
/// critical section, so the reaper cannot collect the child before it is
/// known. A foreground job is waited for before returning; a background job
/// is announced as `[J] (P) cmdline`.
///
/// Returns the pid of the new job.
pub fn launch(
    control: &JobControl,
    env: &Environment,
    spec: &CommandSpec,
    background: bool,
    cmdline: &str,
    out: &mut dyn Write,
) -> Result<Pid> {
    let image = ExecImage::prepare(env, spec)?;
    let state = if background {
        JobState::Background
    } else {
        JobState::Foreground
    };

    let pid = {
        let mut shared = control.lock();
        if shared.table.is_full() {
            return Err(JobTableError::Full.into());
        }

        // SAFETY: the child only runs `ExecImage::exec`, which sticks to
        // async-signal-safe calls until it execs or exits.
        let pid = match unsafe { fork() } {
            Ok(ForkResult::Child) => image.exec(Pid::from_raw(0), &StageWiring::default()),
            Ok(ForkResult::Parent { child }) => child,
            Err(errno) => return Err(ShellError::Fork(errno)),
        };
        if let Err(e) = setpgid(pid, pid) {
            // the child got there first, or has already exec'd
            tracing::trace!(pid = pid.as_raw(), error = %e, "parent-side setpgid failed");
        }
        tracing::debug!(
            pid = pid.as_raw(),
            background,
            resolved = image.is_resolved(),
            command = %spec,
            "launched"
        );

        let job = shared.table.add(pid, state, cmdline)?;
        if background {
            write!(out, "[{}] ({}) {}", job.jid, job.pid, job.cmdline)?;
            out.flush()?;
        }
        pid
    };

    if !background {
        control.wait_for_foreground_clear(pid);
    }
    Ok(pid)
}
