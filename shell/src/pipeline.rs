//! Running a multi-stage pipeline in the foreground.
//!
//! Pipelines are not jobs: they never enter the job table and cannot be moved
//! with `fg`/`bg`. All stages share one process group, led by the first stage,
//! so an interrupt reaches every one of them.

use crate::command::CommandSpec;
use crate::control::{ForegroundPipeline, JobControl};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::external::{ExecImage, StageWiring};
use nix::unistd::{ForkResult, Pid, fork, pipe, setpgid};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Connects `stages` with pipes, runs them and waits until all are reaped.
///
/// Only the first stage may read from a `<` file and only the last stage may
/// write to a `>`/`>>` file; other redirections are dropped.
pub fn run_pipeline(
    control: &JobControl,
    env: &Environment,
    stages: &[CommandSpec],
) -> Result<Vec<Pid>> {
    let Some(last) = stages.len().checked_sub(1) else {
        return Ok(Vec::new());
    };

    let images = stages
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let mut image = ExecImage::prepare(env, spec)?.without_error();
            if i != 0 {
                image = image.without_input();
            }
            if i != last {
                image = image.without_output();
            }
            Ok(image)
        })
        .collect::<Result<Vec<_>>>()?;

    let pipes: Vec<(OwnedFd, OwnedFd)> = (0..last)
        .map(|_| pipe().map_err(ShellError::Pipe))
        .collect::<Result<_>>()?;
    let wirings = wire_stages(&pipes, stages.len());

    let stage_pids = {
        let mut shared = control.lock();
        let mut pgid = Pid::from_raw(0);
        let mut pending = Vec::with_capacity(stages.len());

        for (image, wiring) in images.iter().zip(&wirings) {
            // SAFETY: the child only runs `ExecImage::exec`, which sticks to
            // async-signal-safe calls until it execs or exits.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => image.exec(pgid, wiring),
                Ok(ForkResult::Parent { child }) => {
                    if pending.is_empty() {
                        pgid = child;
                    }
                    if let Err(e) = setpgid(child, pgid) {
                        tracing::trace!(pid = child.as_raw(), error = %e, "parent-side setpgid failed");
                    }
                    pending.push(child);
                }
                Err(errno) => {
                    shared.pipeline = Some(ForegroundPipeline { pgid, pending });
                    return Err(ShellError::Fork(errno));
                }
            }
        }

        tracing::debug!(pgid = pgid.as_raw(), stages = pending.len(), "pipeline launched");
        shared.pipeline = Some(ForegroundPipeline {
            pgid,
            pending: pending.clone(),
        });
        pending
    };

    // The parent's copies must go, or the readers would never see end of file.
    drop(pipes);
    control.wait_for_pipeline();
    Ok(stage_pids)
}

/// Works out, for each of `count` stages, which pipe ends become its
/// standard input and output.
fn wire_stages(pipes: &[(OwnedFd, OwnedFd)], count: usize) -> Vec<StageWiring> {
    let inherited: Vec<RawFd> = pipes
        .iter()
        .flat_map(|(read, write)| [read.as_raw_fd(), write.as_raw_fd()])
        .collect();

    (0..count)
        .map(|i| StageWiring {
            stdin: i
                .checked_sub(1)
                .and_then(|prev| pipes.get(prev))
                .map(|(read, _)| read.as_raw_fd()),
            stdout: pipes.get(i).map(|(_, write)| write.as_raw_fd()),
            inherited: inherited.clone(),
        })
        .collect()
}
