use crate::command::{CommandFactory, ExecutableCommand, Flow};
use crate::control::JobControl;
use crate::interpreter::Factory;
use crate::jobs::{JobNumber, JobState};
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Write;
use std::str::FromStr;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "jobs" or "fg".
    fn name() -> &'static str;

    /// Executes the command against the job table.
    fn execute(self, control: &JobControl, out: &mut dyn Write) -> Result<Flow>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, control: &JobControl, out: &mut dyn Write) -> Result<Flow> {
        match <T as BuiltinCommand>::execute(*self, control, out) {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, _control: &JobControl, out: &mut dyn Write) -> Result<Flow> {
        writeln!(out, "{}", self.output.trim_end())?;
        Ok(Flow::Continue)
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, .. }) => Box::new(InvalidArgs { output }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Exit the shell immediately.
pub struct Quit {}

impl BuiltinCommand for Quit {
    fn name() -> &'static str {
        "quit"
    }

    fn execute(self, _control: &JobControl, _out: &mut dyn Write) -> Result<Flow> {
        Ok(Flow::Quit)
    }
}

#[derive(FromArgs)]
/// List the jobs in the job table.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, control: &JobControl, out: &mut dyn Write) -> Result<Flow> {
        control.lock().table.write_list(out)?;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// the job, as %JOB_NUMBER or PID.
    pub target: Option<String>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, control: &JobControl, out: &mut dyn Write) -> Result<Flow> {
        do_bgfg(Self::name(), self.target.as_deref(), JobState::Background, control, out)
    }
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it.
pub struct Fg {
    #[argh(positional)]
    /// the job, as %JOB_NUMBER or PID.
    pub target: Option<String>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, control: &JobControl, out: &mut dyn Write) -> Result<Flow> {
        do_bgfg(Self::name(), self.target.as_deref(), JobState::Foreground, control, out)
    }
}

/// Argument of `bg`/`fg`: `%N` names a job number, a bare number a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTarget {
    Job(JobNumber),
    Process(Pid),
}

#[derive(Debug, PartialEq, Eq)]
pub struct MalformedTarget;

impl FromStr for JobTarget {
    type Err = MalformedTarget;

    /// Numbers too large for their type saturate, so they name a job or
    /// process that cannot exist rather than being rejected as malformed.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        fn digits(s: &str) -> Option<&str> {
            (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())).then_some(s)
        }

        if let Some(jid) = s.strip_prefix('%') {
            let jid = digits(jid).ok_or(MalformedTarget)?;
            Ok(JobTarget::Job(jid.parse().unwrap_or(JobNumber::MAX)))
        } else {
            let pid = digits(s).ok_or(MalformedTarget)?;
            Ok(JobTarget::Process(Pid::from_raw(pid.parse().unwrap_or(i32::MAX))))
        }
    }
}

/// Shared body of `bg` and `fg`.
///
/// Resolving the job, continuing its process group and changing its state is
/// one critical section, so the reaper sees either the old or the new state,
/// never a continued job that still looks stopped.
fn do_bgfg(
    name: &str,
    target: Option<&str>,
    state: JobState,
    control: &JobControl,
    out: &mut dyn Write,
) -> Result<Flow> {
    let Some(raw) = target else {
        writeln!(out, "{name} command requires PID or %jobid argument")?;
        return Ok(Flow::Continue);
    };
    let Ok(target) = raw.parse::<JobTarget>() else {
        writeln!(out, "{name}: argument must be a PID or %jobid")?;
        return Ok(Flow::Continue);
    };

    let pid = {
        let mut shared = control.lock();
        let job = match target {
            JobTarget::Job(jid) => shared.table.find_by_job_number(jid),
            JobTarget::Process(pid) => shared.table.find_by_pid(pid),
        };
        let Some(pid) = job.map(|job| job.pid) else {
            match target {
                JobTarget::Job(_) => writeln!(out, "{raw}: No such job")?,
                JobTarget::Process(pid) => writeln!(out, "({pid}): No such process")?,
            }
            return Ok(Flow::Continue);
        };

        if let Err(e) = killpg(pid, Signal::SIGCONT) {
            tracing::warn!(pid = pid.as_raw(), error = %e, "failed to continue job");
            writeln!(out, "kill (SIGCONT) error: {e}")?;
            return Ok(Flow::Continue);
        }
        shared.table.set_state(pid, state)?;

        if state == JobState::Background {
            if let Some(job) = shared.table.find_by_pid(pid) {
                write!(out, "[{}] ({}) {}", job.jid, job.pid, job.cmdline)?;
            }
        }
        pid
    };

    if state == JobState::Foreground {
        control.wait_for_foreground_clear(pid);
    }
    Ok(Flow::Continue)
}
