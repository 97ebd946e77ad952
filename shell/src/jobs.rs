//! The job table: a fixed-capacity registry of the processes launched by the shell.
//!
//! Slots are scanned in order, so listing shows jobs in slot order rather than by
//! job number: a slot freed by a finished job is refilled by the next launch.

use nix::unistd::Pid;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

/// Default number of slots in the table.
pub const MAX_JOBS: usize = 16;

/// Largest job number handed out before the counter wraps back to 1.
pub const MAX_JOB_NUMBER: u32 = 1 << 16;

/// Upper bound, in bytes, of the command text kept with a job.
pub const MAX_LINE: usize = 1024;

/// Job number as shown to the user (`%N`).
pub type JobNumber = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Undefined,
    Foreground,
    Background,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Undefined => "Undefined",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub pid: Pid,
    pub jid: JobNumber,
    pub state: JobState,
    /// The input line that started the job, newline-terminated.
    pub cmdline: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobTableError {
    #[error("invalid process id {0}")]
    InvalidPid(Pid),
    #[error("Tried to create too many jobs")]
    Full,
    #[error("({0}): No such process")]
    NotFound(Pid),
    #[error("job ({0}) already holds the foreground")]
    ForegroundOccupied(Pid),
}

pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_jid: JobNumber,
    verbose: bool,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new(MAX_JOBS)
    }
}

impl JobTable {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            next_jid: 1,
            verbose: false,
        }
    }

    /// Enables the `Added job ...` echo on stdout.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Registers `pid` in the first free slot and assigns it the next job number.
    pub fn add(
        &mut self,
        pid: Pid,
        state: JobState,
        cmdline: &str,
    ) -> Result<&Job, JobTableError> {
        if pid.as_raw() < 1 {
            return Err(JobTableError::InvalidPid(pid));
        }
        if state == JobState::Foreground {
            if let Some(holder) = self.foreground_pid() {
                return Err(JobTableError::ForegroundOccupied(holder));
            }
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(JobTableError::Full)?;

        let jid = self.allocate_jid();
        let job = Job {
            pid,
            jid,
            state,
            cmdline: bounded_cmdline(cmdline),
        };
        tracing::debug!(jid, pid = pid.as_raw(), %state, "job added");
        if self.verbose {
            println!("Added job [{}] {} {}", job.jid, job.pid, job.cmdline);
        }
        Ok(self.slots[index].insert(job))
    }

    /// Clears the slot holding `pid` and recomputes the next job number.
    pub fn remove(&mut self, pid: Pid) -> Result<Job, JobTableError> {
        if pid.as_raw() < 1 {
            return Err(JobTableError::InvalidPid(pid));
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|job| job.pid == pid))
            .ok_or(JobTableError::NotFound(pid))?;
        let job = slot.take().ok_or(JobTableError::NotFound(pid))?;

        self.next_jid = wrap(self.max_jid() + 1);
        tracing::debug!(jid = job.jid, pid = pid.as_raw(), "job removed");
        Ok(job)
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<&Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.list().find(|job| job.pid == pid)
    }

    pub fn find_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        if pid.as_raw() < 1 {
            return None;
        }
        self.slots.iter_mut().flatten().find(|job| job.pid == pid)
    }

    pub fn find_by_job_number(&self, jid: JobNumber) -> Option<&Job> {
        if jid < 1 {
            return None;
        }
        self.list().find(|job| job.jid == jid)
    }

    /// Pid of the job currently holding the foreground, if any.
    pub fn foreground_pid(&self) -> Option<Pid> {
        self.list()
            .find(|job| job.state == JobState::Foreground)
            .map(|job| job.pid)
    }

    /// Changes the state of the job `pid`.
    ///
    /// Moving a job to the foreground fails while another job holds it.
    pub fn set_state(&mut self, pid: Pid, state: JobState) -> Result<(), JobTableError> {
        if state == JobState::Foreground {
            if let Some(holder) = self.foreground_pid().filter(|holder| *holder != pid) {
                return Err(JobTableError::ForegroundOccupied(holder));
            }
        }
        let job = self
            .find_by_pid_mut(pid)
            .ok_or(JobTableError::NotFound(pid))?;
        tracing::debug!(jid = job.jid, pid = pid.as_raw(), from = %job.state, to = %state, "job state changed");
        job.state = state;
        Ok(())
    }

    /// Occupied slots, in slot order.
    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    /// Writes one `[J] (P) State cmdline` line per job.
    pub fn write_list(&self, out: &mut dyn Write) -> io::Result<()> {
        for job in self.list() {
            write!(out, "[{}] ({}) {} {}", job.jid, job.pid, job.state, job.cmdline)?;
        }
        Ok(())
    }

    fn max_jid(&self) -> JobNumber {
        self.list().map(|job| job.jid).max().unwrap_or(0)
    }

    /// Hands out `next_jid`, skipping numbers still held by live jobs.
    ///
    /// The table is never full here, so a free number exists.
    fn allocate_jid(&mut self) -> JobNumber {
        let mut jid = self.next_jid;
        while self.list().any(|job| job.jid == jid) {
            jid = wrap(jid + 1);
        }
        self.next_jid = wrap(jid + 1);
        jid
    }
}

fn wrap(jid: JobNumber) -> JobNumber {
    if jid > MAX_JOB_NUMBER { 1 } else { jid }
}

/// Keeps at most [`MAX_LINE`] bytes of `line`, always ending with a newline.
fn bounded_cmdline(line: &str) -> String {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let mut end = line.len().min(MAX_LINE - 1);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n", &line[..end])
}
