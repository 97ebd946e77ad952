//! Everything a child process needs between `fork` and `exec`.
//!
//! After `fork` only the forking thread survives in the child, and the reaper
//! thread may have held the allocator lock at that moment. [`ExecImage`] is
//! therefore built in the parent, down to the null-terminated pointer arrays
//! `execve` takes, and [`ExecImage::exec`] only performs async-signal-safe
//! calls: no allocation, no locking, no formatting.

use crate::command::CommandSpec;
use crate::env::Environment;
use crate::error::{Result, ShellError};
use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::libc::{self, c_char};
use nix::sys::stat::Mode;
use nix::unistd::{Pid, close, dup2, setpgid, write};
use std::borrow::Cow;
use std::ffi::{CStr, CString, OsStr};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

/// How a pipeline stage is connected to its neighbours.
#[derive(Debug, Default)]
pub struct StageWiring {
    /// Read end of the previous stage's pipe.
    pub stdin: Option<RawFd>,
    /// Write end of the next stage's pipe.
    pub stdout: Option<RawFd>,
    /// Every pipe descriptor of the pipeline; all are closed before exec.
    pub inherited: Vec<RawFd>,
}

/// A program with its arguments, environment and redirections, resolved and
/// converted to C strings ahead of `fork`.
#[derive(Debug)]
pub struct ExecImage {
    /// `None` when the program was not found; the child then reports it.
    program: Option<CString>,
    argv: Vec<CString>,
    envp: Vec<CString>,
    /// Null-terminated views of `argv` and `envp`. The pointees live on the
    /// heap, so they stay valid when the image itself is moved.
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
    input: Option<CString>,
    output: Option<(CString, bool)>,
    error: Option<CString>,
}

impl ExecImage {
    pub fn prepare(env: &Environment, spec: &CommandSpec) -> Result<Self> {
        let program = find_command_path(
            env.get_var("PATH").unwrap_or_default(),
            Path::new(spec.program()),
        )
        .map(|path| {
            let bytes = path.as_os_str().as_bytes();
            CString::new(bytes).map_err(|_| ShellError::NulByte(path.display().to_string()))
        })
        .transpose()?;

        let argv = spec
            .argv
            .iter()
            .map(|arg| c_string(arg))
            .collect::<Result<Vec<_>>>()?;
        let envp = env.to_envp();

        let r = &spec.redirections;
        Ok(Self {
            program,
            argv_ptrs: null_terminated(&argv),
            envp_ptrs: null_terminated(&envp),
            argv,
            envp,
            input: r.input.as_deref().map(c_string).transpose()?,
            output: r
                .output
                .as_ref()
                .map(|o| c_string(&o.path).map(|path| (path, o.append)))
                .transpose()?,
            error: r.error.as_deref().map(c_string).transpose()?,
        })
    }

    /// Drops the `<` redirection (interior and last pipeline stages).
    pub fn without_input(mut self) -> Self {
        self.input = None;
        self
    }

    /// Drops the `>`/`>>` redirection (all pipeline stages but the last).
    pub fn without_output(mut self) -> Self {
        self.output = None;
        self
    }

    /// Drops the `2>` redirection (pipeline stages).
    pub fn without_error(mut self) -> Self {
        self.error = None;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.program.is_some()
    }

    /// Child side of a launch. Never returns.
    ///
    /// Joins process group `pgid` (0 for a new group led by this process),
    /// connects the pipeline wiring, applies redirections and executes the
    /// program. Any failure is reported on stderr and ends the child with
    /// status 1.
    pub fn exec(&self, pgid: Pid, wiring: &StageWiring) -> ! {
        // The parent makes the same call; whichever runs second may fail harmlessly.
        let _ = setpgid(Pid::from_raw(0), pgid);

        if let Some(fd) = wiring.stdin {
            let _ = dup2(fd, libc::STDIN_FILENO);
        }
        if let Some(fd) = wiring.stdout {
            let _ = dup2(fd, libc::STDOUT_FILENO);
        }
        for fd in &wiring.inherited {
            let _ = close(*fd);
        }

        let create = OFlag::O_WRONLY | OFlag::O_CREAT;
        if let Some(path) = &self.input {
            redirect(path, OFlag::O_RDONLY, libc::STDIN_FILENO);
        }
        if let Some((path, append)) = &self.output {
            let mode = if *append { OFlag::O_APPEND } else { OFlag::O_TRUNC };
            redirect(path, create | mode, libc::STDOUT_FILENO);
        }
        if let Some(path) = &self.error {
            redirect(path, create | OFlag::O_TRUNC, libc::STDERR_FILENO);
        }

        let name = self.argv.first().map(|arg| arg.to_bytes()).unwrap_or_default();
        match &self.program {
            Some(program) => {
                // SAFETY: both arrays are null-terminated and point into
                // CStrings owned by `self`, which outlives the call.
                unsafe {
                    libc::execve(
                        program.as_ptr(),
                        self.argv_ptrs.as_ptr(),
                        self.envp_ptrs.as_ptr(),
                    )
                };
                let errno = Errno::last();
                die(&[name, b": ", errno.desc().as_bytes(), b"\n"])
            }
            None => die(&[name, b": Command not found\n"]),
        }
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| ShellError::NulByte(s.replace('\0', "\\0")))
}

/// Opens `path` and rebinds `target` to it, or ends the child.
fn redirect(path: &CStr, flags: OFlag, target: RawFd) {
    let mode = Mode::from_bits_truncate(0o644);
    match open(path, flags, mode) {
        Ok(fd) if fd == target => {}
        Ok(fd) => {
            if let Err(errno) = dup2(fd, target) {
                report_and_die(path, errno);
            }
            let _ = close(fd);
        }
        Err(errno) => report_and_die(path, errno),
    }
}

fn report_and_die(path: &CStr, errno: Errno) -> ! {
    die(&[path.to_bytes(), b": ", errno.desc().as_bytes(), b"\n"])
}

/// Writes `parts` to stderr and terminates the child without running any
/// exit handlers or flushing buffers inherited from the parent.
fn die(parts: &[&[u8]]) -> ! {
    let stderr = std::io::stderr();
    for part in parts {
        let _ = write(&stderr, part);
    }
    unsafe { libc::_exit(1) }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo`: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing regular file.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => {
            // Empty path -> not found
            None
        }
        (Some(x), None) => {
            // Single component -> search in PATH
            find_in_path(search_paths, x.as_os_str()).map(Cow::Owned)
        }
        _ => {
            // Multiple components -> search in current dir
            find_by_path(path).map(Cow::Borrowed)
        }
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}
