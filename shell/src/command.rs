use crate::control::JobControl;
use anyhow::Result;
use std::fmt;
use std::io::Write;

/// What the read loop should do after a command line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Object-safe trait for any command the shell runs in-process.
///
/// Implemented by the built-ins via a blanket impl.
pub trait ExecutableCommand {
    /// Executes the command against the shared job-control state.
    fn execute(self: Box<Self>, control: &JobControl, out: &mut dyn Write) -> Result<Flow>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}

/// Target of a standard output redirection (`>FILE` or `>>FILE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// File to write to.
    pub path: String,
    /// `true` for `>>` (append), `false` for `>` (truncate).
    pub append: bool,
}

/// Redirections requested for a single command.
///
/// When the same stream is redirected more than once the last target wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirections {
    /// `<FILE`: standard input is read from this file.
    pub input: Option<String>,
    /// `>FILE` / `>>FILE`: standard output is written to this file.
    pub output: Option<OutputTarget>,
    /// `2>FILE`: standard error is written to this file (always truncated).
    pub error: Option<String>,
}

impl Redirections {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none() && self.error.is_none()
    }
}

/// One parsed command: program, arguments and redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// `argv[0]` is the program name, the rest are its arguments.
    pub argv: Vec<String>,
    pub redirections: Redirections,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            redirections: Redirections::default(),
        }
    }

    /// Name of the program to run.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// A full input line: one or more pipeline stages and the background flag.
///
/// A blank line parses into a `CommandLine` without stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub stages: Vec<CommandSpec>,
    /// Set by a trailing bare `&`.
    pub background: bool,
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))?;
        let r = &self.redirections;
        if let Some(input) = &r.input {
            write!(f, " <{input}")?;
        }
        if let Some(output) = &r.output {
            let op = if output.append { ">>" } else { ">" };
            write!(f, " {op}{}", output.path)?;
        }
        if let Some(error) = &r.error {
            write!(f, " 2>{error}")?;
        }
        Ok(())
    }
}
