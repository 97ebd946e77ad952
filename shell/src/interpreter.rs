use crate::builtin::{Bg, Fg, Jobs, Quit};
use crate::command::{CommandFactory, CommandLine, CommandSpec, ExecutableCommand, Flow};
use crate::config::ShellConfig;
use crate::control::JobControl;
use crate::env::Environment;
use crate::error;
use crate::launcher::launch;
use crate::lexer::split_into_tokens;
use crate::parser::parse_command_line;
use crate::pipeline::run_pipeline;
use anyhow::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the built-in commands defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The shell's read-evaluate loop.
///
/// Each input line is lexed and parsed, then either handled by a built-in,
/// launched as a job, or run as a foreground pipeline. The job-control state
/// is shared with the reaper thread through [`JobControl`].
///
/// Example
/// ```no_run
/// use shell_jobs::Interpreter;
/// let mut sh = Interpreter::default();
/// let mut out = std::io::stdout();
/// sh.eval("sleep 1 &\n", &mut out).unwrap();
/// sh.eval("jobs\n", &mut out).unwrap();
/// ```
pub struct Interpreter {
    control: Arc<JobControl>,
    env: Environment,
    builtins: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Creates an interpreter working on `control`, with the standard built-ins.
    pub fn new(control: Arc<JobControl>, env: Environment) -> Self {
        Self {
            control,
            env,
            builtins: vec![
                Box::new(Factory::<Quit>::default()),
                Box::new(Factory::<Jobs>::default()),
                Box::new(Factory::<Bg>::default()),
                Box::new(Factory::<Fg>::default()),
            ],
        }
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    /// Evaluates one command line.
    ///
    /// User errors are written to `out` and the shell carries on; only
    /// failures of the OS primitives the shell depends on are returned.
    pub fn eval(&mut self, line: &str, out: &mut dyn Write) -> anyhow::Result<Flow> {
        let command_line = match parse(line) {
            Ok(command_line) => command_line,
            Err(e) => return settle(Err(e), out),
        };
        if command_line.is_empty() {
            return Ok(Flow::Continue);
        }

        if let [spec] = command_line.stages.as_slice() {
            if let Some(cmd) = self.builtin(spec) {
                return cmd.execute(&self.control, out);
            }
            let result = launch(
                &self.control,
                &self.env,
                spec,
                command_line.background,
                line,
                out,
            );
            return settle(result.map(|_| Flow::Continue), out);
        }

        if command_line.background {
            tracing::warn!("pipelines always run in the foreground, ignoring '&'");
        }
        let result = run_pipeline(&self.control, &self.env, &command_line.stages);
        settle(result.map(|_| Flow::Continue), out)
    }

    /// Reads and evaluates lines until end of input or `quit`.
    pub fn repl(&mut self, config: &ShellConfig) -> anyhow::Result<()> {
        let mut reader = LineReader::new(config)?;
        let mut out = io::stdout();

        while let Some(line) = reader.next_line()? {
            let flow = self.eval(&line, &mut out)?;
            out.flush()?;
            if flow == Flow::Quit {
                break;
            }
        }
        Ok(())
    }

    fn builtin(&self, spec: &CommandSpec) -> Option<Box<dyn ExecutableCommand>> {
        let args: Vec<&str> = spec.args().iter().map(String::as_str).collect();
        self.builtins
            .iter()
            .find_map(|factory| factory.try_create(spec.program(), &args))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Arc::new(JobControl::default()), Environment::new())
    }
}

fn parse(line: &str) -> error::Result<CommandLine> {
    Ok(parse_command_line(split_into_tokens(line)?)?)
}

/// Reports a non-fatal error on `out`; passes a fatal one up.
fn settle(result: error::Result<Flow>, out: &mut dyn Write) -> anyhow::Result<Flow> {
    match result {
        Ok(flow) => Ok(flow),
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, "fatal interpreter error");
            Err(e.into())
        }
        Err(e) => {
            writeln!(out, "{e}")?;
            Ok(Flow::Continue)
        }
    }
}

/// Source of command lines.
///
/// An interactive terminal gets line editing and history; anything else
/// (a script, a pipe, `-p`) is read line by line as is.
enum LineReader {
    Editor {
        editor: DefaultEditor,
        prompt: String,
    },
    Plain {
        prompt: Option<String>,
    },
}

impl LineReader {
    fn new(config: &ShellConfig) -> anyhow::Result<Self> {
        if config.emit_prompt && io::stdin().is_terminal() {
            let editor = DefaultEditor::new().context("failed to set up the line editor")?;
            return Ok(LineReader::Editor {
                editor,
                prompt: config.prompt.clone(),
            });
        }
        Ok(LineReader::Plain {
            prompt: config.emit_prompt.then(|| config.prompt.clone()),
        })
    }

    /// Next line, newline-terminated, or `None` at end of input.
    fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        match self {
            LineReader::Editor { editor, prompt } => loop {
                match editor.readline(prompt) {
                    Ok(mut line) => {
                        editor.add_history_entry(line.as_str())?;
                        line.push('\n');
                        return Ok(Some(line));
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => return Ok(None),
                    Err(err) => return Err(err).context("failed to read a command line"),
                }
            },
            LineReader::Plain { prompt } => {
                if let Some(prompt) = prompt {
                    let mut stdout = io::stdout();
                    write!(stdout, "{prompt}")?;
                    stdout.flush()?;
                }
                read_command_line(&mut io::stdin().lock())
                    .context("failed to read a command line")
            }
        }
    }
}

/// Reads one line from `input`, or `None` at end of input.
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the read.
fn read_command_line(input: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    if input.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
