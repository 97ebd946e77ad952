use anyhow::Context;
use nix::libc::{STDERR_FILENO, STDOUT_FILENO};
use nix::unistd::dup2;
use shell_jobs::{Environment, Interpreter, JobControl, JobTable, ShellConfig, reaper};
use std::fs::File;
use std::io::IsTerminal;
use std::os::fd::AsFd;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Diagnostics keep the original stderr; the clone is close-on-exec.
    let log = match std::io::stderr().as_fd().try_clone_to_owned() {
        Ok(fd) => File::from(fd),
        Err(e) => {
            println!("dup error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Everything the shell and its children report goes to one stream.
    if let Err(e) = dup2(STDOUT_FILENO, STDERR_FILENO) {
        println!("dup2 error: {e}");
        return ExitCode::FAILURE;
    }

    let args: Vec<String> = std::env::args().collect();
    let config = match ShellConfig::parse_args(&args) {
        Ok(config) => config,
        Err(early) => {
            println!("{}", early.output.trim_end());
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_ansi(log.is_terminal())
        .with_writer(Mutex::new(log))
        .init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &ShellConfig) -> anyhow::Result<()> {
    let mut table = JobTable::new(config.max_jobs);
    table.set_verbose(config.verbose);
    let control = Arc::new(JobControl::new(table));

    reaper::spawn(Arc::clone(&control)).context("failed to install signal handlers")?;
    tracing::debug!(verbose = config.verbose, prompt = config.emit_prompt, "shell started");

    Interpreter::new(control, Environment::new()).repl(config)
}
