//! A small Unix shell with job control.
//!
//! Command lines are lexed and parsed into one or more stages. A single
//! stage is either a built-in (`quit`, `jobs`, `bg`, `fg`) run in-process, or
//! a program launched in its own process group and tracked as a job. Several
//! stages form a pipeline that runs in the foreground under one process group.
//!
//! Child status changes and keyboard signals are handled by a dedicated
//! reaper thread (see [`reaper`]), which shares the job table with the read
//! loop through [`JobControl`].

mod builtin;
pub mod command;
pub mod config;
pub mod control;
pub mod env;
pub mod error;
mod external;
mod interpreter;
pub mod jobs;
mod launcher;
pub mod lexer;
pub mod parser;
mod pipeline;
pub mod reaper;

pub use config::ShellConfig;
pub use control::JobControl;
pub use env::Environment;
pub use interpreter::Interpreter;
pub use jobs::{Job, JobState, JobTable};
