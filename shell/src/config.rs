use crate::jobs::MAX_JOBS;
use argh::{EarlyExit, FromArgs};

pub const DEFAULT_PROMPT: &str = "tsh> ";

#[derive(FromArgs, Debug, Default, PartialEq, Eq)]
/// A tiny shell with job control.
pub struct ShellArgs {
    /// print additional diagnostic information.
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// do not emit a command prompt.
    #[argh(switch, short = 'p')]
    pub no_prompt: bool,
}

/// Settings the shell runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Echo job-table additions (`Added job ...`).
    pub verbose: bool,
    pub emit_prompt: bool,
    pub prompt: String,
    pub max_jobs: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            emit_prompt: true,
            prompt: DEFAULT_PROMPT.to_string(),
            max_jobs: MAX_JOBS,
        }
    }
}

impl From<ShellArgs> for ShellConfig {
    fn from(args: ShellArgs) -> Self {
        Self {
            verbose: args.verbose,
            emit_prompt: !args.no_prompt,
            ..Self::default()
        }
    }
}

impl ShellConfig {
    /// Builds the configuration from the full argument vector, program name first.
    ///
    /// Clustered short flags (`-vp`) are accepted and `-h` asks for the usage
    /// text. Any [`EarlyExit`], help included, means the shell must not start.
    pub fn parse_args(args: &[String]) -> Result<Self, EarlyExit> {
        let (name, rest) = match args.split_first() {
            Some((name, rest)) => (name.as_str(), rest),
            None => ("shell", &[][..]),
        };
        let flags = expand_flags(rest);
        let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
        ShellArgs::from_args(&[name], &flags).map(Self::from)
    }
}

fn expand_flags(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| match arg.strip_prefix('-') {
            Some(cluster) if !cluster.is_empty() && !cluster.starts_with('-') => cluster
                .chars()
                .map(|flag| match flag {
                    'h' => "--help".to_string(),
                    flag => format!("-{flag}"),
                })
                .collect(),
            _ => vec![arg.clone()],
        })
        .collect()
}
