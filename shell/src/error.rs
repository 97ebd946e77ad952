use crate::jobs::JobTableError;
use crate::lexer::LexingError;
use crate::parser::ParsingError;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("{0}")]
    Lexing(#[from] LexingError),

    #[error("{0}")]
    Parsing(#[from] ParsingError),

    #[error("{0}")]
    JobTable(#[from] JobTableError),

    #[error("{0}: argument contains a NUL byte")]
    NulByte(String),

    #[error("fork error: {0}")]
    Fork(Errno),

    #[error("pipe error: {0}")]
    Pipe(Errno),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Whether the interpreter must stop after reporting this error.
    ///
    /// Only failing OS primitives are fatal; everything else abandons the
    /// current command line.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShellError::Fork(_) | ShellError::Pipe(_) | ShellError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_os_failures_are_fatal() {
        assert!(ShellError::Fork(Errno::EAGAIN).is_fatal());
        assert!(ShellError::Pipe(Errno::EMFILE).is_fatal());
        assert!(!ShellError::JobTable(JobTableError::Full).is_fatal());
        assert!(!ShellError::Parsing(ParsingError::EmptyStage).is_fatal());
    }

    #[test]
    fn test_user_errors_display_their_cause() {
        let err = ShellError::from(JobTableError::Full);
        assert_eq!(err.to_string(), "Tried to create too many jobs");
        let err = ShellError::NulByte("a\0b".to_string());
        assert!(err.to_string().ends_with("argument contains a NUL byte"));
    }
}
