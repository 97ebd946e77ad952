use crate::command::{CommandLine, CommandSpec, OutputTarget};
use crate::lexer::Token;
use thiserror::Error;

/// Errors that can occur while assembling tokens into a [`CommandLine`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsingError {
    /// A redirection operator was not followed by a file name.
    #[error("missing file name after `{0}`")]
    MissingTarget(&'static str),
    /// A pipeline stage has no program (e.g. `| wc` or `cat |`).
    #[error("empty command in pipeline")]
    EmptyStage,
    /// `&` appeared somewhere other than the end of the line.
    #[error("`&` is only allowed at the end of a command line")]
    MisplacedBackground,
}

struct CommandLineBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl CommandLineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        CommandLineBuilder { tokens, pos: 0 }
    }

    fn build(mut self) -> Result<CommandLine, ParsingError> {
        let background = self.take_background()?;
        if self.tokens.is_empty() {
            return Ok(CommandLine::default());
        }

        let mut stages = vec![self.parse_stage()?];
        while self.consume().is_some() {
            // The only token that ends a stage is a pipe.
            stages.push(self.parse_stage()?);
        }

        Ok(CommandLine { stages, background })
    }

    /// Strips a trailing `&` and rejects any other occurrence.
    fn take_background(&mut self) -> Result<bool, ParsingError> {
        let background = self.tokens.last() == Some(&Token::Background);
        if background {
            self.tokens.pop();
        }
        if self.tokens.contains(&Token::Background) {
            return Err(ParsingError::MisplacedBackground);
        }
        Ok(background)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_target(&mut self, operator: &'static str) -> Result<String, ParsingError> {
        match self.consume() {
            Some(Token::Word(target)) => Ok(target),
            _ => Err(ParsingError::MissingTarget(operator)),
        }
    }

    /// Parses tokens up to (not including) the next pipe.
    fn parse_stage(&mut self) -> Result<CommandSpec, ParsingError> {
        let mut spec = CommandSpec::new(Vec::new());

        while let Some(token) = self.peek() {
            if *token == Token::Pipe {
                break;
            }
            match self.consume() {
                Some(Token::Word(w)) => spec.argv.push(w),
                Some(Token::RedirectIn) => {
                    spec.redirections.input = Some(self.expect_target("<")?);
                }
                Some(Token::RedirectOut) => {
                    spec.redirections.output = Some(OutputTarget {
                        path: self.expect_target(">")?,
                        append: false,
                    });
                }
                Some(Token::RedirectAppend) => {
                    spec.redirections.output = Some(OutputTarget {
                        path: self.expect_target(">>")?,
                        append: true,
                    });
                }
                Some(Token::RedirectErr) => {
                    spec.redirections.error = Some(self.expect_target("2>")?);
                }
                _ => unreachable!("pipes stop the loop and `&` was removed earlier"),
            }
        }

        if spec.argv.is_empty() {
            return Err(ParsingError::EmptyStage);
        }
        Ok(spec)
    }
}

/// Assembles the tokens of one input line into pipeline stages.
///
/// A line without tokens yields an empty [`CommandLine`].
pub fn parse_command_line(tokens: Vec<Token>) -> Result<CommandLine, ParsingError> {
    CommandLineBuilder::from(tokens).build()
}
