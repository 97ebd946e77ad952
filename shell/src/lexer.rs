//! Lexical analysis (tokenization) of a single command line.

use thiserror::Error;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A plain argument, possibly assembled from quoted fragments.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
    /// Input redirection symbol, `<`.
    RedirectIn,
    /// Output redirection symbol, `>`.
    RedirectOut,
    /// Appending output redirection symbol, `>>`.
    RedirectAppend,
    /// Standard error redirection symbol, `2>`.
    RedirectErr,
    /// A bare `&`.
    Background,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexingError {
    /// A closing single quote was not found.
    #[error("unterminated quote")]
    UnfinishedQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    // `''` is an empty but present word, so emptiness of `buffer` is not enough.
    in_word: bool,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            in_word: false,
        }
    }

    /// Runs the machine over the whole input.
    ///
    /// Operators are recognised only at the start of a token, so `a>b` is a
    /// single word while `a >b` redirects to `b`. The pipe symbol splits
    /// stages wherever it appears outside quotes.
    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
            }
        }

        if self.state == LexingState::ReadingSingleQuote {
            return Err(LexingError::UnfinishedQuote);
        }
        self.finish_word(&mut out);

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn at_token_end(&self) -> bool {
        matches!(self.peek_char(), None | Some(' ' | '\t' | '\n' | '\r' | '|'))
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {}
            '|' => out.push(Token::Pipe),
            '<' => out.push(Token::RedirectIn),
            '>' => {
                if self.peek_char() == Some('>') {
                    self.read_char();
                    out.push(Token::RedirectAppend);
                } else {
                    out.push(Token::RedirectOut);
                }
            }
            '2' if self.peek_char() == Some('>') => {
                self.read_char();
                out.push(Token::RedirectErr);
            }
            '&' if self.at_token_end() => out.push(Token::Background),
            '\'' => {
                self.in_word = true;
                self.state = LexingState::ReadingSingleQuote;
            }
            c => {
                self.in_word = true;
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                self.finish_word(out);
                self.state = LexingState::Start;
            }
            '|' => {
                self.finish_word(out);
                out.push(Token::Pipe);
                self.state = LexingState::Start;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if self.in_word {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
            self.in_word = false;
        }
    }
}

/// Splits one input line into tokens.
///
/// # Returns
/// A vector of tokens on success, or a `LexingError` if a quote is left open.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, LexingError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
