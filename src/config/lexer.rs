//! Single-pass scanner for the configuration format
//!
//! The scanner is a small state machine over the input bytes. Short tokens
//! (operators and brackets) are returned as soon as they are seen; text,
//! numbers, the magic code and booleans are accumulated until a terminating
//! character. For numbers, the magic code and booleans the terminator is
//! significant on its own, so it is pushed back and re-read by the next call.

use crate::error::{SyntaxError, SyntaxErrorReason};
use std::fmt;

/// Magic code opening every configuration
pub const MAGIC: &str = "CIRC";

/// A lexical token, borrowing literal text from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Magic,
    /// Quoted text without the surrounding quotes
    Text(&'a str),
    /// Decimal digits
    Number(&'a str),
    Bool(bool),
    Colon,
    Equals,
    CurlyOpen,
    CurlyClose,
    SquareOpen,
    SquareClose,
    Comma,
    End,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Magic => write!(f, "{}", MAGIC),
            Token::Text(text) => write!(f, "\"{}\"", text),
            Token::Number(digits) => write!(f, "{}", digits),
            Token::Bool(value) => write!(f, "{}", value),
            Token::Colon => write!(f, "':'"),
            Token::Equals => write!(f, "'='"),
            Token::CurlyOpen => write!(f, "'{{'"),
            Token::CurlyClose => write!(f, "'}}'"),
            Token::SquareOpen => write!(f, "'['"),
            Token::SquareClose => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::End => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Text,
    Number,
    Magic,
    Bool,
}

/// Scanner over configuration text
#[derive(Debug)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Byte offset of the next unread character
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.input.as_bytes().get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    /// Give back the last character read
    fn unread(&mut self) {
        self.pos -= 1;
    }

    /// Scan the next token; `Token::End` once the input is exhausted
    pub fn next_token(&mut self) -> Result<Token<'a>, SyntaxError> {
        let mut state = State::Init;
        let mut start = self.pos;

        while let Some(byte) = self.bump() {
            match state {
                State::Init => {
                    if byte.is_ascii_whitespace() {
                        continue;
                    }
                    start = self.pos - 1;
                    match byte {
                        b'=' => return Ok(Token::Equals),
                        b':' => return Ok(Token::Colon),
                        b'[' => return Ok(Token::SquareOpen),
                        b']' => return Ok(Token::SquareClose),
                        b'{' => return Ok(Token::CurlyOpen),
                        b'}' => return Ok(Token::CurlyClose),
                        b',' => return Ok(Token::Comma),
                        b'"' => state = State::Text,
                        b'C' => state = State::Magic,
                        b'f' | b't' => state = State::Bool,
                        b'0'..=b'9' => state = State::Number,
                        _ => {
                            let c = self.input[start..].chars().next().unwrap_or('\u{fffd}');
                            return Err(SyntaxError::new(
                                start,
                                SyntaxErrorReason::UnexpectedChar(c),
                            ));
                        }
                    }
                }
                State::Text => {
                    if byte == b'"' {
                        return Ok(Token::Text(&self.input[start + 1..self.pos - 1]));
                    }
                }
                State::Number => {
                    if !byte.is_ascii_digit() {
                        self.unread();
                        return Ok(Token::Number(&self.input[start..self.pos]));
                    }
                }
                State::Magic => {
                    if !matches!(byte, b'C' | b'I' | b'R') {
                        self.unread();
                        return self.finish_word(start, state);
                    }
                }
                State::Bool => {
                    if !matches!(byte, b'a' | b'l' | b's' | b'e' | b'r' | b'u') {
                        self.unread();
                        return self.finish_word(start, state);
                    }
                }
            }
        }

        match state {
            State::Init => Ok(Token::End),
            // Digits may legitimately run up to the end of input
            State::Number => Ok(Token::Number(&self.input[start..self.pos])),
            State::Magic | State::Bool => self.finish_word(start, state),
            State::Text => Err(SyntaxError::new(
                start,
                SyntaxErrorReason::UnterminatedLiteral,
            )),
        }
    }

    /// Validate an accumulated keyword once its terminator has been seen
    fn finish_word(&self, start: usize, state: State) -> Result<Token<'a>, SyntaxError> {
        let word = &self.input[start..self.pos];
        let token = match (state, word) {
            (State::Magic, MAGIC) => Some(Token::Magic),
            (State::Bool, "true") => Some(Token::Bool(true)),
            (State::Bool, "false") => Some(Token::Bool(false)),
            _ => None,
        };
        token.ok_or_else(|| {
            let c = self.input[self.pos..].chars().next();
            let reason = match c {
                Some(c) => SyntaxErrorReason::UnexpectedChar(c),
                None => SyntaxErrorReason::UnterminatedLiteral,
            };
            SyntaxError::new(self.pos, reason)
        })
    }
}
