//! Grammar driver for the configuration format
//!
//! ```text
//! CIRC = {
//!   "internal_data_filename": "trace.log",
//!   "internal_storage_size": 20000,
//!   "internal_direct_output": false,
//!   "runtime_filter": [4198694, 4198816],
//!   "sampling": [{"func": 4199012, "sample": 10}]
//! }
//! ```
//!
//! Sections are optional and may come in any order, but each may appear at
//! most once. The parser builds a fresh [`Configuration`] and only hands it
//! back when the whole input was accepted.

use super::lexer::{Lexer, Token};
use super::Configuration;
use crate::error::{SyntaxError, SyntaxErrorReason};
use crate::policy::FunctionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    FileName,
    StorageSize,
    DirectOutput,
    RuntimeFilter,
    Sampling,
}

impl Section {
    const COUNT: usize = 5;

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "internal_data_filename" => Some(Section::FileName),
            "internal_storage_size" => Some(Section::StorageSize),
            "internal_direct_output" => Some(Section::DirectOutput),
            "runtime_filter" => Some(Section::RuntimeFilter),
            "sampling" => Some(Section::Sampling),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Section::FileName => "internal_data_filename",
            Section::StorageSize => "internal_storage_size",
            Section::DirectOutput => "internal_direct_output",
            Section::RuntimeFilter => "runtime_filter",
            Section::Sampling => "sampling",
        }
    }
}

/// Parse configuration text into a fully populated configuration
pub fn parse(input: &str) -> Result<Configuration, SyntaxError> {
    Parser::new(input).parse()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    /// Offset where the most recent token started
    token_offset: usize,
    seen: [bool; Section::COUNT],
    config: Configuration,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: Lexer::new(input),
            token_offset: 0,
            seen: [false; Section::COUNT],
            config: Configuration::default(),
        }
    }

    fn parse(mut self) -> Result<Configuration, SyntaxError> {
        self.expect(Token::Magic, "magic code CIRC")?;
        self.expect(Token::Equals, "'='")?;
        self.expect(Token::CurlyOpen, "'{'")?;

        let mut token = self.next()?;
        if token != Token::CurlyClose {
            loop {
                let key = match token {
                    Token::Text(key) => key,
                    other => return Err(self.unexpected("section name", other)),
                };
                self.section(key)?;

                match self.next()? {
                    Token::CurlyClose => break,
                    Token::Comma => token = self.next()?,
                    other => return Err(self.unexpected("',' or '}'", other)),
                }
            }
        }

        self.expect(Token::End, "end of input")?;
        Ok(self.config)
    }

    fn section(&mut self, key: &str) -> Result<(), SyntaxError> {
        let section = Section::from_key(key).ok_or_else(|| {
            SyntaxError::new(
                self.token_offset,
                SyntaxErrorReason::UnknownSection(format!("\"{}\"", key)),
            )
        })?;
        if std::mem::replace(&mut self.seen[section as usize], true) {
            return Err(SyntaxError::new(
                self.token_offset,
                SyntaxErrorReason::DuplicateSection(section.key()),
            ));
        }

        self.expect(Token::Colon, "':'")?;
        match section {
            Section::FileName => {
                self.config.trace_file_name = self.text()?.to_string();
            }
            Section::StorageSize => {
                let digits = self.number()?;
                self.config.initial_capacity = digits.parse().map_err(|_| {
                    SyntaxError::new(
                        self.token_offset,
                        SyntaxErrorReason::NumberOutOfRange(digits.to_string()),
                    )
                })?;
            }
            Section::DirectOutput => {
                self.config.direct_output = self.boolean()?;
            }
            Section::RuntimeFilter => self.filter_list()?,
            Section::Sampling => self.sampling_list()?,
        }
        Ok(())
    }

    /// `[ address, address, ... ]`
    fn filter_list(&mut self) -> Result<(), SyntaxError> {
        self.expect(Token::SquareOpen, "'['")?;
        let mut token = self.next()?;
        if token == Token::SquareClose {
            return Ok(());
        }
        loop {
            let func = match token {
                Token::Number(digits) => self.address(digits)?,
                other => return Err(self.unexpected("function address", other)),
            };
            self.config.policies.insert_filter(func);

            match self.next()? {
                Token::SquareClose => return Ok(()),
                Token::Comma => token = self.next()?,
                other => return Err(self.unexpected("',' or ']'", other)),
            }
        }
    }

    /// `[ { "func": address, "sample": ratio }, ... ]`
    fn sampling_list(&mut self) -> Result<(), SyntaxError> {
        self.expect(Token::SquareOpen, "'['")?;
        let mut token = self.next()?;
        if token == Token::SquareClose {
            return Ok(());
        }
        loop {
            if token != Token::CurlyOpen {
                return Err(self.unexpected("'{'", token));
            }
            self.key("func")?;
            let digits = self.number()?;
            let func = self.address(digits)?;
            self.expect(Token::Comma, "','")?;
            self.key("sample")?;
            let digits = self.number()?;
            let ratio: u32 = digits.parse().map_err(|_| {
                SyntaxError::new(
                    self.token_offset,
                    SyntaxErrorReason::NumberOutOfRange(digits.to_string()),
                )
            })?;
            self.expect(Token::CurlyClose, "'}'")?;

            self.config.policies.insert_sample(func, ratio);

            match self.next()? {
                Token::SquareClose => return Ok(()),
                Token::Comma => token = self.next()?,
                other => return Err(self.unexpected("',' or ']'", other)),
            }
        }
    }

    /// `"name" :`
    fn key(&mut self, name: &'static str) -> Result<(), SyntaxError> {
        let found = self.text()?;
        if found != name {
            return Err(SyntaxError::new(
                self.token_offset,
                SyntaxErrorReason::UnexpectedKey {
                    expected: name,
                    found: format!("\"{}\"", found),
                },
            ));
        }
        self.expect(Token::Colon, "':'")
    }

    fn address(&self, digits: &str) -> Result<FunctionId, SyntaxError> {
        digits.parse::<usize>().map(FunctionId).map_err(|_| {
            SyntaxError::new(
                self.token_offset,
                SyntaxErrorReason::InvalidAddress(digits.to_string()),
            )
        })
    }

    fn text(&mut self) -> Result<&'a str, SyntaxError> {
        match self.next()? {
            Token::Text(text) => Ok(text),
            other => Err(self.unexpected("quoted text", other)),
        }
    }

    fn number(&mut self) -> Result<&'a str, SyntaxError> {
        match self.next()? {
            Token::Number(digits) => Ok(digits),
            other => Err(self.unexpected("number", other)),
        }
    }

    fn boolean(&mut self) -> Result<bool, SyntaxError> {
        match self.next()? {
            Token::Bool(value) => Ok(value),
            other => Err(self.unexpected("true or false", other)),
        }
    }

    fn expect(&mut self, expected: Token<'static>, what: &'static str) -> Result<(), SyntaxError> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(self.unexpected(what, token))
        }
    }

    fn next(&mut self) -> Result<Token<'a>, SyntaxError> {
        let token = self.lexer.next_token()?;
        self.token_offset = self.lexer.offset() - token_len(&token);
        Ok(token)
    }

    fn unexpected(&self, expected: &'static str, found: Token<'_>) -> SyntaxError {
        SyntaxError::new(
            self.token_offset,
            SyntaxErrorReason::UnexpectedToken {
                expected,
                found: found.to_string(),
            },
        )
    }
}

/// Source length of a token, used to recover its start offset
fn token_len(token: &Token<'_>) -> usize {
    match token {
        Token::Magic => super::lexer::MAGIC.len(),
        Token::Text(text) => text.len() + 2,
        Token::Number(digits) => digits.len(),
        Token::Bool(true) => 4,
        Token::Bool(false) => 5,
        Token::End => 0,
        _ => 1,
    }
}
