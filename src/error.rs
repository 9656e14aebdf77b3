//! Error types and process exit statuses
//!
//! Configuration and trace output failures are fatal for an instrumented
//! process. Each failure class maps to a stable exit status so the tooling
//! that launched the target can tell them apart without reading stderr.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Process exit statuses used when the runtime has to terminate the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitStatus {
    /// The trace output file could not be opened
    TraceOutputOpen = 1,
    /// The trace output file failed while writing or closing
    TraceOutputClosed = 2,
    /// The configuration file does not exist or cannot be read
    ConfigMissing = 11,
    /// The configuration file is malformed
    ConfigSyntax = 12,
}

impl ExitStatus {
    /// Numeric status passed to `exit`
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human-readable description used by the `circ` binary
    pub fn describe(self) -> &'static str {
        match self {
            ExitStatus::TraceOutputOpen => "trace output cannot be opened",
            ExitStatus::TraceOutputClosed => "trace output closed unexpectedly",
            ExitStatus::ConfigMissing => "configuration file missing",
            ExitStatus::ConfigSyntax => "configuration syntax error",
        }
    }
}

/// Why the configuration text was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxErrorReason {
    /// A character that cannot start any token
    UnexpectedChar(char),
    /// Input ended inside a multi-character token
    UnterminatedLiteral,
    /// A token of the wrong kind for the current grammar position
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },
    /// A quoted key that names no known section
    UnknownSection(String),
    /// The same section appeared twice
    DuplicateSection(&'static str),
    /// A sampling entry key other than the one required at that position
    UnexpectedKey {
        expected: &'static str,
        found: String,
    },
    /// An address literal that does not fit a pointer
    InvalidAddress(String),
    /// A numeric literal that does not fit its target type
    NumberOutOfRange(String),
}

impl fmt::Display for SyntaxErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxErrorReason::UnexpectedChar(c) => write!(f, "unexpected character {:?}", c),
            SyntaxErrorReason::UnterminatedLiteral => write!(f, "unterminated literal"),
            SyntaxErrorReason::UnexpectedToken { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            SyntaxErrorReason::UnknownSection(name) => write!(f, "unknown section {}", name),
            SyntaxErrorReason::DuplicateSection(name) => {
                write!(f, "section \"{}\" declared more than once", name)
            }
            SyntaxErrorReason::UnexpectedKey { expected, found } => {
                write!(f, "expected key \"{}\", found {}", expected, found)
            }
            SyntaxErrorReason::InvalidAddress(text) => {
                write!(f, "invalid function address {}", text)
            }
            SyntaxErrorReason::NumberOutOfRange(text) => {
                write!(f, "number {} is out of range", text)
            }
        }
    }
}

/// A syntax failure at a byte offset of the configuration text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at offset {offset}: {reason}")]
pub struct SyntaxError {
    pub offset: usize,
    pub reason: SyntaxErrorReason,
}

impl SyntaxError {
    pub fn new(offset: usize, reason: SyntaxErrorReason) -> Self {
        Self { offset, reason }
    }
}

/// Coarse classification of configuration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    Missing,
    Syntax,
}

/// Errors that can occur while loading the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file {} is missing: {source}", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file is not valid UTF-8")]
    Encoding,

    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl ConfigError {
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            ConfigError::Missing { .. } => ConfigErrorKind::Missing,
            ConfigError::Encoding | ConfigError::Syntax(_) => ConfigErrorKind::Syntax,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self.kind() {
            ConfigErrorKind::Missing => ExitStatus::ConfigMissing,
            ConfigErrorKind::Syntax => ExitStatus::ConfigSyntax,
        }
    }
}

/// Errors raised by the trace output
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to open trace output {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write trace output: {0}")]
    Write(#[source] io::Error),

    #[error("failed to close trace output: {0}")]
    Close(#[source] io::Error),
}

impl TraceError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            TraceError::Open { .. } => ExitStatus::TraceOutputOpen,
            TraceError::Write(_) | TraceError::Close(_) => ExitStatus::TraceOutputClosed,
        }
    }
}
