//! Trace records and their line format
//!
//! Every recorded enter/exit event becomes one ASCII line:
//!
//! ```text
//! i 0x401136 8123456789 0
//! o 0x401136 8123456795 128
//! ```
//!
//! direction (`i`/`o`), function address, monotonic timestamp in
//! microseconds and correlated structure size (`0` when unknown). The format
//! is shared by buffered and direct output and is what downstream profile
//! tooling consumes, so it must not change between runs.

use crate::policy::FunctionId;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// Which hook produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Enter,
    Exit,
}

impl Direction {
    pub fn as_char(self) -> char {
        match self {
            Direction::Enter => 'i',
            Direction::Exit => 'o',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Direction::Enter),
            'o' => Some(Direction::Exit),
            _ => None,
        }
    }
}

/// One enter or exit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    pub direction: Direction,
    pub function: FunctionId,
    pub timestamp_us: u64,
    /// Correlated structure size, if one was declared for this call
    pub size: Option<u64>,
}

impl TraceRecord {
    pub fn enter(function: FunctionId, timestamp_us: u64, size: Option<u64>) -> Self {
        Self {
            direction: Direction::Enter,
            function,
            timestamp_us,
            size,
        }
    }

    pub fn exit(function: FunctionId, timestamp_us: u64, size: Option<u64>) -> Self {
        Self {
            direction: Direction::Exit,
            function,
            timestamp_us,
            size,
        }
    }

    /// Write the record as one trace line
    pub fn write_line<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self)
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.direction.as_char(),
            self.function,
            self.timestamp_us,
            self.size.unwrap_or(0)
        )
    }
}
