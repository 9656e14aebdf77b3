//! Offline trace reader
//!
//! Reads the line format written by the recorder back into
//! [`TraceRecord`]s and pairs enter/exit records into per-call samples for
//! the `circ calls` and `circ summary` commands.

use crate::policy::FunctionId;
use crate::record::{Direction, TraceRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, BufRead};
use thiserror::Error;

/// Why a single trace line was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceLineError {
    #[error("expected 3 or 4 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown direction `{0}`")]
    Direction(String),

    #[error("invalid function address `{0}`")]
    Function(String),

    #[error("invalid timestamp `{0}`")]
    Timestamp(String),

    #[error("invalid size `{0}`")]
    Size(String),
}

#[derive(Debug, Error)]
pub enum TraceLogError {
    #[error("failed to read trace: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: TraceLineError,
    },

    #[error("exit of {exit} while {open} is still open")]
    Mismatch { open: FunctionId, exit: FunctionId },
}

/// One completed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallSample {
    pub function: FunctionId,
    pub start_us: u64,
    pub duration_us: u64,
    pub size: u64,
}

/// Aggregated timing of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionSummary {
    pub function: FunctionId,
    pub calls: u64,
    pub total_us: u64,
    pub mean_us: u64,
}

/// Parse one trace line (`i 0x401136 1000 64`; the size may be omitted)
pub fn parse_line(line: &str) -> Result<TraceRecord, TraceLineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(TraceLineError::FieldCount(fields.len()));
    }

    let mut chars = fields[0].chars();
    let direction = match (chars.next().and_then(Direction::from_char), chars.next()) {
        (Some(direction), None) => direction,
        _ => return Err(TraceLineError::Direction(fields[0].to_string())),
    };

    let digits = fields[1].strip_prefix("0x").unwrap_or(fields[1]);
    let function = usize::from_str_radix(digits, 16)
        .map(FunctionId)
        .map_err(|_| TraceLineError::Function(fields[1].to_string()))?;

    let timestamp_us = fields[2]
        .parse::<u64>()
        .map_err(|_| TraceLineError::Timestamp(fields[2].to_string()))?;

    let size = match fields.get(3) {
        Some(field) => field
            .parse::<u64>()
            .map_err(|_| TraceLineError::Size(field.to_string()))?,
        None => 0,
    };

    Ok(TraceRecord {
        direction,
        function,
        timestamp_us,
        size: (size != 0).then_some(size),
    })
}

/// Parse a whole trace, skipping blank lines
pub fn read_trace<R: BufRead>(reader: R) -> Result<Vec<TraceRecord>, TraceLogError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_line(&line).map_err(|source| TraceLogError::Line {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Pair every exit with the innermost open enter of the same function.
///
/// Enters left open by a non-local exit are dropped when an outer call of
/// another function returns. An exit with nothing open (the call began before
/// tracing started) is skipped. An exit for a function that is not open at
/// all while others are is a mismatch.
pub fn pair_calls(records: &[TraceRecord]) -> Result<Vec<CallSample>, TraceLogError> {
    let mut open: Vec<&TraceRecord> = Vec::new();
    let mut samples = Vec::new();

    for record in records {
        match record.direction {
            Direction::Enter => open.push(record),
            Direction::Exit => {
                let Some(top) = open.last() else {
                    continue;
                };
                let Some(index) = open.iter().rposition(|enter| enter.function == record.function)
                else {
                    return Err(TraceLogError::Mismatch {
                        open: top.function,
                        exit: record.function,
                    });
                };
                let enter = open[index];
                open.truncate(index);
                samples.push(CallSample {
                    function: record.function,
                    start_us: enter.timestamp_us,
                    duration_us: record.timestamp_us.saturating_sub(enter.timestamp_us),
                    size: record.size.or(enter.size).unwrap_or(0),
                });
            }
        }
    }

    Ok(samples)
}

/// Per-function totals, most expensive first
pub fn summarize(samples: &[CallSample]) -> Vec<FunctionSummary> {
    let mut totals: HashMap<FunctionId, (u64, u64)> = HashMap::new();
    for sample in samples {
        let entry = totals.entry(sample.function).or_default();
        entry.0 += 1;
        entry.1 += sample.duration_us;
    }

    let mut summary: Vec<FunctionSummary> = totals
        .into_iter()
        .map(|(function, (calls, total_us))| FunctionSummary {
            function,
            calls,
            total_us,
            mean_us: total_us / calls,
        })
        .collect();
    summary.sort_by(|a, b| b.total_us.cmp(&a.total_us).then(a.function.cmp(&b.function)));
    summary
}
