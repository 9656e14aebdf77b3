//! Process-lifetime trace recorder
//!
//! The recorder owns the trace output and the per-function policy table. It
//! is invoked twice per instrumented call: once from the entry hook and once
//! from the exit hook.
//!
//! # Lifecycle
//!
//! ```text
//! Ready ──(buffer reaches capacity)──▶ Flushing ──▶ Ready
//!   │
//!   └──(close)──▶ Closed
//! ```
//!
//! # Output modes
//!
//! - **Direct**: every record is written and flushed immediately. The trace is
//!   complete up to the last hook even if the host crashes.
//! - **Buffered**: records accumulate in memory and are written in bulk once
//!   the configured capacity is reached, and at close. Records still buffered
//!   when the host dies abnormally are lost.
//!
//! # Enter/exit pairing
//!
//! A shadow call stack remembers, for every open call, whether its entry was
//! recorded. The exit hook reuses that decision instead of consulting the
//! sampling counter again, so an enter record always has its exit record and
//! vice versa. Each thread has its own shadow stack: hooks from different
//! threads interleave freely, but calls only nest within a thread.

use crate::clock::{Clock, MonotonicClock};
use crate::config::{Configuration, DEFAULT_INITIAL_CAPACITY};
use crate::error::TraceError;
use crate::policy::{FunctionId, PolicyTable};
use crate::record::TraceRecord;
use crate::size_stack::{FrameAddr, SizeCorrelationStack};
use fnv::FnvHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Write buffer used in front of the trace file
const FILE_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Ready,
    Flushing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Direct,
    Buffered { capacity: usize },
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Records emitted (written or buffered)
    pub recorded: u64,
    /// Bulk flushes performed in buffered mode
    pub flushes: u64,
}

/// Identity of the thread a hook fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey(pub u64);

#[derive(Debug, Clone, Copy)]
struct OpenCall {
    function: FunctionId,
    recorded: bool,
    size: Option<u64>,
}

/// Trace recorder writing to `W`, timestamped by `C`
#[derive(Debug)]
pub struct Recorder<W: Write, C: Clock = MonotonicClock> {
    writer: W,
    clock: C,
    policies: PolicyTable,
    mode: OutputMode,
    buffer: Vec<TraceRecord>,
    calls: FnvHashMap<ThreadKey, Vec<OpenCall>>,
    state: RecorderState,
    stats: RecorderStats,
}

impl Recorder<BufWriter<File>, MonotonicClock> {
    /// Open the configured trace file (truncating it) and build a recorder
    pub fn create(config: Configuration) -> Result<Self, TraceError> {
        let path = PathBuf::from(&config.trace_file_name);
        let file = File::create(&path).map_err(|source| TraceError::Open {
            path: path.clone(),
            source,
        })?;
        info!(
            output = %path.display(),
            direct = config.direct_output,
            capacity = config.initial_capacity,
            "trace output opened"
        );
        Ok(Self::new(
            config,
            BufWriter::with_capacity(FILE_BUFFER_BYTES, file),
            MonotonicClock,
        ))
    }
}

impl<W: Write, C: Clock> Recorder<W, C> {
    pub fn new(config: Configuration, writer: W, clock: C) -> Self {
        let (mode, buffer) = if config.direct_output {
            (OutputMode::Direct, Vec::new())
        } else {
            reserve_buffer(config.initial_capacity)
        };

        info!(
            filtered = config.policies.filtered_count(),
            sampled = config.policies.sampled_count(),
            mode = ?mode,
            "recorder ready"
        );

        Self {
            writer,
            clock,
            policies: config.policies,
            mode,
            buffer,
            calls: FnvHashMap::default(),
            state: RecorderState::Ready,
            stats: RecorderStats::default(),
        }
    }

    /// Entry hook.
    ///
    /// Decides once whether this call is recorded. When it is, a size
    /// declared for the call's frame is taken and attached; when it is not,
    /// that declaration is discarded so no other call can pick it up.
    /// `frame` is only resolved if declarations are pending.
    pub fn enter(
        &mut self,
        thread: ThreadKey,
        function: FunctionId,
        sizes: &mut SizeCorrelationStack,
        frame: impl FnOnce() -> Option<FrameAddr>,
    ) -> Result<(), TraceError> {
        if self.state == RecorderState::Closed {
            return Ok(());
        }

        let recorded = self.policies.should_record(function);
        let mut size = None;
        if !sizes.is_empty() {
            if let Some(frame) = frame() {
                if recorded {
                    size = sizes.take(frame);
                } else {
                    sizes.discard(frame);
                }
            }
        }

        self.calls.entry(thread).or_default().push(OpenCall {
            function,
            recorded,
            size,
        });

        if recorded {
            let now = self.clock.now_us();
            self.emit(TraceRecord::enter(function, now, size))?;
        }
        Ok(())
    }

    /// Exit hook.
    ///
    /// Reuses the decision made at entry. A size declared inside the call
    /// replaces the one taken at entry. Declarations left behind by the call
    /// (early returns, unrecorded callees) are purged.
    pub fn exit(
        &mut self,
        thread: ThreadKey,
        function: FunctionId,
        sizes: &mut SizeCorrelationStack,
        frame: impl FnOnce() -> Option<FrameAddr>,
    ) -> Result<(), TraceError> {
        if self.state == RecorderState::Closed {
            return Ok(());
        }

        let now = self.clock.now_us();
        let (recorded, mut size) = match self.pop_call(thread, function) {
            Some(call) => (call.recorded, call.size),
            // Entered before the recorder existed; never touch the sample counter here
            None => (self.policies.lookup(function).records_unconditionally(), None),
        };

        if !sizes.is_empty() {
            if let Some(frame) = frame() {
                if recorded {
                    if let Some(inner) = sizes.take(frame) {
                        size = Some(inner);
                    }
                }
                sizes.purge(frame);
            }
        }

        if recorded {
            self.emit(TraceRecord::exit(function, now, size))?;
        }
        Ok(())
    }

    /// Pop the innermost open call of `function` on `thread`, dropping calls
    /// above it that were abandoned by a non-local exit.
    fn pop_call(&mut self, thread: ThreadKey, function: FunctionId) -> Option<OpenCall> {
        let calls = self.calls.get_mut(&thread)?;
        let index = calls.iter().rposition(|call| call.function == function)?;
        calls.truncate(index + 1);
        let call = calls.pop();
        if calls.is_empty() {
            self.calls.remove(&thread);
        }
        call
    }

    fn emit(&mut self, record: TraceRecord) -> Result<(), TraceError> {
        match self.mode {
            OutputMode::Direct => {
                record
                    .write_line(&mut self.writer)
                    .and_then(|()| self.writer.flush())
                    .map_err(TraceError::Write)?;
                self.stats.recorded += 1;
            }
            OutputMode::Buffered { capacity } => {
                self.buffer.push(record);
                self.stats.recorded += 1;
                if self.buffer.len() >= capacity {
                    self.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Write every buffered record to the output
    pub fn flush(&mut self) -> Result<(), TraceError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.state = RecorderState::Flushing;
        let count = self.buffer.len();
        for record in self.buffer.drain(..) {
            record.write_line(&mut self.writer).map_err(TraceError::Write)?;
        }
        self.writer.flush().map_err(TraceError::Write)?;
        self.stats.flushes += 1;
        self.state = RecorderState::Ready;
        debug!(records = count, "trace buffer flushed");
        Ok(())
    }

    /// Flush what is left and stop recording. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), TraceError> {
        if self.state == RecorderState::Closed {
            return Ok(());
        }
        self.state = RecorderState::Flushing;
        for record in self.buffer.drain(..) {
            record.write_line(&mut self.writer).map_err(TraceError::Close)?;
        }
        self.writer.flush().map_err(TraceError::Close)?;
        self.state = RecorderState::Closed;
        info!(
            recorded = self.stats.recorded,
            flushes = self.stats.flushes,
            unfinished_calls = self.depth(),
            "trace output closed"
        );
        Ok(())
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Records waiting for the next bulk flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Calls entered but not yet exited, over all threads
    pub fn depth(&self) -> usize {
        self.calls.values().map(Vec::len).sum()
    }

    /// Calls entered but not yet exited on `thread`
    pub fn thread_depth(&self, thread: ThreadKey) -> usize {
        self.calls.get(&thread).map_or(0, Vec::len)
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

/// Reserve the record buffer, degrading to the default capacity and then to
/// direct output when the allocation is refused.
fn reserve_buffer(capacity: usize) -> (OutputMode, Vec<TraceRecord>) {
    let mut buffer = Vec::new();
    if buffer.try_reserve_exact(capacity).is_ok() {
        return (
            OutputMode::Buffered {
                capacity: capacity.max(1),
            },
            buffer,
        );
    }
    warn!(
        requested = capacity,
        fallback = DEFAULT_INITIAL_CAPACITY,
        "cannot reserve trace buffer, retrying with default capacity"
    );
    if buffer.try_reserve_exact(DEFAULT_INITIAL_CAPACITY).is_ok() {
        return (
            OutputMode::Buffered {
                capacity: DEFAULT_INITIAL_CAPACITY,
            },
            buffer,
        );
    }
    warn!("cannot reserve trace buffer, switching to direct output");
    (OutputMode::Direct, buffer)
}
