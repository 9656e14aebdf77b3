//! circ - call-level instrumentation runtime for complexity profiling
//!
//! Programs compiled with `-finstrument-functions` and linked against this
//! library write one trace record per entry and exit of every instrumented
//! function. A per-function policy table (loaded from `circ.conf`) filters or
//! samples calls, and data structure code can attach its current size to the
//! calls that operate on it, so the trace can later be fitted against input
//! size.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod policy;
pub mod record;
pub mod recorder;
pub mod runtime;
pub mod size_stack;
pub mod trace_log;
