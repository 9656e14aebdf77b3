//! Runtime context
//!
//! [`TraceRuntime`] owns everything a traced process needs for the lifetime
//! of the trace: the recorder (output + policy table), the size registry and
//! one size correlation stack per thread. It must be built before the first
//! hook runs and shut down after the last one. The C ABI keeps exactly one of
//! these per process (see [`crate::ffi`]); everything else takes it by
//! reference.

use crate::clock::{Clock, MonotonicClock};
use crate::config::Configuration;
use crate::error::TraceError;
use crate::policy::FunctionId;
use crate::recorder::{Recorder, ThreadKey};
use crate::size_stack::{
    FrameAddr, Placement, SizeCorrelationStack, SizeRegistry, SizeSource, StructId,
};
use fnv::FnvHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Runtime writing to the configured trace file
pub type FileRuntime = TraceRuntime<BufWriter<File>, MonotonicClock>;

#[derive(Debug)]
pub struct TraceRuntime<W: Write, C: Clock = MonotonicClock> {
    recorder: Recorder<W, C>,
    registry: SizeRegistry,
    stacks: FnvHashMap<ThreadKey, SizeCorrelationStack>,
}

impl FileRuntime {
    /// Open the trace output described by `config`
    pub fn start(config: Configuration) -> Result<Self, TraceError> {
        Ok(Self::new(Recorder::create(config)?))
    }
}

impl<W: Write, C: Clock> TraceRuntime<W, C> {
    pub fn new(recorder: Recorder<W, C>) -> Self {
        Self {
            recorder,
            registry: SizeRegistry::new(),
            stacks: FnvHashMap::default(),
        }
    }

    /// Entry hook on `thread`. `frame` resolves the traced call's caller frame.
    pub fn on_enter(
        &mut self,
        thread: ThreadKey,
        function: FunctionId,
        frame: impl FnOnce() -> Option<FrameAddr>,
    ) -> Result<(), TraceError> {
        let mut idle = SizeCorrelationStack::new();
        let sizes = self.stacks.get_mut(&thread).unwrap_or(&mut idle);
        self.recorder.enter(thread, function, sizes, frame)?;
        self.release_idle_stack(thread);
        Ok(())
    }

    /// Exit hook on `thread`. `frame` resolves the traced call's caller frame.
    pub fn on_exit(
        &mut self,
        thread: ThreadKey,
        function: FunctionId,
        frame: impl FnOnce() -> Option<FrameAddr>,
    ) -> Result<(), TraceError> {
        let mut idle = SizeCorrelationStack::new();
        let sizes = self.stacks.get_mut(&thread).unwrap_or(&mut idle);
        self.recorder.exit(thread, function, sizes, frame)?;
        self.release_idle_stack(thread);
        Ok(())
    }

    fn release_idle_stack(&mut self, thread: ThreadKey) {
        if self.stacks.get(&thread).is_some_and(SizeCorrelationStack::is_empty) {
            self.stacks.remove(&thread);
        }
    }

    pub fn register_size(&mut self, id: StructId, placement: Placement, source: SizeSource) {
        self.registry.register(id, placement, source);
    }

    pub fn unregister_size(&mut self, id: StructId) {
        self.registry.unregister(id);
    }

    /// Declare a use of structure `id` on `thread`; see
    /// [`SizeCorrelationStack::declare_use`]
    pub fn declare_use(
        &mut self,
        thread: ThreadKey,
        id: StructId,
        value: Option<u64>,
        locate: impl FnOnce(Placement) -> Option<FrameAddr>,
    ) -> bool {
        self.stacks
            .entry(thread)
            .or_default()
            .declare_use(&mut self.registry, id, value, locate)
    }

    pub fn registry(&self) -> &SizeRegistry {
        &self.registry
    }

    /// Pending declarations of `thread`, if it has any
    pub fn sizes(&self, thread: ThreadKey) -> Option<&SizeCorrelationStack> {
        self.stacks.get(&thread)
    }

    pub fn sizes_mut(&mut self, thread: ThreadKey) -> &mut SizeCorrelationStack {
        self.stacks.entry(thread).or_default()
    }

    /// Declarations not yet consumed, over all threads
    pub fn pending_sizes(&self) -> usize {
        self.stacks.values().map(SizeCorrelationStack::len).sum()
    }

    pub fn recorder(&self) -> &Recorder<W, C> {
        &self.recorder
    }

    /// Flush and close the trace output
    pub fn shutdown(&mut self) -> Result<(), TraceError> {
        self.recorder.close()
    }

    pub fn into_recorder(self) -> Recorder<W, C> {
        self.recorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recorder::RecorderState;

    const MAIN: ThreadKey = ThreadKey(0);

    fn runtime(config: Configuration) -> TraceRuntime<Vec<u8>, ManualClock> {
        TraceRuntime::new(Recorder::new(config, Vec::new(), ManualClock::ticking(0, 10)))
    }

    fn text(runtime: TraceRuntime<Vec<u8>, ManualClock>) -> String {
        String::from_utf8(runtime.into_recorder().into_writer()).unwrap()
    }

    #[test]
    fn test_outer_size_declaration_flow() {
        let mut rt = runtime(Configuration::default());
        let caller = || Some(FrameAddr(0x7ff0));

        rt.register_size(StructId(0xbeef), Placement::Outer, SizeSource::Value(0));
        assert!(rt.declare_use(MAIN, StructId(0xbeef), Some(1000), |_| caller()));
        rt.on_enter(MAIN, FunctionId(0x1000), caller).unwrap();
        rt.on_exit(MAIN, FunctionId(0x1000), caller).unwrap();
        rt.shutdown().unwrap();

        assert_eq!(rt.pending_sizes(), 0);
        assert!(rt.sizes(MAIN).is_none());
        assert_eq!(rt.recorder().state(), RecorderState::Closed);
        assert_eq!(text(rt), "i 0x1000 0 1000\no 0x1000 10 1000\n");
    }

    #[test]
    fn test_unregistered_declaration_leaves_no_size() {
        let mut rt = runtime(Configuration::default());
        let caller = || Some(FrameAddr(0x7ff0));

        assert!(!rt.declare_use(MAIN, StructId(1), Some(5), |_| caller()));
        rt.on_enter(MAIN, FunctionId(0x1000), caller).unwrap();
        rt.on_exit(MAIN, FunctionId(0x1000), caller).unwrap();
        rt.shutdown().unwrap();

        assert_eq!(text(rt), "i 0x1000 0 0\no 0x1000 10 0\n");
    }

    #[test]
    fn test_unregister_between_calls() {
        let mut rt = runtime(Configuration::default());
        let caller = || Some(FrameAddr(0x100));
        rt.register_size(StructId(1), Placement::Outer, SizeSource::Value(3));
        rt.unregister_size(StructId(1));
        assert!(rt.registry().is_empty());
        assert!(!rt.declare_use(MAIN, StructId(1), None, |_| caller()));
        assert!(rt.sizes_mut(MAIN).is_empty());
    }

    #[test]
    fn test_declarations_stay_on_their_thread() {
        let mut rt = runtime(Configuration::default());
        let (a, b) = (ThreadKey(1), ThreadKey(2));
        rt.register_size(StructId(1), Placement::Outer, SizeSource::Value(0));

        // Both threads happen to use the same stack address
        rt.declare_use(a, StructId(1), Some(11), |_| Some(FrameAddr(0x500)));
        rt.declare_use(b, StructId(1), Some(22), |_| Some(FrameAddr(0x500)));
        rt.on_enter(a, FunctionId(0x10), || Some(FrameAddr(0x500))).unwrap();
        rt.on_enter(b, FunctionId(0x20), || Some(FrameAddr(0x500))).unwrap();
        assert_eq!(rt.pending_sizes(), 0);
        rt.on_exit(a, FunctionId(0x10), || Some(FrameAddr(0x500))).unwrap();
        rt.on_exit(b, FunctionId(0x20), || Some(FrameAddr(0x500))).unwrap();
        rt.shutdown().unwrap();

        assert_eq!(
            text(rt),
            "i 0x10 0 11\ni 0x20 10 22\no 0x10 20 11\no 0x20 30 22\n"
        );
    }

    #[test]
    fn test_shutdown_flushes_buffered_records() {
        let mut rt = runtime(Configuration::default());
        rt.on_enter(MAIN, FunctionId(1), || None).unwrap();
        assert_eq!(rt.recorder().pending(), 1);
        rt.shutdown().unwrap();
        assert_eq!(rt.recorder().pending(), 0);
        rt.shutdown().unwrap();
        assert_eq!(text(rt), "i 0x1 0 0\n");
    }
}
