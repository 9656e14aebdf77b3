//! Structure size correlation
//!
//! Entry/exit hooks only see function addresses, never arguments. Data
//! structure code that wants its size attached to a traced call declares
//! "this call uses structure S" right before (outer placement) or inside
//! (injected placement) the traced function. The declaration is pushed as a
//! `(frame, size)` entry, and the hook for the call whose frame matches pops
//! it again.
//!
//! Entries are matched by exact frame identity, never by proximity, so a size
//! can only land on the call it was declared for. Deeper frames have lower
//! addresses; entries are pushed in call nesting order, so the stack top is
//! always the innermost frame.
//!
//! Registrations are process-wide, but frame addresses only order calls
//! within one thread, so each thread keeps its own [`SizeCorrelationStack`].

use fnv::FnvHashMap;
use std::fmt;

/// Identity of a call frame, compared by address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameAddr(pub usize);

impl fmt::Display for FrameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque identity of a registered data structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub usize);

/// Where the size declaration happens relative to the traced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Declared inside the traced function, one frame below the call site
    Injected,
    /// Declared by the caller immediately before the traced call
    Outer,
}

impl Placement {
    pub fn from_injected(injected: bool) -> Self {
        if injected {
            Placement::Injected
        } else {
            Placement::Outer
        }
    }
}

/// Pointer to a size variable owned by the host program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePtr(*const usize);

// SAFETY: the pointer is only dereferenced under the contract of
// `SizePtr::new`, which makes the host responsible for keeping it valid
// until the structure is unregistered.
unsafe impl Send for SizePtr {}

impl SizePtr {
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned and readable for as long as the
    /// structure stays registered.
    pub unsafe fn new(ptr: *const usize) -> Self {
        SizePtr(ptr)
    }

    fn read(self) -> u64 {
        // SAFETY: validity is guaranteed by the `new` contract; volatile
        // because the host mutates the variable behind our back.
        unsafe { std::ptr::read_volatile(self.0) as u64 }
    }
}

/// How the current size of a registered structure is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    /// Read the host's size variable at declaration time
    Address(SizePtr),
    /// Last value supplied by the host
    Value(u64),
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    placement: Placement,
    source: SizeSource,
}

/// A pending size declaration awaiting its call frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEntry {
    pub frame: FrameAddr,
    pub size: u64,
}

/// Structures that report their size, shared by every thread
#[derive(Debug, Default)]
pub struct SizeRegistry {
    registrations: FnvHashMap<StructId, Registration>,
}

impl SizeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a structure
    pub fn register(&mut self, id: StructId, placement: Placement, source: SizeSource) {
        self.registrations.insert(id, Registration { placement, source });
    }

    /// Forget a structure; later declarations for it are no-ops
    pub fn unregister(&mut self, id: StructId) {
        self.registrations.remove(&id);
    }

    pub fn is_registered(&self, id: StructId) -> bool {
        self.registrations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Current size and placement of `id`, or `None` when it is not registered.
    ///
    /// `value` replaces the remembered size of a by-value structure;
    /// by-address structures are read at this point.
    pub fn resolve(&mut self, id: StructId, value: Option<u64>) -> Option<(Placement, u64)> {
        let registration = self.registrations.get_mut(&id)?;
        let size = match (value, &mut registration.source) {
            (Some(value), SizeSource::Value(last)) => {
                *last = value;
                value
            }
            (Some(value), SizeSource::Address(_)) => value,
            (None, SizeSource::Value(last)) => *last,
            (None, SizeSource::Address(ptr)) => ptr.read(),
        };
        Some((registration.placement, size))
    }
}

/// LIFO of pending declarations made on one thread
#[derive(Debug, Default)]
pub struct SizeCorrelationStack {
    entries: Vec<SizeEntry>,
}

impl SizeCorrelationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that the upcoming (or current) traced call uses structure `id`.
    ///
    /// `value` updates the structure's size when given; otherwise the size is
    /// read from the registered source. `locate` maps the structure's
    /// placement to the frame the traced call will be identified by, and is
    /// only invoked for registered structures. Returns whether an entry was
    /// pushed; unregistered structures and unlocatable frames are ignored.
    pub fn declare_use(
        &mut self,
        registry: &mut SizeRegistry,
        id: StructId,
        value: Option<u64>,
        locate: impl FnOnce(Placement) -> Option<FrameAddr>,
    ) -> bool {
        let Some((placement, size)) = registry.resolve(id, value) else {
            return false;
        };
        match locate(placement) {
            Some(frame) => {
                self.push(frame, size);
                true
            }
            None => false,
        }
    }

    pub fn push(&mut self, frame: FrameAddr, size: u64) {
        self.entries.push(SizeEntry { frame, size });
    }

    /// Pop the top entry if it belongs to `frame`
    pub fn take(&mut self, frame: FrameAddr) -> Option<u64> {
        match self.entries.last() {
            Some(top) if top.frame == frame => self.entries.pop().map(|entry| entry.size),
            _ => None,
        }
    }

    /// Drop the top entry if it belongs to `frame`
    pub fn discard(&mut self, frame: FrameAddr) {
        if matches!(self.entries.last(), Some(top) if top.frame == frame) {
            self.entries.pop();
        }
    }

    /// Drop every top entry belonging to `frame` or to a deeper frame.
    ///
    /// Used when a call returns without consuming its declarations. Returns
    /// the number of entries removed.
    pub fn purge(&mut self, frame: FrameAddr) -> usize {
        let before = self.entries.len();
        while matches!(self.entries.last(), Some(top) if top.frame <= frame) {
            self.entries.pop();
        }
        before - self.entries.len()
    }

    /// No pending declarations; frame lookups can be skipped entirely
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn top(&self) -> Option<&SizeEntry> {
        self.entries.last()
    }
}
