//! Call frame identification for size correlation
//!
//! A declaration and the hook it is meant for run in different functions, so
//! they can only agree on a call by naming the same stack frame. Both sides
//! walk the in-process stack from an anchor (the exported entry point that
//! was just called by host code) outward a fixed number of levels:
//!
//! ```text
//! hook for M        : [hook] ─▶ M ─▶ C      2 levels  ─▶ C
//! injected, inside M: [decl] ─▶ M ─▶ C      2 levels  ─▶ C
//! outer, in C       : [decl] ─▶ C           1 level   ─▶ C
//! ```
//!
//! The frame of the function that *called* the traced function is the
//! identity, which is the same for a declaration before the call and for one
//! made from inside it.

use crate::size_stack::{FrameAddr, Placement};

/// Stop looking for the anchor after this many frames
const MAX_ANCHOR_DEPTH: usize = 64;

/// Levels between an entry/exit hook and the traced call's caller
pub const HOOK_LEVELS: usize = 2;

/// Levels between a size declaration and the traced call's caller
pub fn declaration_levels(placement: Placement) -> usize {
    match placement {
        Placement::Injected => 2,
        Placement::Outer => 1,
    }
}

/// Stack address of the frame `levels` above `anchor`'s activation.
///
/// `anchor` is the address of a non-inlined function currently on the stack.
/// Returns `None` when the anchor is not found, the stack is too shallow, or
/// the unwinder cannot report a stack pointer on this platform.
#[inline(never)]
pub fn frame_above(anchor: usize, levels: usize) -> Option<FrameAddr> {
    let mut found = None;
    let mut depth: Option<usize> = None;
    let mut scanned = 0usize;

    backtrace::trace(|frame| {
        let level = match depth {
            Some(level) => level + 1,
            None if frame.symbol_address() as usize == anchor => 0,
            None => {
                scanned += 1;
                return scanned < MAX_ANCHOR_DEPTH;
            }
        };
        depth = Some(level);

        if level < levels {
            return true;
        }
        let sp = frame.sp() as usize;
        if sp != 0 {
            found = Some(FrameAddr(sp));
        }
        false
    });

    found
}
