//! C ABI surface
//!
//! Targets compiled with `-finstrument-functions` call
//! `__cyg_profile_func_enter`/`__cyg_profile_func_exit` around every
//! instrumented function. Data structure code calls the `circ_*` size
//! declaration functions. All of them funnel into one process-wide
//! [`TraceRuntime`](crate::runtime::TraceRuntime) slot:
//!
//! ```text
//! Uninitialized ──(first ABI call)──▶ Active ──(atexit finalizer)──▶ Closed
//! ```
//!
//! The first call loads the configuration (`CIRC_CONFIG` or `circ.conf`),
//! opens the trace output and registers the finalizer. Configuration and
//! output errors terminate the process with the matching [`ExitStatus`].
//!
//! Startup is lazy. Calls that finish before the first ABI call (static
//! constructors, early library init) are never traced, and an exit whose
//! entry was missed is only recorded for functions without a filter or
//! sampling policy. Hosts that need a fixed starting point call
//! [`circ_init`] at the top of `main`.
//!
//! The slot is guarded by a mutex. Every thread gets its own [`ThreadKey`],
//! so enter/exit pairing and size declarations are tracked per thread while
//! the trace file itself is shared. A thread-local guard drops hooks that
//! fire while the runtime is already running on the same thread.

use crate::config::{config_path, Configuration};
use crate::error::{ExitStatus, TraceError};
use crate::frame::{self, declaration_levels, HOOK_LEVELS};
use crate::policy::FunctionId;
use crate::recorder::ThreadKey;
use crate::runtime::FileRuntime;
use crate::size_stack::{FrameAddr, Placement, SizePtr, SizeSource, StructId};
use std::cell::Cell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Environment variable holding `tracing` filter directives for the runtime
pub const LOG_ENV: &str = "CIRC_LOG";

enum Slot {
    Uninitialized,
    Active(Box<FileRuntime>),
    Closed,
}

static RUNTIME: Mutex<Slot> = Mutex::new(Slot::Uninitialized);

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static IN_RUNTIME: Cell<bool> = const { Cell::new(false) };
    static THREAD: ThreadKey = ThreadKey(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
}

/// Key of the calling thread; never reused within the process
fn current_thread() -> ThreadKey {
    THREAD.try_with(|key| *key).unwrap_or(ThreadKey(0))
}

/// Marks the current thread as running inside the runtime
struct ReentryGuard;

impl ReentryGuard {
    fn acquire() -> Option<Self> {
        IN_RUNTIME
            .try_with(|active| {
                if active.replace(true) {
                    None
                } else {
                    Some(ReentryGuard)
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_RUNTIME.try_with(|active| active.set(false));
    }
}

fn lock() -> MutexGuard<'static, Slot> {
    // A panic in another hook must not stop tracing
    RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `op` against the live runtime, initializing it on first use.
///
/// Returns `None` when the call is re-entrant or the runtime is closed.
/// Fatal errors terminate the process after the lock is released.
fn with_runtime<R>(
    op: impl FnOnce(&mut FileRuntime) -> Result<R, TraceError>,
) -> Option<R> {
    let _guard = ReentryGuard::acquire()?;

    let outcome = {
        let mut slot = lock();
        if matches!(*slot, Slot::Uninitialized) {
            match start() {
                Ok(runtime) => *slot = Slot::Active(Box::new(runtime)),
                Err(status) => {
                    *slot = Slot::Closed;
                    return terminate(status);
                }
            }
        }
        match &mut *slot {
            Slot::Active(runtime) => match op(runtime) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    error!(error = %err, "trace output failed");
                    // Nothing left to flush for the finalizer
                    *slot = Slot::Closed;
                    Err(err.exit_status())
                }
            },
            Slot::Uninitialized | Slot::Closed => Ok(None),
        }
    };

    match outcome {
        Ok(value) => value,
        Err(status) => terminate(status),
    }
}

fn start() -> Result<FileRuntime, ExitStatus> {
    init_logging();

    let path = config_path();
    let config = Configuration::load(&path).map_err(|err| {
        error!(config = %path.display(), error = %err, "cannot load configuration");
        err.exit_status()
    })?;
    info!(config = %path.display(), "configuration loaded");

    let runtime = FileRuntime::start(config).map_err(|err| {
        error!(error = %err, "cannot open trace output");
        err.exit_status()
    })?;

    // SAFETY: `finalize` is a plain extern "C" fn with no captured state.
    if unsafe { libc::atexit(finalize) } != 0 {
        error!("cannot register trace finalizer, buffered records may be lost");
    }
    Ok(runtime)
}

fn terminate(status: ExitStatus) -> ! {
    error!(status = status.code(), "{}", status.describe());
    std::process::exit(status.code())
}

/// Install a stderr subscriber when `CIRC_LOG` is set, unless the host
/// already installed one.
fn init_logging() {
    let Some(directives) = std::env::var_os(LOG_ENV) else {
        return;
    };
    let filter = EnvFilter::try_new(directives.to_string_lossy())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Take the runtime out of `slot` and close it
fn close_slot(slot: &mut Slot) -> Result<(), ExitStatus> {
    match std::mem::replace(slot, Slot::Closed) {
        Slot::Active(mut runtime) => runtime.shutdown().map_err(|err| {
            error!(error = %err, "cannot close trace output");
            err.exit_status()
        }),
        Slot::Uninitialized | Slot::Closed => Ok(()),
    }
}

extern "C" fn finalize() {
    let _guard = ReentryGuard::acquire();
    let result = close_slot(&mut lock());
    if let Err(status) = result {
        // exit() must not be re-entered from an atexit handler
        // SAFETY: _exit terminates immediately without running handlers.
        unsafe { libc::_exit(status.code()) }
    }
}

fn caller_frame(anchor: usize) -> impl FnOnce() -> Option<FrameAddr> {
    move || frame::frame_above(anchor, HOOK_LEVELS)
}

fn declaring_frame(anchor: usize) -> impl FnOnce(Placement) -> Option<FrameAddr> {
    move |placement| frame::frame_above(anchor, declaration_levels(placement))
}

/// Called by instrumented code on function entry
#[no_mangle]
#[inline(never)]
pub extern "C" fn __cyg_profile_func_enter(func: *mut c_void, _call_site: *mut c_void) {
    let anchor = __cyg_profile_func_enter as usize;
    with_runtime(|rt| {
        rt.on_enter(
            current_thread(),
            FunctionId(func as usize),
            caller_frame(anchor),
        )
    });
}

/// Called by instrumented code on function exit
#[no_mangle]
#[inline(never)]
pub extern "C" fn __cyg_profile_func_exit(func: *mut c_void, _call_site: *mut c_void) {
    let anchor = __cyg_profile_func_exit as usize;
    with_runtime(|rt| {
        rt.on_exit(
            current_thread(),
            FunctionId(func as usize),
            caller_frame(anchor),
        )
    });
}

/// Register `structure`, whose size is read from `size` at each declaration.
///
/// # Safety
///
/// `size` must stay valid for reads until the structure is unregistered.
/// A null `size` is ignored.
#[no_mangle]
pub unsafe extern "C" fn circ_register_size_address(
    structure: *const c_void,
    injected: bool,
    size: *const usize,
) {
    if size.is_null() {
        return;
    }
    // SAFETY: non-null, and the caller keeps it readable while registered.
    let source = SizeSource::Address(unsafe { SizePtr::new(size) });
    with_runtime(|rt| {
        rt.register_size(
            StructId(structure as usize),
            Placement::from_injected(injected),
            source,
        );
        Ok(())
    });
}

/// Register `structure` with an initial size value
#[no_mangle]
pub extern "C" fn circ_register_size_value(structure: *const c_void, injected: bool, size: usize) {
    with_runtime(|rt| {
        rt.register_size(
            StructId(structure as usize),
            Placement::from_injected(injected),
            SizeSource::Value(size as u64),
        );
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn circ_unregister_size(structure: *const c_void) {
    with_runtime(|rt| {
        rt.unregister_size(StructId(structure as usize));
        Ok(())
    });
}

/// Declare that the traced call uses `structure`, sized by its registered address
#[no_mangle]
#[inline(never)]
pub extern "C" fn circ_using_size_address(structure: *const c_void) {
    let anchor = circ_using_size_address as usize;
    with_runtime(|rt| {
        Ok(rt.declare_use(
            current_thread(),
            StructId(structure as usize),
            None,
            declaring_frame(anchor),
        ))
    });
}

/// Declare that the traced call uses `structure`, currently of `size` elements
#[no_mangle]
#[inline(never)]
pub extern "C" fn circ_using_size_value(structure: *const c_void, size: usize) {
    let anchor = circ_using_size_value as usize;
    with_runtime(|rt| {
        Ok(rt.declare_use(
            current_thread(),
            StructId(structure as usize),
            Some(size as u64),
            declaring_frame(anchor),
        ))
    });
}

/// Pop the size the calling thread declared for `frame`; 0 when none is
/// pending for it
#[no_mangle]
pub extern "C" fn circ_get_size_record(frame: usize) -> usize {
    with_runtime(|rt| Ok(rt.sizes_mut(current_thread()).take(FrameAddr(frame))))
        .flatten()
        .map_or(0, |size| size as usize)
}

#[no_mangle]
pub extern "C" fn circ_remove_size_record(frame: usize) {
    with_runtime(|rt| {
        rt.sizes_mut(current_thread()).discard(FrameAddr(frame));
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn circ_clean_size_records(frame: usize) {
    with_runtime(|rt| Ok(rt.sizes_mut(current_thread()).purge(FrameAddr(frame))));
}

/// Start the runtime now rather than at the first hook.
///
/// Returns whether the runtime is active. Missing or invalid configuration
/// terminates the process, as it would at the first hook.
#[no_mangle]
pub extern "C" fn circ_init() -> bool {
    with_runtime(|_| Ok(())).is_some()
}
