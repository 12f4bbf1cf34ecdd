//! Kernel logging subsystem.
//!
//! All kernel log output funnels through a single **backend** function
//! pointer.  The network core never talks to a console directly: until a
//! console (or serial) driver registers itself via
//! [`klog_register_backend`], log lines are discarded.  Output is
//! fire-and-forget: no log call can fail or block the caller.
//!
//! # Backend contract
//!
//! The backend receives the pre-formatted arguments for a **single log line**
//! and is responsible for:
//!
//! 1. Writing the formatted text atomically (no interleaving between
//!    concurrent callers).
//! 2. Appending a trailing newline after the text.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a klog backend.
///
/// The backend must write the formatted text **and** a trailing newline,
/// all under a single lock acquisition (if applicable) so that log lines
/// from different callers do not interleave.
pub type KlogBackend = fn(fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "no console yet, discard".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Dispatch a log line through the active backend, if any.
#[inline]
fn dispatch(args: fmt::Arguments<'_>) {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `klog_register_backend` only stores valid `KlogBackend` fn
    // pointers, which are the same size as `*mut ()` on all supported targets.
    let backend: KlogBackend = unsafe { core::mem::transmute(ptr) };
    backend(args);
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register the console backend that receives all subsequent log lines.
///
/// Replaces any previously registered backend.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

/// Set the maximum level that will be emitted.
pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current maximum emitted level.
pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Whether a line at `level` would currently be emitted.
pub fn klog_is_enabled(level: KlogLevel) -> bool {
    is_enabled(level)
}

/// Entry point used by the `klog_*!` macros.  Not intended for direct use.
#[doc(hidden)]
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if is_enabled(level) {
        dispatch(args);
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Trace, ::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static LINES: AtomicUsize = AtomicUsize::new(0);

    fn counting_backend(_args: fmt::Arguments<'_>) {
        LINES.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn level_gating_and_backend_dispatch() {
        klog_register_backend(counting_backend);
        klog_set_level(KlogLevel::Warn);
        assert_eq!(klog_get_level(), KlogLevel::Warn);
        assert!(klog_is_enabled(KlogLevel::Error));
        assert!(klog_is_enabled(KlogLevel::Warn));
        assert!(!klog_is_enabled(KlogLevel::Info));

        crate::klog_error!("boom");
        crate::klog_info!("quiet");
        assert_eq!(LINES.load(Ordering::Relaxed), 1);

        klog_set_level(KlogLevel::Trace);
        crate::klog_trace!("loud");
        assert_eq!(LINES.load(Ordering::Relaxed), 2);
    }
}
