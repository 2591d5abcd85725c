//! Process-wide diagnostic switch.
//!
//! Every socket instance consults this flag at log time, in addition to its
//! own `debug` setting. Flipping it never changes connection behavior, only
//! how much gets traced.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ALL: AtomicBool = AtomicBool::new(false);

/// Enables or disables verbose tracing for every socket in the process.
pub fn set_debug_all(enabled: bool) {
    DEBUG_ALL.store(enabled, Ordering::Release);
}

/// Returns whether verbose tracing is enabled process-wide.
pub fn debug_all() -> bool {
    DEBUG_ALL.load(Ordering::Acquire)
}

/// Resolves the effective debug setting for one instance.
///
/// An instance that opted in always traces; otherwise the process-wide
/// switch decides.
pub fn debug_enabled(instance: bool) -> bool {
    instance || debug_all()
}
