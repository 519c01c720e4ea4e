//! Process-wide cooperative cancellation.
//!
//! Long operations call [`check_interrupt`] between I/O steps; once the
//! flag is raised they unwind with [`BinaryCacheError::Interrupted`],
//! which no layer of the store catches. Partially uploaded payloads are
//! harmless because the narinfo has not been written yet.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::BinaryCacheError;
use crate::Result;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Raise the interrupt flag. Safe to call from signal handlers.
pub fn trigger() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Clear the flag, letting new operations proceed.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail fast when an interrupt is pending.
pub fn check_interrupt() -> Result<()> {
    if is_interrupted() {
        return Err(BinaryCacheError::Interrupted);
    }
    Ok(())
}
