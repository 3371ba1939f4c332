//! Invariant-violation halt.
//!
//! Caller mistakes surface as typed `Result`s; invariant violations do not.
//! A corrupted slab free-list or a scheduled id missing from the task
//! registry is unrecoverable state, and the execution engine's worker-side
//! `catch_unwind` must not be able to swallow it and keep running. [`fatal`]
//! therefore prints a location-tagged diagnostic to stderr and aborts the
//! process instead of unwinding.

use std::panic::Location;
use std::process;

/// Halts the process with a location-tagged diagnostic.
///
/// Aborts rather than unwinding, so the failure barrier around task closures
/// cannot convert an invariant violation into a FAILED task.
#[track_caller]
#[cold]
pub fn fatal(msg: &str) -> ! {
    let loc = Location::caller();
    eprintln!(
        "[KERNEL FATAL] {msg}\n  at {}:{}:{}",
        loc.file(),
        loc.line(),
        loc.column()
    );
    process::abort()
}
