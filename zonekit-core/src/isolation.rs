//! Fault isolation at dispatch boundaries.
//!
//! Every call into code the engine does not own (actions, policies, event
//! handlers, lifecycle steps) goes through [`isolate`]. A returned `Err`
//! and a panic both come back as a plain failure message, so nothing from
//! a collaborator can unwind into the host's tick loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run `f`, converting both its error value and any panic into a message.
///
/// `AssertUnwindSafe` is sound here because every caller discards or
/// re-validates state touched by a failed invocation.
pub(crate) fn isolate<T, E, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
