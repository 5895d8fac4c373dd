//! Observer hooks for suspend/resume transitions.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::state::SuspendState;

/// Subsystem hook into the coordinator's transitions.
///
/// Transition hooks run after the coordinator has released its lock, in the
/// order the transitions happened, so they may call any coordinator method.
/// By the time a hook runs the state may already have moved on.
///
/// `listener_added` is the exception: it runs under the lock, and must only
/// look at the state it is given.
///
/// A panicking hook is caught and logged; other listeners still run.
pub trait SuspendListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called on registration with the current state. Return `false` to decline the
    /// subscription, e.g. when the current state already answers the question.
    fn listener_added(&self, _state: SuspendState) -> bool {
        true
    }

    fn suspend_started(&self) {}

    fn suspend_complete(&self) {}

    fn resumed(&self) {}
}

/// Run a hook, converting a panic into a logged warning.
pub(crate) fn sandboxed<R>(
    listener: &dyn SuspendListener,
    hook: &'static str,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::warn!(
                listener = listener.name(),
                hook,
                panic = panic_message(payload.as_ref()),
                "Suspend listener panicked"
            );
            None
        }
    }
}

pub(crate) fn notify_all(
    listeners: &[Arc<dyn SuspendListener>],
    hook: &'static str,
    call: impl Fn(&dyn SuspendListener),
) {
    for listener in listeners {
        let listener = listener.as_ref();
        sandboxed(listener, hook, || call(listener));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
