//! Suspend/resume coordination across every registered admission gate.

mod coordinator;
mod listener;

pub use coordinator::SuspendCoordinator;
pub use listener::SuspendListener;
