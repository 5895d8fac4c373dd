//! Admission gates: count in-flight work per entry point and report when it drains.
//!
//! Every unit of work takes a [`Permit`] from its gate before starting and gives it
//! back when done. Once `begin_drain` is called the gate refuses new permits and
//! fires its callback when the last outstanding permit comes back.

mod permit;
mod tracker;

pub use permit::{GateError, GateId, Permit, PermitId, PermitTicket};
pub use tracker::{DrainCallback, QuiescenceGate};
