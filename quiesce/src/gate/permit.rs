//! Permit handles issued by a [`QuiescenceGate`](super::QuiescenceGate).
//!
//! A permit moves through one of two paths:
//! - `Permit` → released via `release()`, `QuiescenceGate::release_permit()`, or on drop
//! - `Permit` → `PermitTicket` via `detach()`, released later with `QuiescenceGate::release_ticket()`
//!
//! Only the ticket path can observe a double release; the owned handle is consumed on release.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::tracker::GateInner;

/// Unique identifier for a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermitId(uuid::Uuid);

impl PermitId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PermitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PermitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a gate. Names are for humans and may repeat; ids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateId(uuid::Uuid);

impl GateId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for GateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Gate '{gate}' is draining and not admitting new work")]
    Draining { gate: String },
    #[error("Permit {permit} released twice on gate '{gate}'")]
    DoubleRelease { gate: String, permit: PermitId },
    #[error("Permit {permit} was not issued by gate '{gate}'")]
    WrongGate { gate: String, permit: PermitId },
}

impl GateError {
    /// Draining is the only error a well-behaved caller should expect to see.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GateError::Draining { .. })
    }
}

/// One admitted unit of work. Returned to its gate on drop if not released explicitly.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    id: PermitId,
    gate: Arc<GateInner>,
    armed: bool,
}

impl Permit {
    pub(crate) fn new(id: PermitId, gate: Arc<GateInner>) -> Self {
        Self {
            id,
            gate,
            armed: true,
        }
    }

    pub fn id(&self) -> PermitId {
        self.id
    }

    pub fn gate_id(&self) -> GateId {
        self.gate.id()
    }

    pub fn gate_name(&self) -> &str {
        self.gate.name()
    }

    /// Return the permit to the gate that issued it.
    pub fn release(mut self) -> Result<(), GateError> {
        self.armed = false;
        self.gate.release_id(self.id)
    }

    /// Give up RAII ownership. The work stays outstanding until the ticket is released.
    pub fn detach(mut self) -> PermitTicket {
        self.armed = false;
        PermitTicket {
            permit: self.id,
            gate: self.gate.id(),
        }
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("id", &self.id)
            .field("gate", &self.gate.name())
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.gate.release_id(self.id)
        {
            tracing::error!(gate = %self.gate.name(), permit = %self.id, error = %e, "Failed to release dropped permit");
        }
    }
}

/// Detached permit reference, for work whose completion is reported out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermitTicket {
    pub permit: PermitId,
    pub gate: GateId,
}
