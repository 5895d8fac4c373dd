//! Per admission-point permit tracking with drain detection.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use dashmap::DashSet;

use super::permit::{GateError, GateId, Permit, PermitId, PermitTicket};
use crate::state::{GateState, GateStatus};

/// Invoked once when a draining gate reaches zero outstanding permits.
pub type DrainCallback = Box<dyn FnOnce() + Send + 'static>;

struct DrainControl {
    callback: Option<DrainCallback>,
}

pub(crate) struct GateInner {
    id: GateId,
    name: String,
    /// Signed so a transient rejected acquire can never wrap.
    outstanding: AtomicI64,
    /// Written only while `drain` is held; read lock-free on the hot path.
    state: AtomicU8,
    permits: DashSet<PermitId>,
    drain: StdMutex<DrainControl>,
}

impl GateInner {
    pub(crate) fn id(&self) -> GateId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, _control: &DrainControl, state: GateState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn lock_control(&self) -> MutexGuard<'_, DrainControl> {
        match self.drain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(gate = %self.name, "Gate drain mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn release_id(&self, id: PermitId) -> Result<(), GateError> {
        if self.permits.remove(&id).is_none() {
            tracing::error!(gate = %self.name, permit = %id, "Permit released twice - drain accounting left unchanged");
            return Err(GateError::DoubleRelease {
                gate: self.name.clone(),
                permit: id,
            });
        }

        let remaining = self.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::trace!(gate = %self.name, permit = %id, remaining, "Permit released");
        if remaining == 0 && self.state() != GateState::Running {
            self.complete_drain();
        }
        Ok(())
    }

    /// Fire the drain callback if the gate is draining with nothing outstanding.
    ///
    /// Every path that observes the count reach zero calls this; the callback is
    /// taken under the lock so only one caller ever gets it.
    fn complete_drain(&self) {
        let callback = {
            let mut control = self.lock_control();
            if self.state() != GateState::Draining || self.outstanding.load(Ordering::SeqCst) != 0
            {
                return;
            }
            self.set_state(&control, GateState::Drained);
            control.callback.take()
        };

        tracing::info!(gate = %self.name, "Gate drained");
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Admission gate for one source of work (a listener, a timer dispatcher, a queue consumer).
///
/// Cloning is cheap; clones share the same counters.
#[derive(Clone)]
pub struct QuiescenceGate {
    inner: Arc<GateInner>,
}

impl QuiescenceGate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                id: GateId::new(),
                name: name.into(),
                outstanding: AtomicI64::new(0),
                state: AtomicU8::new(GateState::Running.as_u8()),
                permits: DashSet::new(),
                drain: StdMutex::new(DrainControl { callback: None }),
            }),
        }
    }

    pub fn id(&self) -> GateId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> GateState {
        self.inner.state()
    }

    pub fn outstanding_count(&self) -> i64 {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            name: self.inner.name.clone(),
            state: self.state(),
            outstanding: self.outstanding_count(),
        }
    }

    /// Admit one unit of work.
    ///
    /// The counter is bumped before the state check so a concurrent
    /// `begin_drain` can never read zero while this caller is mid-admission.
    pub fn acquire_permit(&self) -> Result<Permit, GateError> {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);

        if self.inner.state() != GateState::Running {
            let remaining = self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 {
                self.inner.complete_drain();
            }
            tracing::debug!(gate = %self.inner.name, "Rejecting work, gate is draining");
            return Err(GateError::Draining {
                gate: self.inner.name.clone(),
            });
        }

        let id = PermitId::new();
        self.inner.permits.insert(id);
        Ok(Permit::new(id, Arc::clone(&self.inner)))
    }

    /// Return a permit to this gate.
    ///
    /// A permit from another gate is rejected with `WrongGate` and still
    /// returned to the gate that issued it.
    pub fn release_permit(&self, permit: Permit) -> Result<(), GateError> {
        if permit.gate_id() != self.inner.id {
            let id = permit.id();
            tracing::error!(gate = %self.inner.name, owner = %permit.gate_name(), permit = %id, "Permit released through the wrong gate");
            return Err(GateError::WrongGate {
                gate: self.inner.name.clone(),
                permit: id,
            });
        }
        permit.release()
    }

    /// Release work previously detached from its permit handle.
    pub fn release_ticket(&self, ticket: PermitTicket) -> Result<(), GateError> {
        if ticket.gate != self.inner.id {
            tracing::error!(gate = %self.inner.name, permit = %ticket.permit, "Ticket released through the wrong gate");
            return Err(GateError::WrongGate {
                gate: self.inner.name.clone(),
                permit: ticket.permit,
            });
        }
        self.inner.release_id(ticket.permit)
    }

    /// Stop admitting work.
    ///
    /// Returns `true` when nothing is outstanding and the gate is already
    /// DRAINED; the callback is dropped unused. Otherwise returns `false` and
    /// the callback fires once, from whichever thread releases the last permit.
    pub fn begin_drain<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut control = self.inner.lock_control();
        self.inner.set_state(&control, GateState::Draining);

        if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
            self.inner.set_state(&control, GateState::Drained);
            control.callback = None;
            tracing::info!(gate = %self.inner.name, "Gate drained immediately");
            return true;
        }

        control.callback = Some(Box::new(callback));
        tracing::info!(
            gate = %self.inner.name,
            outstanding = self.outstanding_count(),
            "Gate draining"
        );
        false
    }

    /// Reopen the gate. Any pending drain callback is discarded unfired.
    pub fn resume(&self) {
        let mut control = self.inner.lock_control();
        let previous = self.inner.state();
        self.inner.set_state(&control, GateState::Running);
        control.callback = None;
        if previous != GateState::Running {
            tracing::info!(gate = %self.inner.name, from = %previous, "Gate resumed");
        }
    }
}

impl std::fmt::Debug for QuiescenceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceGate")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("outstanding", &self.outstanding_count())
            .finish()
    }
}
