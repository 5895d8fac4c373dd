//! ControlService: transport-agnostic operator surface.
//!
//! This service owns:
//! - The SuspendCoordinator (suspend/resume/inspect)
//! - Shutdown signalling (explicit shutdown requests from transports)
//! - The drain-before-exit sequence
//!
//! Transports (HTTP, CLI, etc.) delegate to this service.

use std::time::Duration;

use tokio::sync::watch;

use crate::state::{SuspendSnapshot, SuspendState};
use crate::suspend::SuspendCoordinator;

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("Timed out after {timeout:?} waiting for {} gate(s) to drain", .pending.len())]
    Timeout {
        timeout: Duration,
        pending: Vec<String>,
    },
}

/// Operator-facing wrapper around a coordinator.
pub struct ControlService {
    coordinator: SuspendCoordinator,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ControlService {
    pub fn new(coordinator: SuspendCoordinator) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            coordinator,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn coordinator(&self) -> &SuspendCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SuspendState {
        self.coordinator.state()
    }

    pub fn snapshot(&self) -> SuspendSnapshot {
        self.coordinator.snapshot()
    }

    pub fn suspend(&self) -> SuspendSnapshot {
        self.coordinator.suspend();
        self.coordinator.snapshot()
    }

    pub fn resume(&self) -> SuspendSnapshot {
        self.coordinator.resume();
        self.coordinator.snapshot()
    }

    /// Suspend and wait for every gate to drain, up to `timeout`.
    ///
    /// On timeout the coordinator is left SUSPENDING; the caller decides whether
    /// to exit anyway.
    pub async fn drain(&self, timeout: Duration) -> Result<(), DrainError> {
        self.coordinator.suspend();

        match tokio::time::timeout(timeout, self.coordinator.wait_for(SuspendState::Suspended))
            .await
        {
            Ok(()) => {
                tracing::info!("All gates drained");
                Ok(())
            }
            Err(_) => {
                let pending = self.coordinator.snapshot().pending;
                for (name, outstanding) in self.coordinator.list_outstanding_gates() {
                    tracing::warn!(gate = %name, outstanding, "Gate still busy at drain timeout");
                }
                Err(DrainError::Timeout { timeout, pending })
            }
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
