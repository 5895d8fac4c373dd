//! quiesce: graceful suspend/resume for services with in-flight work.
//!
//! Entry points take a [`Permit`] from a [`QuiescenceGate`] for each unit of work.
//! A [`SuspendCoordinator`] closes every registered gate at once and reports
//! SUSPENDED when all of them have drained. [`BoundedPool`] caps how many
//! expensive instances exist at a time.

pub mod config;
pub mod gate;
pub mod pool;
pub mod service;
pub mod state;
pub mod suspend;
pub mod transport;

pub use config::{ConfigError, PoolConfig, ServerConfig};
pub use gate::{GateError, GateId, Permit, PermitId, PermitTicket, QuiescenceGate};
pub use pool::{BoundedPool, PoolError, PoolFactory, PoolStats};
pub use service::{ControlService, DrainError};
pub use state::{GateState, GateStatus, SuspendSnapshot, SuspendState};
pub use suspend::{SuspendCoordinator, SuspendListener};

/// Crate version reported by the health check.
pub const QUIESCE_VERSION: &str = env!("CARGO_PKG_VERSION");
