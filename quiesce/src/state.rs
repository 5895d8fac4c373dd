//! Observable state types for gates and the suspend coordinator.

use serde::{Deserialize, Serialize};

/// Overall suspend state of a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuspendState {
    /// Admitting work normally
    #[default]
    Running,
    /// Suspend requested, waiting for gates to drain
    Suspending,
    /// Every gate drained
    Suspended,
}

impl SuspendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspendState::Running => "RUNNING",
            SuspendState::Suspending => "SUSPENDING",
            SuspendState::Suspended => "SUSPENDED",
        }
    }

    /// True once a suspend has been requested and not yet undone by resume.
    pub fn is_suspending_or_suspended(&self) -> bool {
        !matches!(self, SuspendState::Running)
    }
}

impl std::fmt::Display for SuspendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single admission gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    #[default]
    Running,
    Draining,
    Drained,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Running => "RUNNING",
            GateState::Draining => "DRAINING",
            GateState::Drained => "DRAINED",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            GateState::Running => 0,
            GateState::Draining => 1,
            GateState::Drained => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => GateState::Running,
            1 => GateState::Draining,
            _ => GateState::Drained,
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic view of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    pub name: String,
    pub state: GateState,
    pub outstanding: i64,
}

/// Point-in-time view of a coordinator and its gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendSnapshot {
    pub state: SuspendState,
    /// Incremented by every suspend attempt and every resume.
    pub generation: u64,
    /// When the coordinator last reached SUSPENDED (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<String>,
    /// Gates in registration order.
    pub gates: Vec<GateStatus>,
    /// Names of gates the current suspend attempt is still waiting on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
}

impl SuspendSnapshot {
    /// Gates that still hold permits.
    pub fn outstanding_gates(&self) -> impl Iterator<Item = &GateStatus> {
        self.gates.iter().filter(|g| g.outstanding > 0)
    }
}
