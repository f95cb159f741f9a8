// ABOUTME: Gate lifecycle states — RECEIVED through the terminal outcomes.
// ABOUTME: Only AUTO_ALLOWED_TERMINAL and APPROVED_TERMINAL let the caller execute.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an invocation sits in the gate state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Received,
    Classified,
    BlockedTerminal,
    AutoAllowedTerminal,
    DeniedTerminal,
    QueuedForApproval,
    ApprovedTerminal,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Received => "RECEIVED",
            GateState::Classified => "CLASSIFIED",
            GateState::BlockedTerminal => "BLOCKED_TERMINAL",
            GateState::AutoAllowedTerminal => "AUTO_ALLOWED_TERMINAL",
            GateState::DeniedTerminal => "DENIED_TERMINAL",
            GateState::QueuedForApproval => "QUEUED_FOR_APPROVAL",
            GateState::ApprovedTerminal => "APPROVED_TERMINAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GateState::BlockedTerminal
                | GateState::AutoAllowedTerminal
                | GateState::DeniedTerminal
                | GateState::ApprovedTerminal
        )
    }

    pub fn permits_execution(&self) -> bool {
        matches!(self, GateState::AutoAllowedTerminal | GateState::ApprovedTerminal)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
