// ABOUTME: Gate policy decision logic — combines classification and effective permission.
// ABOUTME: Produces Block, Deny, Allow, Queue, or Bypass for a single invocation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::permission::PermissionLevel;
use crate::risk::{Classification, RiskLevel};

/// How `ask`-level invocations are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Queue for a human decision.
    #[default]
    Interactive,
    /// Headless: refuse anything that would need a human.
    AutoDeny,
    /// Queue, then approve immediately. Blocked commands and deny rules still hold.
    SkipAll,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Interactive => "interactive",
            ApprovalMode::AutoDeny => "auto-deny",
            ApprovalMode::SkipAll => "skip-all",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "interactive" => Ok(ApprovalMode::Interactive),
            "auto-deny" => Ok(ApprovalMode::AutoDeny),
            "skip-all" => Ok(ApprovalMode::SkipAll),
            other => Err(format!("unknown approval mode: {other}")),
        }
    }
}

/// What the gate does with an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Blocked risk; terminal regardless of rules.
    Block,
    /// Refused by a deny rule or by the auto-deny mode.
    Deny,
    /// Allowed without asking.
    Allow,
    /// Needs a decision through the approval queue.
    Queue,
    /// Queued and immediately approved by the skip-all mode.
    Bypass,
}

/// Decide the gate action for a classified invocation.
pub fn evaluate_gate(
    classification: &Classification,
    permission: PermissionLevel,
    mode: ApprovalMode,
    auto_allow_low: bool,
) -> GateAction {
    // Rule 1: blocked never reaches the permission layer.
    if classification.is_blocked() {
        return GateAction::Block;
    }

    match permission {
        // Rule 2: deny rules always win.
        PermissionLevel::Deny => GateAction::Deny,

        // Rule 3: a grant covers anything the classifier did not flag.
        PermissionLevel::AllowSession if !classification.requires_approval => GateAction::Allow,

        // Rule 4: low-risk unflagged work is auto-allowed by policy.
        PermissionLevel::Ask
            if auto_allow_low
                && classification.risk_level <= RiskLevel::Low
                && !classification.requires_approval =>
        {
            GateAction::Allow
        }

        // Rule 5: everything else needs a decision.
        PermissionLevel::AllowSession | PermissionLevel::Ask => match mode {
            ApprovalMode::Interactive => GateAction::Queue,
            ApprovalMode::AutoDeny => GateAction::Deny,
            ApprovalMode::SkipAll => GateAction::Bypass,
        },
    }
}
