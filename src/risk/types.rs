// ABOUTME: Core risk types — RiskLevel ordering, ToolCategory defaults, and Classification.
// ABOUTME: Shared by the classifier, the permission store, the queue, and the audit log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How dangerous a requested action is. Ordered `Safe < Low < Medium < High < Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Informational or read-only.
    Safe,
    /// Unmatched by any rule.
    Low,
    /// Mutating but recoverable.
    Medium,
    /// Irreversible or externally visible; approvable.
    High,
    /// Refused unconditionally, no override possible.
    Blocked,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Safe,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown risk level: {s}"))
    }
}

/// Static fact about a tool, supplied by the tool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    Write,
    Shell,
    Network,
}

impl ToolCategory {
    /// Risk assumed for any invocation of a tool in this category before
    /// its arguments are inspected.
    pub fn default_risk(self) -> RiskLevel {
        match self {
            ToolCategory::ReadOnly => RiskLevel::Safe,
            ToolCategory::Write => RiskLevel::Medium,
            ToolCategory::Network => RiskLevel::Medium,
            ToolCategory::Shell => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::ReadOnly => "read_only",
            ToolCategory::Write => "write",
            ToolCategory::Shell => "shell",
            ToolCategory::Network => "network",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of classifying a command or a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub risk_level: RiskLevel,
    /// When true the invocation must never be auto-allowed, even under a session grant.
    pub requires_approval: bool,
    /// Human-readable reasons, in the order the rules matched.
    pub reasons: Vec<String>,
}

impl Classification {
    pub fn new(risk_level: RiskLevel, requires_approval: bool) -> Self {
        Self {
            risk_level,
            requires_approval,
            reasons: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.risk_level == RiskLevel::Blocked
    }

    /// Reasons joined for display and audit records.
    pub fn summary(&self) -> String {
        if self.reasons.is_empty() {
            format!("risk {}", self.risk_level)
        } else {
            self.reasons.join("; ")
        }
    }
}
