// ABOUTME: Audit record types — AuditEntry, AuditFilter, and AuditStats.
// ABOUTME: One entry per terminal gate decision; immutable once appended.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::GateState;
use crate::risk::RiskLevel;

/// A terminal gate decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Global append order, assigned by the log.
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub risk_level: RiskLevel,
    pub approved: bool,
    pub terminal: GateState,
    /// Denial reason or ceiling override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    /// `approved` follows the terminal state.
    pub fn new(session_id: &str, tool: &str, risk_level: RiskLevel, terminal: GateState) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            command: None,
            path: None,
            risk_level,
            approved: terminal.permits_execution(),
            terminal,
            reason: None,
        }
    }

    pub fn with_command(mut self, command: Option<&str>) -> Self {
        self.command = command.map(str::to_string);
        self
    }

    pub fn with_path(mut self, path: Option<&str>) -> Self {
        self.path = path.map(str::to_string);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Conjunctive filter over audit entries; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub tool: Option<String>,
    pub risk_level: Option<RiskLevel>,
    /// Entries at or above this level.
    pub min_risk: Option<RiskLevel>,
    pub session_id: Option<String>,
    pub approved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn risk_level(mut self, level: RiskLevel) -> Self {
        self.risk_level = Some(level);
        self
    }

    pub fn min_risk(mut self, level: RiskLevel) -> Self {
        self.min_risk = Some(level);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = Some(approved);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.tool.as_deref().is_none_or(|tool| entry.tool == tool)
            && self.risk_level.is_none_or(|level| entry.risk_level == level)
            && self.min_risk.is_none_or(|level| entry.risk_level >= level)
            && self.session_id.as_deref().is_none_or(|id| entry.session_id == id)
            && self.approved.is_none_or(|approved| entry.approved == approved)
            && self.since.is_none_or(|since| entry.timestamp >= since)
    }
}

/// Aggregate counts over the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_calls: usize,
    pub approved: usize,
    pub denied: usize,
    pub by_risk: BTreeMap<RiskLevel, usize>,
    pub by_tool: BTreeMap<String, usize>,
}

impl AuditStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |mut stats, entry| {
            stats.total_calls += 1;
            if entry.approved {
                stats.approved += 1;
            } else {
                stats.denied += 1;
            }
            *stats.by_risk.entry(entry.risk_level).or_default() += 1;
            *stats.by_tool.entry(entry.tool.clone()).or_default() += 1;
            stats
        })
    }
}
