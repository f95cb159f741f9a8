// ABOUTME: Permission types — PermissionLevel, PermissionRule, and where a resolution came from.
// ABOUTME: Rules are keyed by tool (or "*") plus an optional glob path pattern.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use super::sensitive::expand_home;

/// Wildcard tool name, matching any tool in its tier.
pub const ANY_TOOL: &str = "*";

/// Effective permission for a tool invocation. Ordered from most to least permissive,
/// so `max` picks the more restrictive of two levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    AllowSession,
    Ask,
    Deny,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::AllowSession => "allow_session",
            PermissionLevel::Ask => "ask",
            PermissionLevel::Deny => "deny",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "allow_session" | "allow" => Ok(PermissionLevel::AllowSession),
            "ask" => Ok(PermissionLevel::Ask),
            "deny" => Ok(PermissionLevel::Deny),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

/// A stored grant or denial. `session_id == None` marks a persisted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    pub level: PermissionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub granted_at: DateTime<Utc>,
}

impl PermissionRule {
    pub fn session(tool: &str, level: PermissionLevel, session_id: &str, path_pattern: Option<&str>) -> Self {
        Self {
            tool: tool.to_string(),
            path_pattern: path_pattern.map(str::to_string),
            level,
            session_id: Some(session_id.to_string()),
            granted_at: Utc::now(),
        }
    }

    pub fn persisted(tool: &str, level: PermissionLevel, path_pattern: Option<&str>) -> Self {
        Self {
            tool: tool.to_string(),
            path_pattern: path_pattern.map(str::to_string),
            level,
            session_id: None,
            granted_at: Utc::now(),
        }
    }

    pub fn is_session_scoped(&self) -> bool {
        self.session_id.is_some()
    }

    /// Whether `other` occupies the same slot (same tool and path pattern).
    pub fn same_slot(&self, other: &PermissionRule) -> bool {
        self.tool == other.tool && self.path_pattern == other.path_pattern
    }

    /// Glob match of the rule's path pattern against a resolved path.
    /// `~` is expanded on both sides. Rules without a pattern never match a path.
    pub fn matches_path(&self, path: &str) -> bool {
        let Some(pattern) = &self.path_pattern else {
            return false;
        };
        Pattern::new(&expand_home(pattern))
            .map(|p| p.matches(&expand_home(path)))
            .unwrap_or(false)
    }
}

/// Which layer produced an effective permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    SessionPath,
    SessionTool,
    PersistedPath,
    PersistedTool,
    CategoryDefault,
    GlobalDefault,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::SessionPath => "session path rule",
            RuleSource::SessionTool => "session tool rule",
            RuleSource::PersistedPath => "persisted path rule",
            RuleSource::PersistedTool => "persisted tool rule",
            RuleSource::CategoryDefault => "category default",
            RuleSource::GlobalDefault => "global default",
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a permission lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub level: PermissionLevel,
    pub source: RuleSource,
    /// Set when the sensitive-path ceiling clamped a more permissive rule.
    pub ceiling: Option<String>,
}
