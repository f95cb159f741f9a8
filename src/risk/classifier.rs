// ABOUTME: RiskClassifier — maps a command string or a (tool, args) pair to a Classification.
// ABOUTME: Applies the rule table per sub-command, then chaining escalation and substitution flags.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::analysis::parse_command;
use super::rules::RuleTable;
use super::types::{Classification, RiskLevel, ToolCategory};

/// Argument keys that carry the shell string for shell-category tools.
pub const SHELL_COMMAND_KEYS: &[&str] = &["command", "cmd", "script"];

/// Knobs that change how the default tier is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierPolicy {
    /// Whether commands that match no rule (`low`) still require approval.
    pub low_requires_approval: bool,
}

/// Pure, total classifier over the ordered rule table.
#[derive(Clone, Copy)]
pub struct RiskClassifier {
    table: &'static RuleTable,
    policy: ClassifierPolicy,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(ClassifierPolicy::default())
    }
}

impl RiskClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self {
            table: RuleTable::builtin(),
            policy,
        }
    }

    pub fn policy(&self) -> ClassifierPolicy {
        self.policy
    }

    /// Classify a shell command string.
    ///
    /// Order: blocked rules, chaining escalation, substitution flag, high-risk rules,
    /// safe allowlist, and finally the `low` default.
    pub fn classify_command(&self, command: &str) -> Classification {
        let command = command.trim();
        if command.is_empty() {
            let mut result = Classification::new(RiskLevel::Low, true);
            result.reasons.push("empty command".to_string());
            return result;
        }

        let parsed = parse_command(command);
        let mut level = RiskLevel::Safe;
        let mut flagged = Vec::new();
        let mut safe_reasons = Vec::new();

        for rule in self.table.match_whole(command) {
            level = level.max(rule.risk);
            flagged.push(format!("{}: {}", rule.name, rule.reason));
        }

        for segment in &parsed.segments {
            match self.table.match_segment(segment) {
                Some(rule) if rule.risk == RiskLevel::Safe => {
                    safe_reasons.push(format!("{}: {}", rule.name, segment.raw));
                }
                Some(rule) => {
                    level = level.max(rule.risk);
                    let origin = if segment.nested { " in a nested command" } else { "" };
                    flagged.push(format!("{}: {}{} (`{}`)", rule.name, rule.reason, origin, segment.raw));
                }
                None => level = level.max(RiskLevel::Low),
            }
        }

        if parsed.segments.is_empty() {
            level = level.max(RiskLevel::Low);
        }

        if parsed.chained && level == RiskLevel::High {
            level = RiskLevel::Blocked;
            flagged.push("chained command contains a high-risk sub-command".to_string());
        }

        let mut requires_approval = match level {
            RiskLevel::Safe => false,
            RiskLevel::Low => self.policy.low_requires_approval,
            RiskLevel::Medium => false,
            RiskLevel::High | RiskLevel::Blocked => true,
        };

        let mut reasons = flagged;
        if parsed.substitution {
            requires_approval = true;
            reasons.push("command substitution cannot be verified statically".to_string());
        }
        if parsed.ambiguous {
            requires_approval = true;
            level = level.max(RiskLevel::Low);
            reasons.push("ambiguous shell syntax".to_string());
        }
        if level == RiskLevel::Safe {
            reasons.extend(safe_reasons);
        }

        if level == RiskLevel::Blocked {
            warn!(command, reasons = ?reasons, "command classified as blocked");
        } else {
            debug!(command, %level, requires_approval, "command classified");
        }

        Classification {
            risk_level: level,
            requires_approval,
            reasons,
        }
    }

    /// Classify a tool invocation from its category default, re-running command
    /// classification for shell tools and keeping the higher level.
    pub fn classify_tool(&self, tool_name: &str, category: Option<ToolCategory>, args: &Value) -> Classification {
        let base = category.map(ToolCategory::default_risk).unwrap_or(RiskLevel::Medium);
        let mut result = Classification::new(base, false);
        result.reasons.push(match category {
            Some(category) => format!("{category} tool `{tool_name}` defaults to {base}"),
            None => format!("unregistered tool `{tool_name}` defaults to {base}"),
        });

        if category == Some(ToolCategory::Shell) {
            match shell_command(args) {
                Some(command) => {
                    let inner = self.classify_command(command);
                    result.risk_level = result.risk_level.max(inner.risk_level);
                    result.requires_approval = inner.requires_approval;
                    result.reasons.extend(inner.reasons);
                }
                None => {
                    result.requires_approval = true;
                    result.reasons.push("shell tool called without a command string".to_string());
                }
            }
        }

        result
    }
}

/// The shell string carried by a shell tool's arguments, if any.
pub fn shell_command(args: &Value) -> Option<&str> {
    if let Some(command) = args.as_str() {
        return Some(command);
    }
    SHELL_COMMAND_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
}

/// Classify a command with the default policy.
pub fn classify_command(command: &str) -> Classification {
    RiskClassifier::default().classify_command(command)
}
