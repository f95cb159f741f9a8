// ABOUTME: Persisted "always" permission rules — JSON file with versioned schema.
// ABOUTME: Upserts by (tool, path pattern) and saves atomically through a temp file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::PermissionRule;
use crate::error::GateError;

/// Top-level rules file that persists to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesFile {
    /// Schema version for forward compatibility.
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
}

impl Default for RulesFile {
    fn default() -> Self {
        Self {
            version: 1,
            rules: Vec::new(),
        }
    }
}

impl RulesFile {
    /// Load a rules file from disk. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut file: Self = serde_json::from_str(&content)?;
        // Session-scoped rules are never persisted; drop any that were hand-edited in.
        file.rules.retain(|rule| !rule.is_session_scoped());
        Ok(file)
    }

    /// Save the rules file, creating parent directories as needed.
    /// Writes a sibling temp file then renames it over the target.
    pub fn save(&self, path: &Path) -> Result<(), GateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Insert a rule, replacing any existing rule for the same tool and path pattern.
    pub fn upsert(&mut self, rule: PermissionRule) {
        match self.rules.iter_mut().find(|existing| existing.same_slot(&rule)) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    /// Remove the rule for a tool and path pattern. Returns whether one existed.
    pub fn remove(&mut self, tool: &str, path_pattern: Option<&str>) -> bool {
        let before = self.rules.len();
        self.rules
            .retain(|rule| !(rule.tool == tool && rule.path_pattern.as_deref() == path_pattern));
        self.rules.len() != before
    }
}
