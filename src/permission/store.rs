// ABOUTME: PermissionStore — layered resolution of (tool, session, path) to a PermissionLevel.
// ABOUTME: Owns the per-session rule cache and the persisted rules, then applies the sensitive-path ceiling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::rules_file::RulesFile;
use super::sensitive::apply_ceiling;
use super::types::{ANY_TOOL, PermissionLevel, PermissionRule, Resolution, RuleSource};
use crate::error::GateError;
use crate::registry::ToolRegistry;
use crate::risk::ToolCategory;

/// Resolves effective permissions from session rules, persisted rules, and category defaults.
///
/// Lookup order, most specific first:
/// session path rule → session tool rule → persisted path rule → persisted tool rule →
/// category default → global default (`ask`). Within a tier an exact tool name beats `"*"`,
/// and when several path patterns match the most restrictive level wins.
pub struct PermissionStore {
    sessions: RwLock<HashMap<String, Vec<PermissionRule>>>,
    persisted: Mutex<RulesFile>,
    rules_path: Option<PathBuf>,
    registry: Arc<dyn ToolRegistry>,
    session_ttl: Option<chrono::Duration>,
}

impl PermissionStore {
    /// Create a store with no persisted rules and no backing file.
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            persisted: Mutex::new(RulesFile::default()),
            rules_path: None,
            registry,
            session_ttl: None,
        }
    }

    /// Create a store backed by a rules file on disk, loading it if present.
    pub fn with_rules_file(registry: Arc<dyn ToolRegistry>, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let rules = RulesFile::load(&path)?;
        let mut store = Self::new(registry);
        store.persisted = Mutex::new(rules);
        store.rules_path = Some(path);
        Ok(store)
    }

    /// Expire session-scoped grants after `ttl`. `None` keeps them for the session's lifetime.
    pub fn with_session_ttl(mut self, ttl: Option<std::time::Duration>) -> Self {
        self.session_ttl = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok());
        self
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// The effective permission level after the sensitive-path ceiling.
    pub fn get_effective(&self, tool: &str, session_id: &str, path: Option<&str>) -> PermissionLevel {
        self.resolve(tool, session_id, path).level
    }

    /// Full resolution, including which layer answered and any ceiling override.
    pub fn resolve(&self, tool: &str, session_id: &str, path: Option<&str>) -> Resolution {
        let now = Utc::now();

        let session_hit = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions.get(session_id).and_then(|rules| {
                tier(rules, tool, path, true, now, self.session_ttl)
                    .map(|level| (level, RuleSource::SessionPath))
                    .or_else(|| {
                        tier(rules, tool, path, false, now, self.session_ttl)
                            .map(|level| (level, RuleSource::SessionTool))
                    })
            })
        };

        let (level, source) = session_hit
            .or_else(|| {
                let persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
                tier(&persisted.rules, tool, path, true, now, None)
                    .map(|level| (level, RuleSource::PersistedPath))
                    .or_else(|| {
                        tier(&persisted.rules, tool, path, false, now, None)
                            .map(|level| (level, RuleSource::PersistedTool))
                    })
            })
            .unwrap_or_else(|| self.default_for(tool));

        let (level, ceiling) = apply_ceiling(level, path);
        if let Some(reason) = &ceiling {
            warn!(tool, session_id, %source, reason = reason.as_str(), "sensitive-path ceiling applied");
        }
        debug!(tool, session_id, path, %level, %source, "permission resolved");

        Resolution {
            level,
            source,
            ceiling,
        }
    }

    fn default_for(&self, tool: &str) -> (PermissionLevel, RuleSource) {
        match self.registry.category(tool) {
            Some(ToolCategory::ReadOnly) => (PermissionLevel::AllowSession, RuleSource::CategoryDefault),
            Some(_) => (PermissionLevel::Ask, RuleSource::CategoryDefault),
            None => (PermissionLevel::Ask, RuleSource::GlobalDefault),
        }
    }

    /// Upsert a session-scoped rule. Lives until the session is cleared or the TTL lapses.
    pub fn set_permission(&self, tool: &str, level: PermissionLevel, session_id: &str, path_pattern: Option<&str>) {
        let rule = PermissionRule::session(tool, level, session_id, path_pattern);
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let rules = sessions.entry(session_id.to_string()).or_default();
        rules.retain(|existing| is_live(existing, now, self.session_ttl) && !existing.same_slot(&rule));
        rules.push(rule);
        debug!(tool, session_id, path_pattern, %level, "session permission set");
    }

    /// Upsert a persisted rule and write the rules file when one is configured.
    pub fn persist_permission(
        &self,
        tool: &str,
        level: PermissionLevel,
        path_pattern: Option<&str>,
    ) -> Result<(), GateError> {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        persisted.upsert(PermissionRule::persisted(tool, level, path_pattern));
        if let Some(path) = &self.rules_path {
            persisted.save(path)?;
        }
        debug!(tool, path_pattern, %level, "persisted permission set");
        Ok(())
    }

    /// Remove a persisted rule. Returns whether one existed.
    pub fn remove_persisted(&self, tool: &str, path_pattern: Option<&str>) -> Result<bool, GateError> {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = persisted.remove(tool, path_pattern);
        if removed {
            if let Some(path) = &self.rules_path {
                persisted.save(path)?;
            }
        }
        Ok(removed)
    }

    /// Drop every session-scoped rule for a session. Returns how many were dropped.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = sessions.remove(session_id).map(|rules| rules.len()).unwrap_or(0);
        debug!(session_id, dropped, "session permissions cleared");
        dropped
    }

    /// Prune expired session grants across all sessions. Returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        if self.session_ttl.is_none() {
            return 0;
        }
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut dropped = 0;
        for rules in sessions.values_mut() {
            let before = rules.len();
            rules.retain(|rule| is_live(rule, now, self.session_ttl));
            dropped += before - rules.len();
        }
        sessions.retain(|_, rules| !rules.is_empty());
        dropped
    }

    /// Live session-scoped rules, in the order they were set.
    pub fn session_rules(&self, session_id: &str) -> Vec<PermissionRule> {
        let now = Utc::now();
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|rule| is_live(rule, now, self.session_ttl))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn persisted_rules(&self) -> Vec<PermissionRule> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .clone()
    }
}

fn is_live(rule: &PermissionRule, now: DateTime<Utc>, ttl: Option<chrono::Duration>) -> bool {
    ttl.is_none_or(|ttl| now.signed_duration_since(rule.granted_at) < ttl)
}

/// Most restrictive level among rules in one tier, preferring an exact tool name over `"*"`.
fn tier(
    rules: &[PermissionRule],
    tool: &str,
    path: Option<&str>,
    by_path: bool,
    now: DateTime<Utc>,
    ttl: Option<chrono::Duration>,
) -> Option<PermissionLevel> {
    let lookup = |name: &str| {
        rules
            .iter()
            .filter(|rule| rule.tool == name && is_live(rule, now, ttl))
            .filter(|rule| match (by_path, path) {
                (true, Some(path)) => rule.matches_path(path),
                (true, None) => false,
                (false, _) => rule.path_pattern.is_none(),
            })
            .map(|rule| rule.level)
            .max()
    };
    lookup(tool).or_else(|| lookup(ANY_TOOL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use std::time::Duration;

    fn store() -> PermissionStore {
        PermissionStore::new(Arc::new(StaticRegistry::builtin()))
    }

    #[test]
    fn shell_tools_default_to_ask() {
        let store = store();
        let resolution = store.resolve("run_shell_command", "s2", None);
        assert_eq!(resolution.level, PermissionLevel::Ask);
        assert_eq!(resolution.source, RuleSource::CategoryDefault);
    }

    #[test]
    fn read_only_tools_default_to_allow_session() {
        let store = store();
        for tool in ["read_file", "read_many_files", "list_directory", "glob", "search_file_content"] {
            assert_eq!(store.get_effective(tool, "s1", None), PermissionLevel::AllowSession, "{tool}");
        }
    }

    #[test]
    fn session_deny_overrides_read_only_default() {
        let store = store();
        store.set_permission("read_file", PermissionLevel::Deny, "s1", None);
        assert_eq!(store.get_effective("read_file", "s1", None), PermissionLevel::Deny);
        assert_eq!(store.get_effective("read_file", "s2", None), PermissionLevel::AllowSession);
    }

    #[test]
    fn unknown_tools_fall_to_global_default() {
        let store = store();
        let resolution = store.resolve("launch_rockets", "s1", None);
        assert_eq!(resolution.level, PermissionLevel::Ask);
        assert_eq!(resolution.source, RuleSource::GlobalDefault);
    }

    #[test]
    fn session_path_rule_beats_session_tool_rule() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        store.set_permission("write_file", PermissionLevel::Deny, "s1", Some("secrets/*"));

        let resolution = store.resolve("write_file", "s1", Some("secrets/token.txt"));
        assert_eq!(resolution.level, PermissionLevel::Deny);
        assert_eq!(resolution.source, RuleSource::SessionPath);

        let resolution = store.resolve("write_file", "s1", Some("src/lib.rs"));
        assert_eq!(resolution.level, PermissionLevel::AllowSession);
        assert_eq!(resolution.source, RuleSource::SessionTool);
    }

    #[test]
    fn session_rules_beat_persisted_rules() {
        let store = store();
        store.persist_permission("web_fetch", PermissionLevel::Deny, None).unwrap();
        assert_eq!(store.resolve("web_fetch", "s1", None).source, RuleSource::PersistedTool);

        store.set_permission("web_fetch", PermissionLevel::AllowSession, "s1", None);
        assert_eq!(store.get_effective("web_fetch", "s1", None), PermissionLevel::AllowSession);
        assert_eq!(store.get_effective("web_fetch", "s2", None), PermissionLevel::Deny);
    }

    #[test]
    fn persisted_path_rule_beats_persisted_tool_rule() {
        let store = store();
        store.persist_permission("write_file", PermissionLevel::AllowSession, None).unwrap();
        store.persist_permission("write_file", PermissionLevel::Deny, Some("/opt/*")).unwrap();
        let resolution = store.resolve("write_file", "s1", Some("/opt/app/run.sh"));
        assert_eq!(resolution.level, PermissionLevel::Deny);
        assert_eq!(resolution.source, RuleSource::PersistedPath);
    }

    #[test]
    fn exact_tool_beats_wildcard() {
        let store = store();
        store.set_permission(ANY_TOOL, PermissionLevel::Deny, "s1", None);
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        assert_eq!(store.get_effective("write_file", "s1", None), PermissionLevel::AllowSession);
        assert_eq!(store.get_effective("web_fetch", "s1", None), PermissionLevel::Deny);
    }

    #[test]
    fn most_restrictive_overlapping_path_rule_wins() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", Some("src/*"));
        store.set_permission("write_file", PermissionLevel::Ask, "s1", Some("src/gate/*"));
        assert_eq!(
            store.get_effective("write_file", "s1", Some("src/gate/mod.rs")),
            PermissionLevel::Ask
        );
    }

    #[test]
    fn sensitive_ceiling_clamps_session_grant() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", Some("~/.ssh/*"));
        let resolution = store.resolve("write_file", "s1", Some("~/.ssh/authorized_keys"));
        assert_eq!(resolution.level, PermissionLevel::Ask);
        assert_eq!(resolution.source, RuleSource::SessionPath);
        assert!(resolution.ceiling.is_some());
    }

    #[test]
    fn sensitive_ceiling_clamps_read_only_default() {
        let store = store();
        let resolution = store.resolve("read_file", "s1", Some("project/.env"));
        assert_eq!(resolution.level, PermissionLevel::Ask);
        assert!(resolution.ceiling.is_some());
    }

    #[test]
    fn set_permission_upserts_same_slot() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        store.set_permission("write_file", PermissionLevel::Deny, "s1", None);
        let rules = store.session_rules("s1");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].level, PermissionLevel::Deny);
    }

    #[test]
    fn clear_session_drops_only_that_session() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        store.set_permission("write_file", PermissionLevel::AllowSession, "s2", None);
        assert_eq!(store.clear_session("s1"), 1);
        assert_eq!(store.get_effective("write_file", "s1", None), PermissionLevel::Ask);
        assert_eq!(store.get_effective("write_file", "s2", None), PermissionLevel::AllowSession);
        assert_eq!(store.clear_session("missing"), 0);
    }

    #[test]
    fn expired_session_grants_are_ignored() {
        let store = store().with_session_ttl(Some(Duration::ZERO));
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        assert_eq!(store.get_effective("write_file", "s1", None), PermissionLevel::Ask);
        assert!(store.session_rules("s1").is_empty());
        assert_eq!(store.prune_expired(), 1);
    }

    #[test]
    fn no_ttl_keeps_grants() {
        let store = store();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        assert_eq!(store.prune_expired(), 0);
        assert_eq!(store.get_effective("write_file", "s1", None), PermissionLevel::AllowSession);
    }

    #[test]
    fn persisted_rules_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let registry: Arc<dyn ToolRegistry> = Arc::new(StaticRegistry::builtin());

        let store = PermissionStore::with_rules_file(registry.clone(), &path).unwrap();
        store.persist_permission("web_fetch", PermissionLevel::AllowSession, None).unwrap();
        store.set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        drop(store);

        let reloaded = PermissionStore::with_rules_file(registry, &path).unwrap();
        assert_eq!(reloaded.get_effective("web_fetch", "s9", None), PermissionLevel::AllowSession);
        assert_eq!(reloaded.get_effective("write_file", "s1", None), PermissionLevel::Ask);
        assert_eq!(reloaded.persisted_rules().len(), 1);

        assert!(reloaded.remove_persisted("web_fetch", None).unwrap());
        let again = PermissionStore::with_rules_file(Arc::new(StaticRegistry::builtin()), &path).unwrap();
        assert!(again.persisted_rules().is_empty());
    }
}
