// ABOUTME: Gatekeeper — the single entry point invoked before any tool or shell execution.
// ABOUTME: Classifies, resolves permission, then allows, refuses, or queues, auditing every terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::policy::{ApprovalMode, GateAction, evaluate_gate};
use super::state::GateState;
use crate::approval::{ApprovalOutcome, ApprovalQueue, ApprovalRequest, PendingApproval};
use crate::audit::{AuditEntry, AuditLog, AuditStats, ExportFormat};
use crate::config::Config;
use crate::error::GateError;
use crate::permission::{PermissionLevel, PermissionStore, Resolution, is_sensitive};
use crate::registry::ToolRegistry;
use crate::risk::{Classification, ClassifierPolicy, RiskClassifier, RiskLevel, ToolCategory, shell_command};

/// Argument keys that name the file or directory a tool acts on.
pub const PATH_ARG_KEYS: &[&str] = &[
    "path",
    "file_path",
    "filePath",
    "absolute_path",
    "dir_path",
    "target",
    "destination",
];

const PARAMS_PREVIEW_CHARS: usize = 60;

/// Idle per-session locks are swept once this many sessions are tracked.
pub const SESSION_LOCK_SWEEP: usize = 256;

/// Gate-wide behavior knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub mode: ApprovalMode,
    pub auto_allow_low: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::Interactive,
            auto_allow_low: true,
        }
    }
}

/// Result of `check_and_gate`. Only `allowed == true` lets the caller execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub terminal: GateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub risk_level: RiskLevel,
}

impl GateDecision {
    fn terminal(terminal: GateState, risk_level: RiskLevel, reason: Option<String>) -> Self {
        Self {
            allowed: terminal.permits_execution(),
            terminal,
            reason,
            approval_id: None,
            risk_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Deny,
}

/// Whether a resolution also writes a session-wide rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    Once,
    Session,
}

/// What a call to [`Gatekeeper::prune_expired`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pruned {
    pub grants: usize,
    pub approvals: usize,
    pub locks: usize,
}

/// Session lifecycle notifications from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(String),
    /// Explicit permission cache refresh.
    Refreshed(String),
    /// Teardown: grants are dropped and pending approvals abandoned.
    Ended(String),
}

/// Orchestrates classifier, permission store, approval queue, and audit log.
pub struct Gatekeeper {
    classifier: RiskClassifier,
    registry: Arc<dyn ToolRegistry>,
    store: Arc<PermissionStore>,
    queue: Arc<ApprovalQueue>,
    audit: Arc<AuditLog>,
    settings: GateSettings,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Gatekeeper {
    /// In-memory gatekeeper with default settings.
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        let store = Arc::new(PermissionStore::new(registry.clone()));
        let audit = Arc::new(AuditLog::in_memory());
        let queue = Arc::new(ApprovalQueue::new(store.clone(), audit.clone()));
        Self::from_parts(RiskClassifier::default(), store, queue, audit, GateSettings::default())
    }

    /// Assemble from existing components. The store's registry is used for lookups.
    pub fn from_parts(
        classifier: RiskClassifier,
        store: Arc<PermissionStore>,
        queue: Arc<ApprovalQueue>,
        audit: Arc<AuditLog>,
        settings: GateSettings,
    ) -> Self {
        Self {
            classifier,
            registry: store.registry().clone(),
            store,
            queue,
            audit,
            settings,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration: persisted rules file, audit file, TTLs, and mode.
    pub fn from_config(config: &Config, registry: Arc<dyn ToolRegistry>) -> anyhow::Result<Self> {
        let store = Arc::new(
            PermissionStore::with_rules_file(registry, config.gate.resolved_rules_path())?
                .with_session_ttl(config.gate.session_grant_ttl()),
        );
        let audit = Arc::new(if config.audit.persist {
            AuditLog::open(config.audit.resolved_path(), config.audit.settings())?
        } else {
            AuditLog::with_settings(config.audit.settings())
        });
        let queue = Arc::new(
            ApprovalQueue::new(store.clone(), audit.clone()).with_pending_ttl(config.gate.pending_ttl()),
        );
        let classifier = RiskClassifier::new(ClassifierPolicy {
            low_requires_approval: config.gate.low_requires_approval,
        });
        let settings = GateSettings {
            mode: config.gate.mode,
            auto_allow_low: config.gate.auto_allow_low,
        };
        Ok(Self::from_parts(classifier, store, queue, audit, settings))
    }

    pub fn settings(&self) -> GateSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<ApprovalQueue> {
        &self.queue
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= SESSION_LOCK_SWEEP && !locks.contains_key(session_id) {
            let before = locks.len();
            retain_held(&mut locks);
            debug!(swept = before - locks.len(), "idle session locks swept");
        }
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Number of sessions with a serialization lock currently tracked.
    pub fn tracked_sessions(&self) -> usize {
        self.session_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop expired session grants and pending approvals, then release the locks of
    /// sessions with no call in flight. Expired approvals are audited as denied.
    pub fn prune_expired(&self) -> Pruned {
        let grants = self.store.prune_expired();
        let approvals = self.queue.expire_stale();
        let locks = {
            let mut locks = self.session_locks.lock().unwrap_or_else(PoisonError::into_inner);
            let before = locks.len();
            retain_held(&mut locks);
            before - locks.len()
        };
        let pruned = Pruned { grants, approvals, locks };
        debug!(?pruned, "expired state pruned");
        pruned
    }

    /// Gate one tool invocation using the configured approval mode.
    pub fn check_and_gate(&self, tool: &str, args: &Value, session_id: &str) -> GateDecision {
        self.check_and_gate_with(tool, args, session_id, self.settings.mode)
    }

    /// Gate one tool invocation with an explicit approval mode for this call.
    pub fn check_and_gate_with(&self, tool: &str, args: &Value, session_id: &str, mode: ApprovalMode) -> GateDecision {
        let lock = self.session_lock(session_id);
        let _serialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(tool, session_id, state = %GateState::Received, "gate invoked");

        let spec = self.registry.lookup(tool);
        let category = spec.as_ref().map(|spec| spec.category);
        let mut classification = self.classifier.classify_tool(tool, category, args);
        let command = match category {
            Some(ToolCategory::Shell) => shell_command(args),
            _ => None,
        };
        let path = target_path(args);
        debug!(tool, session_id, risk = %classification.risk_level, state = %GateState::Classified, "invocation classified");

        if classification.is_blocked() {
            return self.block(session_id, tool, command, path, &classification);
        }

        let resolution = self.store.resolve(tool, session_id, path);
        if let Some(path) = path.filter(|p| is_sensitive(p)) {
            classification.requires_approval = true;
            classification.reasons.push(format!("sensitive path {path}"));
        }

        let action = evaluate_gate(&classification, resolution.level, mode, self.settings.auto_allow_low);
        match action {
            GateAction::Block => self.block(session_id, tool, command, path, &classification),
            GateAction::Deny => {
                let reason = deny_reason(&resolution, mode);
                self.finish(session_id, tool, command, path, &classification, GateState::DeniedTerminal, reason, &resolution)
            }
            GateAction::Allow => {
                let reason = format!("allowed by {}", resolution.source);
                self.finish(session_id, tool, command, path, &classification, GateState::AutoAllowedTerminal, reason, &resolution)
            }
            GateAction::Queue | GateAction::Bypass => {
                let display_name = spec.as_ref().map_or(tool, |spec| spec.display_name.as_str());
                let description = describe(display_name, args, &classification, path);
                let request = ApprovalRequest::new(session_id, tool, &description, classification.risk_level)
                    .with_path(path)
                    .with_command(command)
                    .with_note(resolution.ceiling.clone());
                let id = match self.queue.enqueue(request) {
                    Ok(id) => id,
                    Err(err) => {
                        let reason = format!("could not queue for approval: {err}");
                        return self.finish(session_id, tool, command, path, &classification, GateState::DeniedTerminal, reason, &resolution);
                    }
                };

                if action == GateAction::Bypass {
                    let (terminal, reason) = if self.queue.approve(session_id, &id, false) {
                        info!(tool, session_id, id = id.as_str(), "approval bypassed by skip-all mode");
                        (GateState::ApprovedTerminal, "approved by skip-all mode")
                    } else {
                        warn!(tool, session_id, id = id.as_str(), "skip-all approval expired before it applied");
                        (GateState::DeniedTerminal, "approval expired")
                    };
                    let mut decision = GateDecision::terminal(terminal, classification.risk_level, Some(reason.to_string()));
                    decision.approval_id = Some(id);
                    return decision;
                }

                info!(tool, session_id, id = id.as_str(), risk = %classification.risk_level, "invocation queued for approval");
                GateDecision {
                    allowed: false,
                    terminal: GateState::QueuedForApproval,
                    reason: Some(format!("awaiting approval: {description}")),
                    approval_id: Some(id),
                    risk_level: classification.risk_level,
                }
            }
        }
    }

    fn block(
        &self,
        session_id: &str,
        tool: &str,
        command: Option<&str>,
        path: Option<&str>,
        classification: &Classification,
    ) -> GateDecision {
        let reason = format!("blocked: {}", classification.summary());
        warn!(tool, session_id, command, reason = reason.as_str(), "invocation blocked");
        self.record(session_id, tool, command, path, classification, GateState::BlockedTerminal, Some(reason.clone()));
        GateDecision::terminal(GateState::BlockedTerminal, classification.risk_level, Some(reason))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        session_id: &str,
        tool: &str,
        command: Option<&str>,
        path: Option<&str>,
        classification: &Classification,
        terminal: GateState,
        reason: String,
        resolution: &Resolution,
    ) -> GateDecision {
        let reason = match &resolution.ceiling {
            Some(ceiling) => format!("{reason}; {ceiling}"),
            None => reason,
        };
        info!(tool, session_id, %terminal, risk = %classification.risk_level, reason = reason.as_str(), "gate decision");
        self.record(session_id, tool, command, path, classification, terminal, Some(reason.clone()));
        GateDecision::terminal(terminal, classification.risk_level, Some(reason))
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        session_id: &str,
        tool: &str,
        command: Option<&str>,
        path: Option<&str>,
        classification: &Classification,
        terminal: GateState,
        reason: Option<String>,
    ) {
        let mut entry = AuditEntry::new(session_id, tool, classification.risk_level, terminal)
            .with_command(command)
            .with_path(path);
        entry.reason = reason;
        self.audit.append(&entry);
    }

    /// Pending approvals for a session, oldest first.
    pub fn pending_approvals(&self, session_id: &str) -> Vec<PendingApproval> {
        self.queue.list(session_id)
    }

    /// Resolve a queued invocation. Returns `false` for unknown ids.
    pub fn resolve_approval(&self, session_id: &str, id: &str, action: ApprovalAction, scope: ApprovalScope) -> bool {
        let lock = self.session_lock(session_id);
        let _serialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let for_session = scope == ApprovalScope::Session;
        match action {
            ApprovalAction::Approve => self.queue.approve(session_id, id, for_session),
            ApprovalAction::Deny => self.queue.deny(session_id, id, for_session),
        }
    }

    /// Resolve every queued invocation for a session. Returns how many were resolved.
    pub fn resolve_all(&self, session_id: &str, action: ApprovalAction, scope: ApprovalScope) -> usize {
        let lock = self.session_lock(session_id);
        let _serialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
        match action {
            ApprovalAction::Approve => self.queue.approve_all(session_id, scope == ApprovalScope::Session),
            ApprovalAction::Deny => self.queue.deny_all(session_id),
        }
    }

    /// Await the outcome of a queued invocation. `None` when the wait times out or the
    /// session is abandoned; a timed-out approval stays pending.
    pub async fn wait_for_resolution(&self, session_id: &str, id: &str, timeout: Duration) -> Option<ApprovalOutcome> {
        let waiter = self.queue.waiter(session_id, id)?;
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => {
                debug!(session_id, id, "approval abandoned");
                None
            }
            Err(_) => {
                debug!(session_id, id, "approval wait timed out");
                None
            }
        }
    }

    pub fn audit_stats(&self, session_id: Option<&str>) -> AuditStats {
        self.audit.stats(session_id)
    }

    pub fn export_audit(&self, format: ExportFormat) -> Result<String, GateError> {
        self.audit.export(format)
    }

    pub fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Started(session_id) => {
                debug!(session_id = session_id.as_str(), "session started");
            }
            SessionEvent::Refreshed(session_id) => {
                let dropped = self.store.clear_session(&session_id);
                info!(session_id = session_id.as_str(), dropped, "session permissions refreshed");
            }
            SessionEvent::Ended(session_id) => {
                let lock = self.session_lock(&session_id);
                {
                    let _serialized = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    let grants = self.store.clear_session(&session_id);
                    let abandoned = self.queue.clear(&session_id);
                    info!(session_id = session_id.as_str(), grants, abandoned, "session ended");
                }
                self.session_locks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&session_id);
            }
        }
    }
}

/// Keep only the locks some in-flight call still holds a handle to.
fn retain_held(locks: &mut HashMap<String, Arc<Mutex<()>>>) {
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
}

fn deny_reason(resolution: &Resolution, mode: ApprovalMode) -> String {
    match resolution.level {
        PermissionLevel::Deny => format!("denied by {}", resolution.source),
        _ => format!("approval required but mode is {mode}"),
    }
}

/// The file or directory an invocation acts on, if its arguments name one.
pub fn target_path(args: &Value) -> Option<&str> {
    PATH_ARG_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .filter(|path| !path.is_empty())
}

/// Human-facing description: display name, truncated params, risk, and affected path.
fn describe(display_name: &str, args: &Value, classification: &Classification, path: Option<&str>) -> String {
    let params = args.to_string();
    let truncated = if params.chars().count() > PARAMS_PREVIEW_CHARS {
        format!("{}...", params.chars().take(PARAMS_PREVIEW_CHARS).collect::<String>())
    } else {
        params
    };
    let mut description = format!("{display_name}({truncated}) [risk: {}]", classification.risk_level);
    if let Some(path) = path {
        description.push_str(&format!(" [path: {path}]"));
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use serde_json::json;

    fn skip_all_gate_with_pending_ttl(ttl: Duration) -> Gatekeeper {
        let registry: Arc<dyn ToolRegistry> = Arc::new(StaticRegistry::builtin());
        let store = Arc::new(PermissionStore::new(registry));
        let audit = Arc::new(AuditLog::in_memory());
        let queue = Arc::new(ApprovalQueue::new(store.clone(), audit.clone()).with_pending_ttl(Some(ttl)));
        let settings = GateSettings {
            mode: ApprovalMode::SkipAll,
            ..GateSettings::default()
        };
        Gatekeeper::from_parts(RiskClassifier::default(), store, queue, audit, settings)
    }

    fn gate() -> Gatekeeper {
        Gatekeeper::new(Arc::new(StaticRegistry::builtin()))
    }

    #[test]
    fn read_only_tool_is_auto_allowed() {
        let gate = gate();
        let decision = gate.check_and_gate("read_file", &json!({ "path": "src/lib.rs" }), "s1");
        assert!(decision.allowed);
        assert_eq!(decision.terminal, GateState::AutoAllowedTerminal);
        assert_eq!(gate.audit().len(), 1);
    }

    #[test]
    fn blocked_command_is_refused_and_audited() {
        let gate = gate();
        gate.store().set_permission("run_shell_command", PermissionLevel::AllowSession, "s1", None);
        let decision = gate.check_and_gate("run_shell_command", &json!({ "command": "echo hi; rm -rf /" }), "s1");
        assert!(!decision.allowed);
        assert_eq!(decision.terminal, GateState::BlockedTerminal);
        assert!(decision.reason.unwrap().starts_with("blocked"));
        assert!(gate.pending_approvals("s1").is_empty());

        let entry = &gate.audit().entries()[0];
        assert!(!entry.approved);
        assert_eq!(entry.command.as_deref(), Some("echo hi; rm -rf /"));
    }

    #[test]
    fn write_tool_is_queued_with_description() {
        let gate = gate();
        let decision = gate.check_and_gate("write_file", &json!({ "file_path": "src/main.rs", "content": "fn main() {}" }), "s1");
        assert_eq!(decision.terminal, GateState::QueuedForApproval);
        assert!(!decision.allowed);
        let pending = gate.pending_approvals("s1");
        assert_eq!(pending.len(), 1);
        assert_eq!(Some(pending[0].id.clone()), decision.approval_id);
        assert!(pending[0].description.starts_with("WriteFile("));
        assert!(pending[0].description.contains("[risk: medium]"));
        assert!(pending[0].description.contains("[path: src/main.rs]"));
        assert!(gate.audit().is_empty());
    }

    #[test]
    fn resolving_queued_invocation_writes_one_entry() {
        let gate = gate();
        let decision = gate.check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1");
        let id = decision.approval_id.unwrap();
        assert!(gate.resolve_approval("s1", &id, ApprovalAction::Approve, ApprovalScope::Session));
        assert!(!gate.resolve_approval("s1", &id, ApprovalAction::Approve, ApprovalScope::Session));
        assert_eq!(gate.audit().len(), 1);
        assert_eq!(gate.audit().entries()[0].terminal, GateState::ApprovedTerminal);

        let again = gate.check_and_gate("web_fetch", &json!({ "url": "https://example.org" }), "s1");
        assert_eq!(again.terminal, GateState::AutoAllowedTerminal);
    }

    #[test]
    fn auto_deny_mode_refuses_instead_of_queueing() {
        let gate = gate();
        let decision = gate.check_and_gate_with("write_file", &json!({ "path": "a.txt" }), "s1", ApprovalMode::AutoDeny);
        assert_eq!(decision.terminal, GateState::DeniedTerminal);
        assert!(decision.reason.unwrap().contains("auto-deny"));
        assert!(gate.pending_approvals("s1").is_empty());
        assert_eq!(gate.audit().len(), 1);
    }

    #[test]
    fn skip_all_mode_approves_through_the_queue() {
        let gate = gate();
        let decision = gate.check_and_gate_with("write_file", &json!({ "path": "a.txt" }), "s1", ApprovalMode::SkipAll);
        assert!(decision.allowed);
        assert_eq!(decision.terminal, GateState::ApprovedTerminal);
        assert!(decision.approval_id.is_some());
        assert!(gate.pending_approvals("s1").is_empty());
        assert_eq!(gate.audit().len(), 1);
    }

    #[test]
    fn skip_all_reports_the_expiry_it_audits() {
        let gate = skip_all_gate_with_pending_ttl(Duration::ZERO);
        let decision = gate.check_and_gate("write_file", &json!({ "path": "a.txt" }), "s1");
        assert!(!decision.allowed);
        assert_eq!(decision.terminal, GateState::DeniedTerminal);
        assert_eq!(decision.reason.as_deref(), Some("approval expired"));

        let entries = gate.audit().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].terminal, decision.terminal);
        assert_eq!(entries[0].approved, decision.allowed);
        assert!(gate.pending_approvals("s1").is_empty());
    }

    #[test]
    fn skip_all_with_live_ttl_still_approves() {
        let gate = skip_all_gate_with_pending_ttl(Duration::from_secs(3600));
        let decision = gate.check_and_gate("write_file", &json!({ "path": "a.txt" }), "s1");
        assert!(decision.allowed);
        assert_eq!(gate.audit().entries()[0].terminal, GateState::ApprovedTerminal);
    }

    #[test]
    fn skip_all_does_not_override_blocked_or_deny() {
        let gate = gate();
        let blocked = gate.check_and_gate_with("run_shell_command", &json!({ "command": "mkfs.ext4 /dev/sda1" }), "s1", ApprovalMode::SkipAll);
        assert_eq!(blocked.terminal, GateState::BlockedTerminal);

        gate.store().set_permission("delete_file", PermissionLevel::Deny, "s1", None);
        let denied = gate.check_and_gate_with("delete_file", &json!({ "path": "a.txt" }), "s1", ApprovalMode::SkipAll);
        assert_eq!(denied.terminal, GateState::DeniedTerminal);
    }

    #[test]
    fn sensitive_path_is_never_auto_allowed() {
        let gate = gate();
        let decision = gate.check_and_gate("read_file", &json!({ "path": "~/.ssh/id_rsa" }), "s1");
        assert_eq!(decision.terminal, GateState::QueuedForApproval);
        let id = decision.approval_id.unwrap();
        gate.resolve_approval("s1", &id, ApprovalAction::Deny, ApprovalScope::Once);
        let reason = gate.audit().entries()[0].reason.clone().unwrap();
        assert!(reason.contains("sensitive pattern"));
    }

    #[test]
    fn session_grant_does_not_cover_credential_directories() {
        let gate = gate();
        gate.store().set_permission("delete_file", PermissionLevel::AllowSession, "s1", None);
        for path in ["~/.ssh", ".git", "~/.aws/"] {
            let decision = gate.check_and_gate("delete_file", &json!({ "path": path }), "s1");
            assert!(!decision.allowed, "{path}");
            assert_eq!(decision.terminal, GateState::QueuedForApproval, "{path}");
        }
        let allowed = gate.check_and_gate("delete_file", &json!({ "path": "build/out.o" }), "s1");
        assert_eq!(allowed.terminal, GateState::AutoAllowedTerminal);
    }

    #[test]
    fn idle_session_locks_are_pruned() {
        let gate = gate();
        for i in 0..5 {
            gate.check_and_gate("read_file", &json!({ "path": "a.rs" }), &format!("s{i}"));
        }
        assert_eq!(gate.tracked_sessions(), 5);

        let pruned = gate.prune_expired();
        assert_eq!(pruned.locks, 5);
        assert_eq!(gate.tracked_sessions(), 0);

        let decision = gate.check_and_gate("read_file", &json!({ "path": "a.rs" }), "s0");
        assert!(decision.allowed);
        assert_eq!(gate.tracked_sessions(), 1);
    }

    #[test]
    fn session_locks_stay_bounded_without_session_end() {
        let gate = gate();
        for i in 0..SESSION_LOCK_SWEEP * 3 {
            gate.check_and_gate("read_file", &json!({ "path": "a.rs" }), &format!("s{i}"));
            assert!(gate.tracked_sessions() <= SESSION_LOCK_SWEEP);
        }
    }

    #[test]
    fn session_end_clears_grants_and_pending() {
        let gate = gate();
        gate.store().set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        gate.check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1");

        gate.handle_session_event(SessionEvent::Ended("s1".to_string()));
        assert!(gate.pending_approvals("s1").is_empty());
        assert!(gate.store().session_rules("s1").is_empty());
        assert!(gate.audit().is_empty());
    }

    #[test]
    fn session_refresh_keeps_pending() {
        let gate = gate();
        gate.store().set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        gate.check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1");

        gate.handle_session_event(SessionEvent::Refreshed("s1".to_string()));
        assert!(gate.store().session_rules("s1").is_empty());
        assert_eq!(gate.pending_approvals("s1").len(), 1);
    }

    #[test]
    fn description_truncates_long_params() {
        let args = json!({ "content": "x".repeat(200) });
        let description = describe("WriteFile", &args, &Classification::new(RiskLevel::Medium, false), None);
        assert!(description.contains("..."));
        assert!(description.len() < 120);
    }

    #[test]
    fn target_path_checks_known_keys() {
        assert_eq!(target_path(&json!({ "file_path": "a.rs" })), Some("a.rs"));
        assert_eq!(target_path(&json!({ "dir_path": "src" })), Some("src"));
        assert_eq!(target_path(&json!({ "path": "" })), None);
        assert_eq!(target_path(&json!({ "url": "https://x" })), None);
    }

    #[tokio::test]
    async fn wait_for_resolution_sees_decision() {
        let gate = Arc::new(gate());
        let decision = gate.check_and_gate("write_file", &json!({ "path": "a.txt" }), "s1");
        let id = decision.approval_id.unwrap();

        let resolver = {
            let gate = gate.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.resolve_approval("s1", &id, ApprovalAction::Approve, ApprovalScope::Once)
            })
        };
        let outcome = gate.wait_for_resolution("s1", &id, Duration::from_secs(5)).await;
        assert_eq!(outcome, Some(ApprovalOutcome::Approved));
        assert!(resolver.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_resolution_times_out() {
        let gate = gate();
        let id = gate
            .check_and_gate("write_file", &json!({ "path": "a.txt" }), "s1")
            .approval_id
            .unwrap();
        let outcome = gate.wait_for_resolution("s1", &id, Duration::from_millis(10)).await;
        assert_eq!(outcome, None);
        assert_eq!(gate.pending_approvals("s1").len(), 1);
    }
}
