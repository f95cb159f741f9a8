// ABOUTME: Integration tests for the gatekeeper.
// ABOUTME: Tests the full flow: classifier + permission store + approval queue + audit log.

use std::sync::Arc;
use std::thread;

use serde_json::json;

use clawgate::approval::ApprovalRequest;
use clawgate::audit::{AuditEntry, AuditFilter, ExportFormat};
use clawgate::config::Config;
use clawgate::gate::{ApprovalAction, ApprovalMode, ApprovalScope, GateState, Gatekeeper, SessionEvent};
use clawgate::permission::PermissionLevel;
use clawgate::registry::StaticRegistry;
use clawgate::risk::{RiskLevel, classify_command};

fn gate() -> Gatekeeper {
    Gatekeeper::new(Arc::new(StaticRegistry::builtin()))
}

/// A config that keeps every file inside `dir`.
fn config_in(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.gate.rules_path = Some(dir.join("rules.json"));
    config.audit.path = Some(dir.join("audit.jsonl"));
    config
}

/// Scenario A: a harmless command chained with a root wipe is blocked outright.
#[test]
fn chained_root_wipe_is_blocked() {
    let classification = classify_command("echo hi; rm -rf /");
    assert_eq!(classification.risk_level, RiskLevel::Blocked);
    assert!(classification.requires_approval);
}

/// Scenario B: read-only git commands are safe and need no approval.
#[test]
fn git_status_is_safe() {
    let classification = classify_command("git status");
    assert_eq!(classification.risk_level, RiskLevel::Safe);
    assert!(!classification.requires_approval);
}

/// Scenario C: three queued approvals resolved in one batch produce three
/// approved audit entries and leave the session queue empty.
#[test]
fn approve_all_resolves_every_pending_entry() {
    let gate = gate();
    for tool in ["write_file", "replace", "web_fetch"] {
        let decision = gate.check_and_gate(tool, &json!({ "path": "notes.md" }), "s1");
        assert_eq!(decision.terminal, GateState::QueuedForApproval);
    }
    assert_eq!(gate.pending_approvals("s1").len(), 3);

    assert_eq!(gate.queue().approve_all("s1", false), 3);
    assert!(gate.pending_approvals("s1").is_empty());

    let entries = gate.audit().entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.approved));
    let tools: Vec<_> = entries.iter().map(|e| e.tool.as_str()).collect();
    assert_eq!(tools, vec!["write_file", "replace", "web_fetch"]);
}

/// Scenario D: with no rules, the shell tool resolves to ask.
#[test]
fn shell_tool_defaults_to_ask() {
    let gate = gate();
    assert_eq!(gate.store().get_effective("run_shell_command", "s2", None), PermissionLevel::Ask);
}

/// Scenario E: a session deny rule refuses the call without queueing it.
#[test]
fn session_deny_rule_refuses_without_queueing() {
    let gate = gate();
    gate.store().set_permission("delete_file", PermissionLevel::Deny, "s3", None);

    let decision = gate.check_and_gate("delete_file", &json!({ "path": "build.log" }), "s3");
    assert!(!decision.allowed);
    assert_eq!(decision.terminal, GateState::DeniedTerminal);
    assert!(decision.reason.unwrap().contains("session tool rule"));
    assert!(gate.pending_approvals("s3").is_empty());

    let entries = gate.audit().entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].approved);
    assert_eq!(entries[0].path.as_deref(), Some("build.log"));
}

/// No combination of stored rules or approval mode lets a blocked command through.
#[test]
fn blocked_commands_ignore_every_rule() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Gatekeeper::from_config(&config_in(dir.path()), Arc::new(StaticRegistry::builtin())).unwrap();
    gate.store()
        .persist_permission("run_shell_command", PermissionLevel::AllowSession, None)
        .unwrap();
    gate.store().set_permission("*", PermissionLevel::AllowSession, "s1", None);

    let commands = [
        "rm -rf /",
        "rm -rf ~",
        "dd if=/dev/zero of=/dev/sda",
        "mkfs.ext4 /dev/sdb1",
        "ls && git push --force",
        ":(){ :|:& };:",
    ];
    for command in commands {
        for mode in [ApprovalMode::Interactive, ApprovalMode::AutoDeny, ApprovalMode::SkipAll] {
            let decision = gate.check_and_gate_with("run_shell_command", &json!({ "command": command }), "s1", mode);
            assert!(!decision.allowed, "{command} allowed in {mode}");
            assert_eq!(decision.terminal, GateState::BlockedTerminal, "{command} in {mode}");
        }
    }
    assert!(gate.pending_approvals("s1").is_empty());
    let blocked = gate.audit().query(&AuditFilter::default().risk_level(RiskLevel::Blocked));
    assert_eq!(blocked.len(), commands.len() * 3);
}

/// Blocked risk is refused at the queue too, not just at the gate.
/// Runners, `xargs`, and deleting `find` cannot slip a destructive command past a
/// blanket shell grant.
#[test]
fn wrapped_destructive_commands_are_blocked_under_grant() {
    let gate = gate();
    gate.store().set_permission("run_shell_command", PermissionLevel::AllowSession, "s1", None);

    let commands = [
        "timeout 10 rm -rf /",
        "busybox rm -rf /",
        "echo / | xargs rm -rf",
        "find / -delete",
        "ls; find / -delete",
        "find ~ -exec rm -rf {} +",
        r#"watch "rm -rf ~""#,
    ];
    for command in commands {
        let decision = gate.check_and_gate_with("run_shell_command", &json!({ "command": command }), "s1", ApprovalMode::SkipAll);
        assert!(!decision.allowed, "{command}");
        assert_eq!(decision.terminal, GateState::BlockedTerminal, "{command}");
        assert_eq!(decision.risk_level, RiskLevel::Blocked, "{command}");
    }
    assert_eq!(gate.audit().len(), commands.len());

    let scoped = gate.check_and_gate("run_shell_command", &json!({ "command": "find ./build -name '*.o' -delete" }), "s1");
    assert_eq!(scoped.terminal, GateState::AutoAllowedTerminal);
}

#[test]
fn queue_refuses_blocked_requests() {
    let gate = gate();
    let request = ApprovalRequest::new("s1", "run_shell_command", "rm -rf /", RiskLevel::Blocked);
    assert!(gate.queue().enqueue(request).is_err());
    assert_eq!(gate.queue().pending_count(), 0);
}

/// Read-only tools are allowed by default in every session until a session deny rule lands.
#[test]
fn read_only_tools_allowed_until_denied() {
    let gate = gate();
    for tool in ["read_file", "read_many_files", "list_directory", "glob", "search_file_content"] {
        assert_eq!(
            gate.store().get_effective(tool, "fresh", None),
            PermissionLevel::AllowSession,
            "{tool}"
        );
    }

    gate.store().set_permission("read_file", PermissionLevel::Deny, "s1", None);
    let decision = gate.check_and_gate("read_file", &json!({ "path": "README.md" }), "s1");
    assert_eq!(decision.terminal, GateState::DeniedTerminal);

    let other = gate.check_and_gate("read_file", &json!({ "path": "README.md" }), "s2");
    assert_eq!(other.terminal, GateState::AutoAllowedTerminal);
}

/// Batch resolution on an empty queue is a no-op.
#[test]
fn batch_resolution_on_empty_queue_is_noop() {
    let gate = gate();
    assert_eq!(gate.resolve_all("s1", ApprovalAction::Approve, ApprovalScope::Once), 0);
    assert_eq!(gate.resolve_all("s1", ApprovalAction::Deny, ApprovalScope::Once), 0);
    assert!(gate.audit().is_empty());
    assert!(gate.store().session_rules("s1").is_empty());
}

/// Exporting as JSON and parsing it back yields the same entries in the same order.
#[test]
fn json_export_round_trips_in_order() {
    let gate = gate();
    gate.check_and_gate("read_file", &json!({ "path": "a.rs" }), "s1");
    gate.check_and_gate("run_shell_command", &json!({ "command": "rm -rf /" }), "s1");
    gate.check_and_gate_with("write_file", &json!({ "path": "b.rs" }), "s2", ApprovalMode::AutoDeny);

    let exported = gate.export_audit(ExportFormat::Json).unwrap();
    let parsed: Vec<AuditEntry> = serde_json::from_str(&exported).unwrap();
    assert_eq!(parsed, gate.audit().entries());
    let seqs: Vec<u64> = parsed.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

/// A session grant for a whole directory still asks for files under a sensitive path.
#[test]
fn sensitive_path_ceiling_overrides_session_grant() {
    let gate = gate();
    gate.store()
        .set_permission("write_file", PermissionLevel::AllowSession, "s1", Some("~/.ssh/*"));

    assert_eq!(
        gate.store().get_effective("write_file", "s1", Some("~/.ssh/authorized_keys")),
        PermissionLevel::Ask
    );

    let decision = gate.check_and_gate("write_file", &json!({ "path": "~/.ssh/authorized_keys" }), "s1");
    assert_eq!(decision.terminal, GateState::QueuedForApproval);
    let id = decision.approval_id.unwrap();
    assert!(gate.resolve_approval("s1", &id, ApprovalAction::Approve, ApprovalScope::Once));

    let entry = gate.audit().recent(1).remove(0);
    assert!(entry.approved);
    assert!(entry.reason.unwrap().contains("clamped to ask"));
}

/// Every invocation ends in exactly one audit entry, whichever terminal it reaches.
#[test]
fn every_invocation_writes_exactly_one_entry() {
    let gate = gate();
    gate.store().set_permission("delete_file", PermissionLevel::Deny, "s1", None);

    gate.check_and_gate("read_file", &json!({ "path": "a" }), "s1");
    gate.check_and_gate("delete_file", &json!({ "path": "a" }), "s1");
    gate.check_and_gate("run_shell_command", &json!({ "command": "rm -rf /" }), "s1");
    assert_eq!(gate.audit().len(), 3);

    let queued = gate.check_and_gate("write_file", &json!({ "path": "a" }), "s1");
    assert_eq!(gate.audit().len(), 3);
    let id = queued.approval_id.unwrap();
    gate.resolve_approval("s1", &id, ApprovalAction::Deny, ApprovalScope::Once);
    assert_eq!(gate.audit().len(), 4);
    assert!(!gate.resolve_approval("s1", &id, ApprovalAction::Approve, ApprovalScope::Once));
    assert_eq!(gate.audit().len(), 4);

    let stats = gate.audit_stats(Some("s1"));
    assert_eq!(stats.total_calls, 4);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.denied, 3);
}

/// Denying for the session turns later calls of the same tool into immediate denials.
#[test]
fn deny_for_session_sticks() {
    let gate = gate();
    let id = gate
        .check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1")
        .approval_id
        .unwrap();
    assert!(gate.resolve_approval("s1", &id, ApprovalAction::Deny, ApprovalScope::Session));

    let again = gate.check_and_gate("web_fetch", &json!({ "url": "https://example.org" }), "s1");
    assert_eq!(again.terminal, GateState::DeniedTerminal);
    assert!(gate.pending_approvals("s1").is_empty());
}

/// Ending a session drops its grants; other sessions are untouched.
#[test]
fn session_end_is_scoped_to_one_session() {
    let gate = gate();
    gate.store().set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
    gate.store().set_permission("write_file", PermissionLevel::AllowSession, "s2", None);

    gate.handle_session_event(SessionEvent::Ended("s1".to_string()));

    let s1 = gate.check_and_gate("write_file", &json!({ "path": "a" }), "s1");
    let s2 = gate.check_and_gate("write_file", &json!({ "path": "a" }), "s2");
    assert_eq!(s1.terminal, GateState::QueuedForApproval);
    assert_eq!(s2.terminal, GateState::AutoAllowedTerminal);
}

/// Concurrent calls in one session serialize; audit sequence numbers stay dense and ordered.
#[test]
fn concurrent_sessions_keep_audit_ordered() {
    let gate = Arc::new(gate());
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let gate = gate.clone();
            thread::spawn(move || {
                let session = format!("s{}", n % 2);
                for i in 0..25 {
                    gate.check_and_gate("read_file", &json!({ "path": format!("f{i}.txt") }), &session);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = gate.audit().entries();
    assert_eq!(entries.len(), 200);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.seq, i as u64 + 1);
    }
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

/// Persisted rules survive a restart; session grants do not.
#[test]
fn persisted_rules_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let registry = Arc::new(StaticRegistry::builtin());
    {
        let gate = Gatekeeper::from_config(&config, registry.clone()).unwrap();
        gate.store().persist_permission("web_fetch", PermissionLevel::AllowSession, None).unwrap();
        gate.store().set_permission("write_file", PermissionLevel::AllowSession, "s1", None);
        gate.check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1");
    }

    let gate = Gatekeeper::from_config(&config, registry).unwrap();
    let fetch = gate.check_and_gate("web_fetch", &json!({ "url": "https://example.com" }), "s1");
    assert_eq!(fetch.terminal, GateState::AutoAllowedTerminal);
    let write = gate.check_and_gate("write_file", &json!({ "path": "a" }), "s1");
    assert_eq!(write.terminal, GateState::QueuedForApproval);

    let entries = gate.audit().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[1].seq, 2);
}

/// Skip-all mode still routes through the queue and audits the approval.
#[test]
fn skip_all_mode_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.gate.mode = ApprovalMode::SkipAll;
    config.audit.persist = false;
    let gate = Gatekeeper::from_config(&config, Arc::new(StaticRegistry::builtin())).unwrap();

    let decision = gate.check_and_gate("write_file", &json!({ "path": "a" }), "s1");
    assert!(decision.allowed);
    assert_eq!(decision.terminal, GateState::ApprovedTerminal);
    assert_eq!(gate.audit().entries()[0].terminal, GateState::ApprovedTerminal);
    assert!(!dir.path().join("audit.jsonl").exists());
}

/// Tools missing from the registry fall back to ask and are queued.
#[test]
fn unregistered_tool_is_queued() {
    let gate = gate();
    let decision = gate.check_and_gate("mystery_tool", &json!({}), "s1");
    assert_eq!(decision.terminal, GateState::QueuedForApproval);
    assert_eq!(decision.risk_level, RiskLevel::Medium);
    let pending = gate.pending_approvals("s1");
    assert!(pending[0].description.starts_with("mystery_tool("));
}
