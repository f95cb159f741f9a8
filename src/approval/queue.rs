// ABOUTME: ApprovalQueue — per-session FIFO of operations awaiting a human or policy decision.
// ABOUTME: Resolution writes exactly one audit entry, applies session grants, and wakes any waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog};
use crate::error::GateError;
use crate::gate::GateState;
use crate::permission::{PermissionLevel, PermissionStore};
use crate::risk::RiskLevel;

/// An operation waiting for a decision. Never carries `blocked` risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    pub description: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Context carried into the audit entry, e.g. a sensitive-path override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// What a caller asks the queue to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub session_id: String,
    pub tool: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub path: Option<String>,
    pub command: Option<String>,
    pub note: Option<String>,
}

impl ApprovalRequest {
    pub fn new(session_id: &str, tool: &str, description: &str, risk_level: RiskLevel) -> Self {
        Self {
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            description: description.to_string(),
            risk_level,
            path: None,
            command: None,
            note: None,
        }
    }

    pub fn with_path(mut self, path: Option<&str>) -> Self {
        self.path = path.map(str::to_string);
        self
    }

    pub fn with_command(mut self, command: Option<&str>) -> Self {
        self.command = command.map(str::to_string);
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// How a pending approval ended, as seen by a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    Expired,
}

impl ApprovalOutcome {
    pub fn terminal(&self) -> GateState {
        match self {
            ApprovalOutcome::Approved => GateState::ApprovedTerminal,
            ApprovalOutcome::Denied | ApprovalOutcome::Expired => GateState::DeniedTerminal,
        }
    }
}

struct Waiting {
    approval: PendingApproval,
    notify: oneshot::Sender<ApprovalOutcome>,
    receiver: Option<oneshot::Receiver<ApprovalOutcome>>,
}

type SessionQueue = Arc<Mutex<VecDeque<Waiting>>>;

/// Pending approvals keyed by session. Sessions never coordinate with each other.
pub struct ApprovalQueue {
    sessions: RwLock<HashMap<String, SessionQueue>>,
    store: Arc<PermissionStore>,
    audit: Arc<AuditLog>,
    pending_ttl: Option<chrono::Duration>,
}

impl ApprovalQueue {
    pub fn new(store: Arc<PermissionStore>, audit: Arc<AuditLog>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            audit,
            pending_ttl: None,
        }
    }

    /// Expire pending approvals after `ttl`, resolving them as denied.
    pub fn with_pending_ttl(mut self, ttl: Option<std::time::Duration>) -> Self {
        self.pending_ttl = ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok());
        self
    }

    fn session(&self, session_id: &str) -> Option<SessionQueue> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn session_or_create(&self, session_id: &str) -> SessionQueue {
        if let Some(queue) = self.session(session_id) {
            return queue;
        }
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn is_expired(&self, approval: &PendingApproval, now: DateTime<Utc>) -> bool {
        self.pending_ttl
            .is_some_and(|ttl| now.signed_duration_since(approval.queued_at) >= ttl)
    }

    /// Queue an operation and return its id. `blocked` risk is refused.
    pub fn enqueue(&self, request: ApprovalRequest) -> Result<String, GateError> {
        if request.risk_level == RiskLevel::Blocked {
            warn!(tool = request.tool.as_str(), session_id = request.session_id.as_str(), "refusing to queue blocked operation");
            return Err(GateError::BlockedNotQueueable);
        }

        let approval = PendingApproval {
            id: Uuid::new_v4().to_string(),
            session_id: request.session_id,
            tool: request.tool,
            description: request.description,
            risk_level: request.risk_level,
            path: request.path,
            command: request.command,
            note: request.note,
            queued_at: Utc::now(),
        };
        let id = approval.id.clone();
        let (notify, receiver) = oneshot::channel();

        let queue = self.session_or_create(&approval.session_id);
        debug!(id = id.as_str(), session_id = approval.session_id.as_str(), tool = approval.tool.as_str(), "approval queued");
        queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(Waiting {
            approval,
            notify,
            receiver: Some(receiver),
        });
        Ok(id)
    }

    /// Pending approvals for a session, oldest first. Stale entries expire first.
    pub fn list(&self, session_id: &str) -> Vec<PendingApproval> {
        let Some(queue) = self.session(session_id) else {
            return Vec::new();
        };
        let expired = drain_where(&queue, |w| self.is_expired(&w.approval, Utc::now()));
        for waiting in expired {
            self.finish(waiting, ApprovalOutcome::Expired, false);
        }
        queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|w| w.approval.clone())
            .collect()
    }

    pub fn get(&self, session_id: &str, id: &str) -> Option<PendingApproval> {
        let queue = self.session(session_id)?;
        let guard = queue.lock().unwrap_or_else(PoisonError::into_inner);
        guard.iter().find(|w| w.approval.id == id).map(|w| w.approval.clone())
    }

    /// Receiver that fires when the approval is resolved. Available once per id.
    /// The sender is dropped without a value if the session is cleared.
    pub fn waiter(&self, session_id: &str, id: &str) -> Option<oneshot::Receiver<ApprovalOutcome>> {
        let queue = self.session(session_id)?;
        let mut guard = queue.lock().unwrap_or_else(PoisonError::into_inner);
        guard.iter_mut().find(|w| w.approval.id == id)?.receiver.take()
    }

    fn take(&self, session_id: &str, id: &str) -> Option<Waiting> {
        let queue = self.session(session_id)?;
        let mut guard = queue.lock().unwrap_or_else(PoisonError::into_inner);
        let index = guard.iter().position(|w| w.approval.id == id)?;
        guard.remove(index)
    }

    /// Approve one entry. With `grant_for_session` the tool is also allowed for the rest
    /// of the session. Returns `false` for unknown or expired ids.
    pub fn approve(&self, session_id: &str, id: &str, grant_for_session: bool) -> bool {
        self.resolve_one(session_id, id, ApprovalOutcome::Approved, grant_for_session)
    }

    /// Deny one entry. With `deny_for_session` the tool is also denied for the rest
    /// of the session. Returns `false` for unknown or expired ids.
    pub fn deny(&self, session_id: &str, id: &str, deny_for_session: bool) -> bool {
        self.resolve_one(session_id, id, ApprovalOutcome::Denied, deny_for_session)
    }

    fn resolve_one(&self, session_id: &str, id: &str, outcome: ApprovalOutcome, for_session: bool) -> bool {
        let Some(waiting) = self.take(session_id, id) else {
            debug!(session_id, id, "approval id not found");
            return false;
        };
        if self.is_expired(&waiting.approval, Utc::now()) {
            self.finish(waiting, ApprovalOutcome::Expired, false);
            return false;
        }
        self.finish(waiting, outcome, for_session);
        true
    }

    /// Approve every pending entry in enqueue order. Returns how many were approved.
    pub fn approve_all(&self, session_id: &str, grant_for_session: bool) -> usize {
        self.resolve_all(session_id, ApprovalOutcome::Approved, grant_for_session)
    }

    /// Deny every pending entry in enqueue order. Returns how many were denied.
    pub fn deny_all(&self, session_id: &str) -> usize {
        self.resolve_all(session_id, ApprovalOutcome::Denied, false)
    }

    fn resolve_all(&self, session_id: &str, outcome: ApprovalOutcome, for_session: bool) -> usize {
        let Some(queue) = self.session(session_id) else {
            return 0;
        };
        let drained: Vec<Waiting> = queue.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        let now = Utc::now();
        let mut resolved = 0;
        for waiting in drained {
            if self.is_expired(&waiting.approval, now) {
                self.finish(waiting, ApprovalOutcome::Expired, false);
            } else {
                self.finish(waiting, outcome, for_session);
                resolved += 1;
            }
        }
        resolved
    }

    /// Abandon a session's pending approvals without auditing them.
    /// Waiters observe a closed channel.
    pub fn clear(&self, session_id: &str) -> usize {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        let dropped = removed
            .map(|queue| queue.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0);
        debug!(session_id, dropped, "pending approvals abandoned");
        dropped
    }

    /// Resolve every stale entry in every session as expired. Returns how many expired.
    pub fn expire_stale(&self) -> usize {
        if self.pending_ttl.is_none() {
            return 0;
        }
        let queues: Vec<SessionQueue> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let now = Utc::now();
        let mut expired = 0;
        for queue in queues {
            for waiting in drain_where(&queue, |w| self.is_expired(&w.approval, now)) {
                self.finish(waiting, ApprovalOutcome::Expired, false);
                expired += 1;
            }
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|queue| queue.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Apply the session rule, append the audit entry, and wake the waiter.
    fn finish(&self, waiting: Waiting, outcome: ApprovalOutcome, for_session: bool) {
        let approval = &waiting.approval;
        let session_id = approval.session_id.as_str();
        let tool = approval.tool.as_str();

        if for_session {
            let level = match outcome {
                ApprovalOutcome::Approved => PermissionLevel::AllowSession,
                ApprovalOutcome::Denied | ApprovalOutcome::Expired => PermissionLevel::Deny,
            };
            self.store.set_permission(tool, level, session_id, None);
        }

        let reason = match outcome {
            ApprovalOutcome::Approved => None,
            ApprovalOutcome::Denied if for_session => Some("denied by user for the session"),
            ApprovalOutcome::Denied => Some("denied by user"),
            ApprovalOutcome::Expired => Some("approval expired"),
        };
        let reason = match (reason, approval.note.as_deref()) {
            (Some(reason), Some(note)) => Some(format!("{reason}; {note}")),
            (reason, note) => reason.or(note).map(str::to_string),
        };
        let mut entry = AuditEntry::new(session_id, tool, approval.risk_level, outcome.terminal())
            .with_command(approval.command.as_deref())
            .with_path(approval.path.as_deref());
        entry.reason = reason;
        self.audit.append(&entry);

        info!(id = approval.id.as_str(), session_id, tool, ?outcome, for_session, "approval resolved");
        let _ = waiting.notify.send(outcome);
    }
}

fn drain_where(queue: &SessionQueue, mut pred: impl FnMut(&Waiting) -> bool) -> Vec<Waiting> {
    let mut guard = queue.lock().unwrap_or_else(PoisonError::into_inner);
    let mut drained = Vec::new();
    let mut kept = VecDeque::with_capacity(guard.len());
    for waiting in guard.drain(..) {
        if pred(&waiting) {
            drained.push(waiting);
        } else {
            kept.push_back(waiting);
        }
    }
    *guard = kept;
    drained
}
