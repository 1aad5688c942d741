// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transaction Aggregate
//!
//! One requested ACL change, tracked from submission through execution and
//! into archival. A transaction is created by the API layer, enqueued into
//! exactly one session's FIFO queue, dequeued by the scheduler, executed by
//! a single worker, and finally flushed to the archival store when its
//! session expires.
//!
//! ## Invariants
//!
//! - A transaction belongs to at most one session queue at a time; ownership
//!   transfers to exactly one worker task on dequeue.
//! - Once executed, a transaction is never re-queued — it moves to the live
//!   results log and eventually to archival storage.
//! - `status` ends in exactly one of `Success` or `Failed`; `exec_status`
//!   records whether the underlying ACL change itself succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::SessionId;

/// Opaque identifier for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Generate a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The requested ACL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Read the current ACL of the target path.
    GetAcl,
    /// Apply the transaction's entries to the target path.
    SetAcl,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetAcl => "get_acl",
            Self::SetAcl => "set_acl",
        }
    }
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Queued, or drained unexecuted at session expiry.
    Pending,
    /// Executed; see `exec_status` for the underlying outcome.
    Success,
    /// Could not be executed (unroutable path, dispatch failure, tool error).
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a single ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Add,
    Modify,
    Remove,
}

impl AclAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
        }
    }
}

/// The class of principal an ACL entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Group,
    Other,
    Mask,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Other => "other",
            Self::Mask => "mask",
        }
    }
}

/// A single ACL entry within a transaction, plus its post-execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub entity_type: EntityType,
    pub entity: String,
    pub permissions: String,
    pub action: AclAction,
    /// Default ACLs apply to files created under the target directory.
    #[serde(default)]
    pub is_default: bool,

    /// Set by the executor after the entry has been applied.
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AclEntry {
    /// The `type:entity:perms` spec handed to the ACL tool when merging the
    /// entry (`add`/`modify`), with the `default:` qualifier when set.
    pub fn modify_spec(&self) -> String {
        let mut spec = String::new();
        if self.is_default {
            spec.push_str("default:");
        }
        spec.push_str(self.entity_type.as_str());
        spec.push(':');
        spec.push_str(&self.entity);
        spec.push(':');
        spec.push_str(&self.permissions);
        spec
    }

    /// The `type:entity` spec handed to the ACL tool when deleting the
    /// entry. Removal specs carry no permission field.
    pub fn remove_spec(&self) -> String {
        let mut spec = String::new();
        if self.is_default {
            spec.push_str("default:");
        }
        spec.push_str(self.entity_type.as_str());
        spec.push(':');
        spec.push_str(&self.entity);
        spec
    }
}

/// A permission-change request as submitted by the API layer.
///
/// The registry turns this into a full [`Transaction`] when it is enqueued,
/// so request payloads never carry ids or execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub operation: Operation,
    pub target_path: String,
    pub entries: Vec<AclEntry>,
}

/// Aggregate root for one requested ACL change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub target_path: String,
    pub entries: Vec<AclEntry>,
    pub status: TransactionStatus,
    /// Whether the underlying execution (ACL tool or daemon) succeeded.
    pub exec_status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub executed_by: String,
    pub duration_ms: i64,
}

impl Transaction {
    /// Build a pending transaction from an API request.
    pub fn from_request(
        session_id: SessionId,
        executed_by: impl Into<String>,
        request: TransactionRequest,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            session_id,
            timestamp: Utc::now(),
            operation: request.operation,
            target_path: request.target_path,
            entries: request.entries,
            status: TransactionStatus::Pending,
            exec_status: false,
            error_msg: None,
            output: None,
            executed_by: executed_by.into(),
            duration_ms: 0,
        }
    }

    /// Record the outcome of an execution attempt.
    ///
    /// A failing ACL tool or daemon yields `Failed` with `exec_status`
    /// false; it is never fatal to the worker or the session.
    pub fn record_execution(
        &mut self,
        success: bool,
        output: impl Into<String>,
        duration_ms: i64,
        error: Option<String>,
    ) {
        self.status = if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        self.exec_status = success;
        self.output = Some(output.into());
        self.duration_ms = duration_ms;
        self.error_msg = error;
    }

    /// Mark the transaction terminally failed without an execution attempt
    /// (client/config errors such as an unroutable target path).
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TransactionStatus::Failed;
        self.exec_status = false;
        self.error_msg = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: AclAction, is_default: bool) -> AclEntry {
        AclEntry {
            entity_type: EntityType::User,
            entity: "alice".to_string(),
            permissions: "rwx".to_string(),
            action,
            is_default,
            success: false,
            error: None,
        }
    }

    #[test]
    fn test_modify_spec_includes_permissions() {
        assert_eq!(entry(AclAction::Add, false).modify_spec(), "user:alice:rwx");
    }

    #[test]
    fn test_modify_spec_default_qualifier() {
        assert_eq!(
            entry(AclAction::Modify, true).modify_spec(),
            "default:user:alice:rwx"
        );
    }

    #[test]
    fn test_remove_spec_drops_permissions() {
        assert_eq!(entry(AclAction::Remove, false).remove_spec(), "user:alice");
        assert_eq!(
            entry(AclAction::Remove, true).remove_spec(),
            "default:user:alice"
        );
    }

    #[test]
    fn test_record_execution_failure_sets_failed() {
        let request = TransactionRequest {
            operation: Operation::SetAcl,
            target_path: "/mnt/data/file".to_string(),
            entries: vec![entry(AclAction::Add, false)],
        };
        let mut txn = Transaction::from_request(SessionId::new(), "alice", request);
        assert_eq!(txn.status, TransactionStatus::Pending);

        txn.record_execution(false, "setfacl: no such file", 12, Some("exit status 1".into()));
        assert_eq!(txn.status, TransactionStatus::Failed);
        assert!(!txn.exec_status);
        assert_eq!(txn.duration_ms, 12);
    }
}
