// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Aggregate
//!
//! A logged-in user's live context. Each session owns a private FIFO queue
//! of [`Transaction`]s plus the counters and timestamps mirrored to the live
//! store for dashboards.
//!
//! ## Ownership & Locking
//!
//! Sessions are exclusively owned by the
//! [`crate::application::registry::SessionRegistry`]. Membership (the lookup
//! map and the round-robin ordering) is mutated under the registry-wide
//! lock; everything behind [`Session::state`] is mutated under the
//! per-session lock so API calls for unrelated sessions are never serialized
//! behind scheduler activity.
//!
//! ## Lifecycle
//!
//! Created on login, destroyed on expiry, never resurrected — a later login
//! creates a new session identity.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::transaction::Transaction;

/// Opaque identifier for a session. Stays associated with the user in the
/// archival store after the live session is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The session is live and schedulable.
    Active,
    /// Expired with transactions still queued; the leftovers were drained to
    /// the archival store as pending.
    Pending,
    /// Expired with an empty queue.
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable session state, guarded by the per-session lock.
#[derive(Debug)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_active_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub completed_count: u32,
    pub failed_count: u32,
    /// Transactions issued by the user, strictly FIFO.
    pub queue: VecDeque<Transaction>,
}

/// A logged-in user's live session.
pub struct Session {
    pub id: SessionId,
    pub username: String,
    /// IP and user agent are kept for security logs; unauthorized addresses
    /// and illegal user agents can be traced back per session.
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,

    /// Per-session lock; see the module docs for the locking policy.
    pub state: Mutex<SessionState>,

    /// Handle of the currently armed expiry timer task. Refreshing aborts
    /// the old task; expiry detaches it (a task must not abort itself).
    pub(crate) timer: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Allocate a fresh active session expiring at `expiry`.
    pub fn new(
        username: impl Into<String>,
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            username: username.into(),
            ip: ip.into(),
            user_agent: user_agent.into(),
            created_at: now,
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                last_active_at: now,
                expiry,
                completed_count: 0,
                failed_count: 0,
                queue: VecDeque::new(),
            }),
            timer: StdMutex::new(None),
        }
    }

    /// The hash-field view of this session written to the live store.
    pub fn snapshot(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            username: self.username.clone(),
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            status: state.status,
            created_at: self.created_at,
            last_active_at: state.last_active_at,
            expiry: state.expiry,
            completed: state.completed_count,
            failed: state.failed_count,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Flat, serializable representation of a session for the live store.
///
/// Timestamps serialize as RFC 3339 via chrono's serde support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub completed: u32,
    pub failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_state() {
        let expiry = Utc::now() + chrono::Duration::hours(1);
        let session = Session::new("alice", "10.0.0.7", "curl/8.5", expiry);

        tokio_test::block_on(async {
            let mut state = session.state.lock().await;
            state.completed_count = 3;
            state.failed_count = 1;
            let snap = session.snapshot(&state);
            assert_eq!(snap.username, "alice");
            assert_eq!(snap.status, SessionStatus::Active);
            assert_eq!(snap.completed, 3);
            assert_eq!(snap.failed, 1);
            assert_eq!(snap.expiry, expiry);
        });
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
