// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Storage Interfaces
//!
//! Persistence contracts for the two external stores the core consumes,
//! defined at the domain seam and implemented in
//! `crate::infrastructure::repositories`:
//!
//! | Trait | Backing store | Implementations |
//! |-------|---------------|----------------|
//! | `LiveStateStore` | low-latency session/transaction state | `InMemoryLiveStore` |
//! | `ArchiveStore` | durable history after expiry | `InMemoryArchiveStore`, `PostgresArchiveStore` |
//!
//! Concrete implementations are selected at startup; in-memory backends are
//! the development and test default, PostgreSQL the production archival
//! backend. Archival records are flattened, with ACL entries serialized to
//! JSON, so the schema stays independent of the in-process types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::{SessionId, SessionSnapshot};
use crate::domain::transaction::{Transaction, TransactionId};

/// Flattened session row written to the archival store on expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub completed_count: i32,
    pub failed_count: i32,
}

impl From<&SessionSnapshot> for SessionRecord {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.id.0,
            username: snapshot.username.clone(),
            ip: snapshot.ip.clone(),
            user_agent: snapshot.user_agent.clone(),
            status: snapshot.status.as_str().to_string(),
            created_at: snapshot.created_at,
            last_active_at: snapshot.last_active_at,
            expiry: snapshot.expiry,
            completed_count: snapshot.completed as i32,
            failed_count: snapshot.failed as i32,
        }
    }
}

/// Flattened transaction row for the archival store. ACL entries travel as
/// a JSON document rather than a child table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub target_path: String,
    pub entries: serde_json::Value,
    pub status: String,
    pub exec_status: bool,
    pub error_msg: Option<String>,
    pub output: Option<String>,
    pub executed_by: String,
    pub duration_ms: Option<i64>,
}

impl TransactionRecord {
    /// Flatten a transaction for archival.
    pub fn from_transaction(txn: &Transaction) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: txn.id.0,
            session_id: txn.session_id.0,
            timestamp: txn.timestamp,
            operation: txn.operation.as_str().to_string(),
            target_path: txn.target_path.clone(),
            entries: serde_json::to_value(&txn.entries)?,
            status: txn.status.as_str().to_string(),
            exec_status: txn.exec_status,
            error_msg: txn.error_msg.clone(),
            output: txn.output.clone(),
            executed_by: txn.executed_by.clone(),
            duration_ms: (txn.duration_ms > 0).then_some(txn.duration_ms),
        })
    }
}

/// Low-latency store mirroring live session and transaction state.
///
/// Keyed per session: one hash of session fields, one hash of pending
/// transactions, one append-only results list. Change notification on top
/// of this store belongs to the excluded dashboard layer.
#[async_trait]
pub trait LiveStateStore: Send + Sync {
    /// Write (or overwrite) the session's hash fields.
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), RepositoryError>;

    /// Record a transaction in the session's pending set.
    async fn save_pending_transaction(
        &self,
        session_id: SessionId,
        txn: &Transaction,
    ) -> Result<(), RepositoryError>;

    /// Drop a transaction from the session's pending set.
    async fn remove_pending_transaction(
        &self,
        session_id: SessionId,
        txn_id: TransactionId,
    ) -> Result<(), RepositoryError>;

    /// Append an executed transaction to the session's results list.
    async fn append_result(
        &self,
        session_id: SessionId,
        txn: &Transaction,
    ) -> Result<(), RepositoryError>;

    /// Read up to `limit` most recent results, in chronological order.
    async fn recent_results(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    /// Delete every live key belonging to the session.
    async fn delete_session_keys(&self, session_id: SessionId) -> Result<(), RepositoryError>;
}

/// Durable store holding historical sessions and transactions after expiry.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Persist an expired session's final state.
    async fn store_expired_session(&self, record: &SessionRecord) -> Result<(), RepositoryError>;

    /// Persist a transaction drained unexecuted from an expiring session.
    async fn store_pending_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError>;

    /// Persist an executed transaction's result.
    async fn store_result_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError>;

    /// Archived sessions for a user, newest first.
    async fn sessions_by_username(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionRecord>, RepositoryError>;

    /// Archived results issued by a user, newest first.
    async fn results_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError>;

    /// Archived never-executed transactions issued by a user, newest first.
    async fn pending_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
