// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory storage backends.
//!
//! Development and test default for the storage traits in
//! [`crate::domain::repository`]; PostgreSQL archival lives in
//! [`postgres`]. The in-memory live store additionally exposes inspection
//! helpers so tests and the dashboard fan-out can look at current state.

pub mod postgres;

pub use postgres::PostgresArchiveStore;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::repository::{
    ArchiveStore, LiveStateStore, RepositoryError, SessionRecord, TransactionRecord,
};
use crate::domain::session::{SessionId, SessionSnapshot};
use crate::domain::transaction::{Transaction, TransactionId};

/// In-memory live store: one snapshot, one pending map, and one results
/// list per session.
#[derive(Default)]
pub struct InMemoryLiveStore {
    sessions: Mutex<HashMap<Uuid, SessionSnapshot>>,
    pending: Mutex<HashMap<Uuid, HashMap<Uuid, Transaction>>>,
    results: Mutex<HashMap<Uuid, Vec<Transaction>>>,
}

impl InMemoryLiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for a session, if any.
    pub fn session(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.lock().get(&id.0).cloned()
    }

    /// Size of a session's pending set.
    pub fn pending_count(&self, id: SessionId) -> usize {
        self.pending
            .lock()
            .get(&id.0)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Whether any live key for the session remains.
    pub fn has_session_keys(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id.0)
            || self.pending.lock().contains_key(&id.0)
            || self.results.lock().contains_key(&id.0)
    }
}

#[async_trait]
impl LiveStateStore for InMemoryLiveStore {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), RepositoryError> {
        self.sessions.lock().insert(snapshot.id.0, snapshot.clone());
        Ok(())
    }

    async fn save_pending_transaction(
        &self,
        session_id: SessionId,
        txn: &Transaction,
    ) -> Result<(), RepositoryError> {
        self.pending
            .lock()
            .entry(session_id.0)
            .or_default()
            .insert(txn.id.0, txn.clone());
        Ok(())
    }

    async fn remove_pending_transaction(
        &self,
        session_id: SessionId,
        txn_id: TransactionId,
    ) -> Result<(), RepositoryError> {
        if let Some(set) = self.pending.lock().get_mut(&session_id.0) {
            set.remove(&txn_id.0);
        }
        Ok(())
    }

    async fn append_result(
        &self,
        session_id: SessionId,
        txn: &Transaction,
    ) -> Result<(), RepositoryError> {
        self.results
            .lock()
            .entry(session_id.0)
            .or_default()
            .push(txn.clone());
        Ok(())
    }

    async fn recent_results(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        let results = self.results.lock();
        let Some(list) = results.get(&session_id.0) else {
            return Ok(Vec::new());
        };
        let start = list.len().saturating_sub(limit);
        Ok(list[start..].to_vec())
    }

    async fn delete_session_keys(&self, session_id: SessionId) -> Result<(), RepositoryError> {
        self.sessions.lock().remove(&session_id.0);
        self.pending.lock().remove(&session_id.0);
        self.results.lock().remove(&session_id.0);
        Ok(())
    }
}

/// In-memory archival store, mainly for tests and single-node development.
#[derive(Default)]
pub struct InMemoryArchiveStore {
    sessions: Mutex<Vec<SessionRecord>>,
    pending: Mutex<Vec<TransactionRecord>>,
    results: Mutex<Vec<TransactionRecord>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archived_sessions(&self) -> Vec<SessionRecord> {
        self.sessions.lock().clone()
    }

    pub fn archived_pending(&self) -> Vec<TransactionRecord> {
        self.pending.lock().clone()
    }

    pub fn archived_results(&self) -> Vec<TransactionRecord> {
        self.results.lock().clone()
    }
}

fn page<T: Clone>(records: &[T], limit: i64, offset: i64) -> Vec<T> {
    records
        .iter()
        .rev()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn store_expired_session(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        self.sessions.lock().push(record.clone());
        Ok(())
    }

    async fn store_pending_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        self.pending.lock().push(record.clone());
        Ok(())
    }

    async fn store_result_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        self.results.lock().push(record.clone());
        Ok(())
    }

    async fn sessions_by_username(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionRecord>, RepositoryError> {
        let sessions = self.sessions.lock();
        let matching: Vec<SessionRecord> = sessions
            .iter()
            .filter(|record| record.username == username)
            .cloned()
            .collect();
        Ok(page(&matching, limit, offset))
    }

    async fn results_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let results = self.results.lock();
        let matching: Vec<TransactionRecord> = results
            .iter()
            .filter(|record| record.executed_by == username)
            .cloned()
            .collect();
        Ok(page(&matching, limit, offset))
    }

    async fn pending_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let pending = self.pending.lock();
        let matching: Vec<TransactionRecord> = pending
            .iter()
            .filter(|record| record.executed_by == username)
            .cloned()
            .collect();
        Ok(page(&matching, limit, offset))
    }
}
