// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Registry Application Service
//!
//! Owns every live session: the username lookup map, the round-robin
//! ordering the scheduler sweeps, the per-session transaction queues, and
//! the expiry timers that drain sessions into the archival store.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Session lifecycle (create / refresh / expire), transaction
//!   enqueueing, and worker-completion bookkeeping
//! - **Dependencies:** Domain (Session, Transaction), storage traits
//!   (`LiveStateStore`, `ArchiveStore`), error sink
//!
//! # Data Structures
//!
//! The lookup map gives O(1) access by username; the ordering ring gives the
//! scheduler its fair sweep. Both live behind one registry-wide lock and are
//! always mutated together, trading a little space for runtime speed. Field
//! mutation inside a session takes only that session's lock, so API calls
//! for unrelated users are never serialized behind scheduler activity.
//!
//! # Expiry
//!
//! Each session arms a timer task that calls back into the public
//! [`SessionRegistry::expire_session`] — never an already-locked internal
//! path, which is what keeps the re-entrant callback deadlock-free. Expiry
//! evicts the session from both structures first, then flushes leftovers to
//! the archival store with bounded linear-backoff retries, and finally
//! deletes the session's live keys unconditionally. Archival loss is
//! reported through the error sink rather than crashing the expiring task.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::repository::{
    ArchiveStore, LiveStateStore, RepositoryError, SessionRecord, TransactionRecord,
};
use crate::domain::session::{Session, SessionId, SessionStatus};
use crate::domain::transaction::{
    Transaction, TransactionId, TransactionRequest, TransactionStatus,
};
use crate::infrastructure::error_channel::ErrorSink;

/// Tunables injected by the bootstrap layer.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Idle lifetime of a session before it is expired and archived.
    pub session_timeout: Duration,
    /// Attempts per archival write during expiry.
    pub archive_retry_attempts: u32,
    /// Base delay of the linear backoff between archival attempts.
    pub archive_retry_base: Duration,
    /// Upper bound on results pulled from the live store per expiring session.
    pub results_flush_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(24 * 60 * 60),
            archive_retry_attempts: 3,
            archive_retry_base: Duration::from_secs(1),
            results_flush_limit: 10_000,
        }
    }
}

/// Errors surfaced to the API layer.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no active session for {0}")]
    SessionNotFound(String),

    #[error("live store write failed: {0}")]
    LiveStore(String),
}

struct RegistryInner {
    /// O(1) lookup by username.
    sessions: HashMap<String, Arc<Session>>,
    /// Round-robin ring of usernames; front is the next session to sweep.
    order: VecDeque<String>,
}

/// Application service owning all live sessions.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    live: Arc<dyn LiveStateStore>,
    archive: Arc<dyn ArchiveStore>,
    errors: ErrorSink,
    config: RegistryConfig,
    /// Handed to expiry-timer tasks so they can call back into the public
    /// API without keeping the registry alive.
    weak_self: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(
        live: Arc<dyn LiveStateStore>,
        archive: Arc<dyn ArchiveStore>,
        errors: ErrorSink,
        config: RegistryConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                order: VecDeque::new(),
            }),
            live,
            archive,
            errors,
            config,
            weak_self: weak_self.clone(),
        })
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create a session for `username`, or refresh the existing one.
    ///
    /// Re-login is idempotent: an existing session keeps its identity and
    /// only has its expiry pushed out. The whole insert happens under the
    /// registry lock; the expiry timer fires asynchronously and re-enters
    /// through [`SessionRegistry::expire_session`].
    pub async fn create_session(
        &self,
        username: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<SessionId, RegistryError> {
        let mut inner = self.inner.lock().await;

        if let Some(session) = inner.sessions.get(username).cloned() {
            self.refresh_session(&session).await?;
            debug!(username, session_id = %session.id, "re-login refreshed existing session");
            return Ok(session.id);
        }

        let session = Arc::new(Session::new(
            username,
            ip,
            user_agent,
            Utc::now() + self.timeout_delta(),
        ));
        inner.order.push_back(username.to_string());
        inner.sessions.insert(username.to_string(), session.clone());
        self.arm_timer(&session);

        let snapshot = {
            let state = session.state.lock().await;
            session.snapshot(&state)
        };
        if let Err(err) = self.live.save_session(&snapshot).await {
            let reason = err.to_string();
            self.errors
                .report(anyhow::Error::new(err).context("persisting new session to live store"));
            return Err(RegistryError::LiveStore(reason));
        }

        info!(username, session_id = %session.id, "session created");
        Ok(session.id)
    }

    /// Re-arm `username`'s expiry timer and update its activity timestamps.
    pub async fn refresh_timer(&self, username: &str) -> Result<(), RegistryError> {
        let session = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .get(username)
                .cloned()
                .ok_or_else(|| RegistryError::SessionNotFound(username.to_string()))?
        };
        self.refresh_session(&session).await
    }

    /// Expire `username`'s session, draining its state into the archival
    /// store. Expiring an absent session is a no-op.
    pub async fn expire_session(&self, username: &str) {
        let session = {
            let mut inner = self.inner.lock().await;
            match inner.sessions.remove(username) {
                Some(session) => {
                    inner.order.retain(|queued| queued != username);
                    session
                }
                None => {
                    debug!(username, "expire requested for absent session");
                    return;
                }
            }
        };

        // Detach rather than abort: this very task may be the timer.
        drop(
            session
                .timer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );

        let mut state = session.state.lock().await;

        if state.queue.is_empty() {
            state.status = SessionStatus::Expired;
        } else {
            // Leftover transactions are archived as pending, one by one; a
            // failure on one is reported and archival continues for the rest.
            while let Some(mut txn) = state.queue.pop_front() {
                txn.status = TransactionStatus::Pending;
                let record = match TransactionRecord::from_transaction(&txn) {
                    Ok(record) => record,
                    Err(err) => {
                        self.errors.report(anyhow::Error::new(err).context(format!(
                            "failed to convert pending transaction {} to archive format",
                            txn.id
                        )));
                        continue;
                    }
                };
                if let Err(err) = self
                    .archive_with_retry(|| self.archive.store_pending_transaction(&record))
                    .await
                {
                    self.errors.report(anyhow::Error::new(err).context(format!(
                        "failed to archive pending transaction {} after retries",
                        txn.id
                    )));
                }
            }
            state.status = SessionStatus::Pending;
        }

        // Flush completed results out of the live store.
        match self
            .live
            .recent_results(session.id, self.config.results_flush_limit)
            .await
        {
            Ok(results) => {
                for result in results {
                    if !matches!(
                        result.status,
                        TransactionStatus::Success | TransactionStatus::Failed
                    ) {
                        continue;
                    }
                    let record = match TransactionRecord::from_transaction(&result) {
                        Ok(record) => record,
                        Err(err) => {
                            self.errors.report(anyhow::Error::new(err).context(format!(
                                "failed to convert transaction result {} to archive format",
                                result.id
                            )));
                            continue;
                        }
                    };
                    if let Err(err) = self
                        .archive_with_retry(|| self.archive.store_result_transaction(&record))
                        .await
                    {
                        self.errors.report(anyhow::Error::new(err).context(format!(
                            "failed to archive transaction result {} after retries",
                            result.id
                        )));
                    }
                }
            }
            Err(err) => {
                self.errors.report(
                    anyhow::Error::new(err)
                        .context("failed to read transaction results from live store"),
                );
            }
        }

        let record = SessionRecord::from(&session.snapshot(&state));
        if let Err(err) = self
            .archive_with_retry(|| self.archive.store_expired_session(&record))
            .await
        {
            self.errors.report(
                anyhow::Error::new(err).context("failed to archive session after retries"),
            );
        }

        // Live keys go away even when archival writes failed above; loss has
        // already been reported through the error sink.
        if let Err(err) = self.live.delete_session_keys(session.id).await {
            self.errors.report(
                anyhow::Error::new(err).context("failed to delete session keys from live store"),
            );
        }

        info!(
            username,
            session_id = %session.id,
            status = %state.status,
            "session expired and archived"
        );
    }

    /// Force-expire every live session; used while shutting down so pending
    /// work drains into the archival store.
    pub async fn drain_all(&self) {
        for username in self.get_all_usernames().await {
            self.expire_session(&username).await;
            info!(username = %username, "session force expired for shutdown");
        }
    }

    // ========================================================================
    // Scheduling Support
    // ========================================================================

    /// Pop the session at the front of the ordering ring and rotate it to
    /// the tail, so every active session is inspected once per full sweep.
    /// Returns `None` on an empty registry; callers back off rather than
    /// busy-spin.
    pub async fn get_next_session(&self) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().await;
        let username = inner.order.pop_front()?;
        let session = inner.sessions.get(&username).cloned();
        inner.order.push_back(username);
        session
    }

    /// Append a transaction built from `request` to the session's FIFO queue
    /// and mirror it into the live pending-set. A live-store failure is
    /// surfaced to the caller and nothing is enqueued.
    pub async fn add_transaction(
        &self,
        session: &Arc<Session>,
        request: TransactionRequest,
    ) -> Result<TransactionId, RegistryError> {
        let txn = Transaction::from_request(session.id, session.username.clone(), request);
        let txn_id = txn.id;

        let mut state = session.state.lock().await;
        if let Err(err) = self.live.save_pending_transaction(session.id, &txn).await {
            let reason = err.to_string();
            self.errors.report(
                anyhow::Error::new(err).context("persisting pending transaction to live store"),
            );
            return Err(RegistryError::LiveStore(reason));
        }
        state.queue.push_back(txn);

        debug!(
            username = %session.username,
            transaction_id = %txn_id,
            queued = state.queue.len(),
            "transaction enqueued"
        );
        Ok(txn_id)
    }

    /// Worker-completion bookkeeping: bump the session counters, mirror them
    /// to the live store, append the result to the results log, and clear
    /// the pending entry. Runs for failed executions too; live-store errors
    /// are reported, never raised.
    pub async fn complete_transaction(&self, session: &Arc<Session>, txn: &Transaction) {
        let snapshot = {
            let mut state = session.state.lock().await;
            if txn.status == TransactionStatus::Success {
                state.completed_count += 1;
            } else {
                state.failed_count += 1;
            }
            session.snapshot(&state)
        };

        if let Err(err) = self.live.save_session(&snapshot).await {
            self.errors.report(
                anyhow::Error::new(err).context("mirroring session counters to live store"),
            );
        }
        if let Err(err) = self.live.append_result(session.id, txn).await {
            self.errors.report(
                anyhow::Error::new(err).context("appending transaction result to live store"),
            );
        }
        if let Err(err) = self
            .live
            .remove_pending_transaction(session.id, txn.id)
            .await
        {
            self.errors.report(
                anyhow::Error::new(err).context("removing pending transaction from live store"),
            );
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Non-mutating existence check used by the API layer.
    pub async fn session_exists(&self, username: &str) -> Option<SessionId> {
        let inner = self.inner.lock().await;
        inner.sessions.get(username).map(|session| session.id)
    }

    /// Handle to a live session, for enqueueing against it.
    pub async fn get_session(&self, username: &str) -> Option<Arc<Session>> {
        let inner = self.inner.lock().await;
        inner.sessions.get(username).cloned()
    }

    /// Usernames of every live session; drives shutdown draining.
    pub async fn get_all_usernames(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.sessions.keys().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.sessions.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn refresh_session(&self, session: &Arc<Session>) -> Result<(), RegistryError> {
        let snapshot = {
            let mut state = session.state.lock().await;
            let now = Utc::now();
            state.expiry = now + self.timeout_delta();
            state.last_active_at = now;
            session.snapshot(&state)
        };
        self.arm_timer(session);

        if let Err(err) = self.live.save_session(&snapshot).await {
            let reason = err.to_string();
            self.errors.report(
                anyhow::Error::new(err).context("persisting refreshed session to live store"),
            );
            return Err(RegistryError::LiveStore(reason));
        }
        Ok(())
    }

    /// Arm (or re-arm) the session's expiry timer. The timer task calls the
    /// public expiry API, which re-acquires the registry lock itself.
    fn arm_timer(&self, session: &Arc<Session>) {
        let registry = self.weak_self.clone();
        let username = session.username.clone();
        let timeout = self.config.session_timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire_session(&username).await;
            }
        });

        let mut timer = session
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    async fn archive_with_retry<F, Fut>(&self, mut op: F) -> Result<(), RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RepositoryError>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.config.archive_retry_attempts.max(1) {
            match op().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "archival write failed");
                    last_err = Some(err);
                    if attempt < self.config.archive_retry_attempts {
                        tokio::time::sleep(self.config.archive_retry_base * attempt).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| RepositoryError::Database("archive retry exhausted".to_string())))
    }

    fn timeout_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}
