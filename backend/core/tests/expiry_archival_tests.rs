// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session expiry and archival tests, including fault injection against the
//! archival store: a failing write for one transaction must not stop the
//! rest of the drain, and live keys must be deleted regardless.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use acl_backend_core::application::registry::{RegistryConfig, SessionRegistry};
use acl_backend_core::domain::repository::{
    ArchiveStore, LiveStateStore, RepositoryError, SessionRecord, TransactionRecord,
};
use acl_backend_core::domain::transaction::{
    AclAction, AclEntry, EntityType, Operation, Transaction, TransactionRequest,
};
use acl_backend_core::infrastructure::error_channel::error_channel;
use acl_backend_core::infrastructure::repositories::{InMemoryArchiveStore, InMemoryLiveStore};

/// Wraps the in-memory archive and fails pending writes whose target path
/// matches `fail_path`, for the first `fail_attempts` attempts
/// (`u32::MAX` ⇒ permanently).
struct FlakyArchiveStore {
    inner: InMemoryArchiveStore,
    fail_path: String,
    fail_attempts: u32,
    attempts: AtomicUsize,
}

impl FlakyArchiveStore {
    fn new(fail_path: &str, fail_attempts: u32) -> Self {
        Self {
            inner: InMemoryArchiveStore::new(),
            fail_path: fail_path.to_string(),
            fail_attempts,
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveStore for FlakyArchiveStore {
    async fn store_expired_session(&self, record: &SessionRecord) -> Result<(), RepositoryError> {
        self.inner.store_expired_session(record).await
    }

    async fn store_pending_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        if record.target_path == self.fail_path {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            if attempt <= self.fail_attempts {
                return Err(RepositoryError::Database("injected write failure".into()));
            }
        }
        self.inner.store_pending_transaction(record).await
    }

    async fn store_result_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<(), RepositoryError> {
        self.inner.store_result_transaction(record).await
    }

    async fn sessions_by_username(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionRecord>, RepositoryError> {
        self.inner.sessions_by_username(username, limit, offset).await
    }

    async fn results_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        self.inner.results_by_user(username, limit, offset).await
    }

    async fn pending_by_user(
        &self,
        username: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        self.inner.pending_by_user(username, limit, offset).await
    }
}

fn request(path: &str) -> TransactionRequest {
    TransactionRequest {
        operation: Operation::SetAcl,
        target_path: path.to_string(),
        entries: vec![AclEntry {
            entity_type: EntityType::User,
            entity: "alice".to_string(),
            permissions: "rw".to_string(),
            action: AclAction::Add,
            is_default: false,
            success: false,
            error: None,
        }],
    }
}

fn fast_retry_config() -> RegistryConfig {
    RegistryConfig {
        archive_retry_attempts: 3,
        archive_retry_base: Duration::from_millis(1),
        ..RegistryConfig::default()
    }
}

#[tokio::test]
async fn test_one_failing_archive_write_does_not_stop_the_drain() {
    let live = Arc::new(InMemoryLiveStore::new());
    let archive = Arc::new(FlakyArchiveStore::new("/mnt/b", u32::MAX));
    let (errors, mut rx) = error_channel(64);
    let registry = SessionRegistry::new(
        live.clone(),
        archive.clone(),
        errors,
        fast_retry_config(),
    );

    let id = registry.create_session("alice", "", "").await.unwrap();
    let session = registry.get_session("alice").await.unwrap();
    for path in ["/mnt/a", "/mnt/b", "/mnt/c"] {
        registry
            .add_transaction(&session, request(path))
            .await
            .unwrap();
    }

    registry.expire_session("alice").await;

    // The poisoned write burned all its retries...
    assert_eq!(archive.attempts(), 3);
    let reported = rx.recv().await.unwrap();
    assert!(reported.to_string().contains("after retries"));

    // ...while the other two transactions still archived as pending.
    let archived = archive.inner.archived_pending();
    let mut paths: Vec<&str> = archived
        .iter()
        .map(|record| record.target_path.as_str())
        .collect();
    paths.sort_unstable();
    assert_eq!(paths, ["/mnt/a", "/mnt/c"]);
    for record in &archived {
        assert_eq!(record.status, "pending");
    }

    // Session record archived as pending, live keys gone unconditionally.
    let sessions = archive.inner.archived_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, "pending");
    assert!(!live.has_session_keys(id));
    assert_eq!(registry.session_count().await, 0);
}

#[tokio::test]
async fn test_transient_archive_failure_is_retried_to_success() {
    let live = Arc::new(InMemoryLiveStore::new());
    let archive = Arc::new(FlakyArchiveStore::new("/mnt/b", 2));
    let (errors, _rx) = error_channel(64);
    let registry = SessionRegistry::new(live, archive.clone(), errors, fast_retry_config());

    registry.create_session("alice", "", "").await.unwrap();
    let session = registry.get_session("alice").await.unwrap();
    registry
        .add_transaction(&session, request("/mnt/b"))
        .await
        .unwrap();

    registry.expire_session("alice").await;

    // Two injected failures, then the third attempt landed.
    assert_eq!(archive.attempts(), 3);
    let archived = archive.inner.archived_pending();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].target_path, "/mnt/b");
}

#[tokio::test]
async fn test_completed_results_flush_to_archive_on_expiry() {
    let live = Arc::new(InMemoryLiveStore::new());
    let archive = Arc::new(InMemoryArchiveStore::new());
    let (errors, _rx) = error_channel(64);
    let registry = SessionRegistry::new(
        live.clone(),
        archive.clone(),
        errors,
        fast_retry_config(),
    );

    registry.create_session("alice", "", "").await.unwrap();
    let session = registry.get_session("alice").await.unwrap();

    // Simulate two executed transactions already mirrored by workers.
    for (path, ok) in [("/mnt/a", true), ("/mnt/b", false)] {
        let mut txn = Transaction::from_request(session.id, "alice", request(path));
        txn.record_execution(ok, "", 5, (!ok).then(|| "setfacl failed".to_string()));
        live.append_result(session.id, &txn).await.unwrap();
    }

    registry.expire_session("alice").await;

    let results = archive.archived_results();
    assert_eq!(results.len(), 2);

    // Queue was empty, so the session itself archives as expired.
    let sessions = archive.archived_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, "expired");
    assert!(!live.has_session_keys(session.id));
}

#[tokio::test]
async fn test_repeated_expiry_archives_once() {
    let live = Arc::new(InMemoryLiveStore::new());
    let archive = Arc::new(InMemoryArchiveStore::new());
    let (errors, _rx) = error_channel(64);
    let registry = SessionRegistry::new(live, archive.clone(), errors, fast_retry_config());

    registry.create_session("alice", "", "").await.unwrap();
    registry.expire_session("alice").await;
    registry.expire_session("alice").await;

    assert_eq!(archive.archived_sessions().len(), 1);
}
